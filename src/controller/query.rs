use super::Shared;
use crate::context::{PersistenceContext, SaveNotificationSource};
use crate::core::{PersistentModel, Result};
use crate::snapshot::SectionSnapshot;
use tracing::{Instrument, Level, event, info_span};

impl<E, C> Shared<E, C>
where
    E: PersistentModel,
    C: PersistenceContext<E> + SaveNotificationSource,
{
    /// Runs the full query and replaces the section snapshot wholesale.
    pub(crate) async fn perform_fetch(&self) -> Result<()> {
        let span = info_span!(
            "fetched_results.fetch",
            section_key_path = self.section_key_path().unwrap_or("")
        );
        async {
            let _serialized = self.replay_lock.lock().await;

            let models = match self.context.fetch(&self.descriptor).await {
                Ok(models) => models,
                Err(err) => {
                    event!(Level::ERROR, error = %err, "fetch failed");
                    return Err(err);
                }
            };

            let snapshot = SectionSnapshot::grouped(&models, self.section_key_path());
            event!(
                Level::DEBUG,
                models = models.len(),
                sections = snapshot.number_of_sections(),
                "fetch completed"
            );

            let delegate = self.delegate.get();
            if let Some(delegate) = &delegate {
                delegate.controller_will_change_content();
            }
            {
                let mut state = self.write_state();
                state.objects = models
                    .iter()
                    .map(|model| (model.persistent_id(), model.clone()))
                    .collect();
                state.snapshot = snapshot.clone();
                state.fetched_models = Some(models);
            }
            if let Some(delegate) = &delegate {
                delegate.controller_did_change_content_with(&snapshot);
                delegate.controller_did_change_content();
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}
