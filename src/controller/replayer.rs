use super::Shared;
use crate::context::{HistoryDescriptor, PersistenceContext, SaveNotificationSource};
use crate::core::{Change, ChangeType, EntityId, HistoryToken, PersistentModel, Result};
use crate::snapshot::{ChangeSet, SectionSnapshot, section_name_for};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tracing::{Instrument, Level, event, info_span};

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Checkpoint the pass started from.
    pub previous_token: Option<HistoryToken>,
    /// Checkpoint written at the end of the pass, if any transaction was folded.
    pub new_token: Option<HistoryToken>,
    pub transactions: usize,
    pub changes: ChangeSet,
    /// The controller went away before the result could be committed.
    pub abandoned: bool,
}

/// Working copy a pass folds into; committed only if the whole fold succeeds.
struct Fold<E> {
    snapshot: SectionSnapshot,
    objects: HashMap<EntityId, E>,
    changes: ChangeSet,
}

impl<E, C> Shared<E, C>
where
    E: PersistentModel,
    C: PersistenceContext<E> + SaveNotificationSource,
{
    /// Folds all history newer than the checkpoint into the snapshot.
    pub(crate) async fn replay(&self) -> Result<ReplayReport> {
        let _serialized = self.replay_lock.lock().await;
        self.stats.replay_passes.fetch_add(1, Ordering::Relaxed);

        let previous_token = self.token_store.read().await;
        let span = info_span!(
            "fetched_results.replay",
            checkpoint = ?previous_token.map(|t| t.sequence())
        );
        let result = self.replay_from(previous_token).instrument(span).await;
        if let Err(err) = &result {
            self.stats.failed_passes.fetch_add(1, Ordering::Relaxed);
            event!(Level::ERROR, error = %err, "history replay failed");
        }
        result
    }

    async fn replay_from(&self, previous_token: Option<HistoryToken>) -> Result<ReplayReport> {
        let mut report = ReplayReport {
            previous_token,
            ..ReplayReport::default()
        };

        let descriptor = HistoryDescriptor::after(previous_token);
        let mut transactions = self.context.fetch_history(&descriptor).await?;
        transactions.retain(|transaction| descriptor.includes(&transaction.token));
        transactions.sort_by_key(|transaction| transaction.token);

        let Some(last_token) = transactions.last().map(|t| t.token) else {
            return Ok(report);
        };
        event!(
            Level::INFO,
            count = transactions.len(),
            "processing history transactions"
        );

        let mut fold = {
            let state = self.read_state();
            Fold {
                snapshot: state.snapshot.clone(),
                objects: state.objects.clone(),
                changes: ChangeSet::new(),
            }
        };
        for transaction in &transactions {
            for change in &transaction.changes {
                self.fold_change(&mut fold, change).await?;
            }
        }

        if !self.is_alive() {
            report.abandoned = true;
            return Ok(report);
        }

        {
            let mut state = self.write_state();
            state.snapshot = fold.snapshot.clone();
            state.objects = fold.objects;
        }
        self.stats
            .transactions_folded
            .fetch_add(transactions.len() as u64, Ordering::Relaxed);
        if !fold.changes.is_empty() {
            self.publish(&fold.changes, &fold.snapshot);
        }

        event!(Level::DEBUG, token = %last_token, "history returned new token");
        if let Err(err) = self.token_store.write(last_token).await {
            self.stats.token_write_failures.fetch_add(1, Ordering::Relaxed);
            event!(Level::ERROR, error = %err, "could not write history token");
        }

        report.new_token = Some(last_token);
        report.transactions = transactions.len();
        report.changes = fold.changes;
        Ok(report)
    }

    async fn fold_change(&self, fold: &mut Fold<E>, change: &Change) -> Result<()> {
        let id = &change.id;
        match change.kind {
            ChangeType::Inserted => {
                if fold.snapshot.contains(id) {
                    return Ok(());
                }
                // Read as of now: later transactions may have changed or removed it.
                let Some(model) = self.context.fetch_model(id).await? else {
                    return Ok(());
                };
                if !self.descriptor.matches(&model) {
                    return Ok(());
                }
                if !self.make_room(fold, &model) {
                    return Ok(());
                }

                let section = section_name_for(&model, self.section_key_path());
                let position = self.sorted_position(fold, &section, &model);
                if let Some(path) = fold.snapshot.insert_item(id.clone(), &section, position) {
                    fold.objects.insert(id.clone(), model);
                    fold.changes.record_insert(id.clone(), path);
                }
            }
            ChangeType::Updated => {
                // Section membership is not re-derived; the item reloads in place.
                let Some(path) = fold.snapshot.reload_item(id) else {
                    return Ok(());
                };
                if let Some(model) = self.context.fetch_model(id).await? {
                    fold.objects.insert(id.clone(), model);
                }
                fold.changes.record_update(id.clone(), path);
            }
            ChangeType::Deleted => {
                if let Some(path) = fold.snapshot.delete_item(id) {
                    fold.objects.remove(id);
                    fold.changes.record_delete(id.clone(), path);
                }
            }
        }
        Ok(())
    }

    /// Keeps the visible set within the fetch limit. Returns `false` when
    /// `model` would land past the limit; otherwise evicts the item that
    /// sorts last if the set is already full.
    fn make_room(&self, fold: &mut Fold<E>, model: &E) -> bool {
        let Some(limit) = self.descriptor.fetch_limit() else {
            return true;
        };
        if fold.snapshot.number_of_items() < limit {
            return true;
        }
        let Some(tail) = self.limit_tail(fold) else {
            return false;
        };
        let sorts_before_tail = fold
            .objects
            .get(&tail)
            .is_some_and(|existing| self.descriptor.compare(model, existing) == CmpOrdering::Less);
        if !sorts_before_tail {
            return false;
        }
        if let Some(path) = fold.snapshot.delete_item(&tail) {
            fold.objects.remove(&tail);
            fold.changes.record_delete(tail, path);
        }
        true
    }

    /// Visible item that sorts last across all sections. Unsorted fetches
    /// treat the last item of the last section as the tail.
    fn limit_tail(&self, fold: &Fold<E>) -> Option<EntityId> {
        let mut tail: Option<(&EntityId, &E)> = None;
        for section in fold.snapshot.section_identifiers() {
            for id in fold.snapshot.item_identifiers(section).unwrap_or_default() {
                let Some(model) = fold.objects.get(id) else {
                    continue;
                };
                let replaces = tail.is_none_or(|(_, current)| {
                    self.descriptor.compare(model, current) != CmpOrdering::Less
                });
                if replaces {
                    tail = Some((id, model));
                }
            }
        }
        tail.map(|(id, _)| id.clone())
    }

    /// Position in `section` that keeps the descriptor's sort order; the end
    /// of the section when the fetch is unsorted.
    fn sorted_position(&self, fold: &Fold<E>, section: &str, model: &E) -> usize {
        let ids = fold.snapshot.item_identifiers(section).unwrap_or_default();
        if !self.descriptor.is_sorted() {
            return ids.len();
        }
        ids.iter()
            .position(|other| {
                fold.objects
                    .get(other)
                    .is_some_and(|existing| self.descriptor.compare(model, existing) == CmpOrdering::Less)
            })
            .unwrap_or(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FetchDescriptor, ModelStore};
    use crate::controller::FetchedResultsController;
    use crate::storage::{CheckpointTokenStore, MemoryTokenStore};
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct Tag {
        id: EntityId,
    }

    impl PersistentModel for Tag {
        fn persistent_id(&self) -> EntityId {
            self.id.clone()
        }

        fn value_for_key_path(&self, _key_path: &str) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn test_pass_after_controller_shutdown_is_abandoned() {
        let store = Arc::new(ModelStore::in_memory("Tags"));
        let tokens = Arc::new(MemoryTokenStore::new());
        let controller =
            FetchedResultsController::new(FetchDescriptor::new(), store.clone(), tokens.clone());
        store.insert(Tag { id: EntityId::new("t1") }).unwrap();
        store.save().unwrap();

        controller.shared.alive.store(false, Ordering::Release);
        let report = controller.replay_now().await.unwrap();

        assert!(report.abandoned);
        assert_eq!(report.new_token, None);
        assert!(report.changes.is_empty());
        assert!(controller.snapshot().is_empty());
        assert_eq!(tokens.read().await, None);
    }
}
