use crate::snapshot::{ObjectChange, SectionSnapshot};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Receives content-change callbacks from a controller.
///
/// Every method defaults to a no-op.
pub trait FetchedResultsDelegate: Send + Sync {
    fn controller_will_change_content(&self) {}

    fn controller_did_change_object(&self, _change: &ObjectChange) {}

    fn controller_did_change_content_with(&self, _snapshot: &SectionSnapshot) {}

    fn controller_did_change_content(&self) {}
}

/// Non-owning slot for at most one delegate.
#[derive(Default)]
pub(crate) struct DelegateSlot {
    delegate: RwLock<Option<Weak<dyn FetchedResultsDelegate>>>,
}

impl DelegateSlot {
    pub(crate) fn set(&self, delegate: Arc<dyn FetchedResultsDelegate>) {
        let mut slot = self.delegate.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::downgrade(&delegate));
    }

    pub(crate) fn clear(&self) {
        let mut slot = self.delegate.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    /// Live delegate, if one is registered and not yet dropped.
    pub(crate) fn get(&self) -> Option<Arc<dyn FetchedResultsDelegate>> {
        self.delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}
