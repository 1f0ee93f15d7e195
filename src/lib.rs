// ============================================================================
// Fetched Results Library
// ============================================================================

pub mod core;
pub mod context;
pub mod controller;
pub mod snapshot;
pub mod storage;

// Re-export main types for convenience
pub use core::{
    Change, ChangeType, EntityId, FetchError, HistoryToken, IndexPath, PersistentModel, Result,
    Transaction,
};

pub use context::{
    FetchDescriptor, HistoryDescriptor, ModelStore, PersistenceContext, SaveNotification,
    SaveNotificationSource, SortDescriptor, SortOrder,
};

pub use controller::{
    ChangeEvents, ControllerConfig, ControllerStats, FetchedResultsController,
    FetchedResultsDelegate, ReplayReport,
};

pub use snapshot::{ChangeSet, DEFAULT_SECTION_NAME, ObjectChange, SectionInfo, SectionSnapshot};

pub use storage::{
    CheckpointTokenStore, FileTokenStore, MemoryTokenStore, StoreConfiguration, TokenEncoding,
    TokenLocation,
};
