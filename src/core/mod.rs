pub mod error;
pub mod types;

pub use error::{FetchError, Result};
pub use types::{
    Change, ChangeType, EntityId, HistoryToken, IndexPath, PersistentModel, Transaction,
};
