pub mod config;
pub mod token_store;

pub use config::{StoreConfiguration, TokenLocation};
pub use token_store::{CheckpointTokenStore, FileTokenStore, MemoryTokenStore, TokenEncoding};
