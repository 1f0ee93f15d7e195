//! Durable storage for the last processed history token.

use crate::core::{FetchError, HistoryToken, Result};
use crate::storage::config::{StoreConfiguration, TokenLocation};
use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{Level, event};

/// On-disk format of a token file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenEncoding {
    #[default]
    Json,
    /// `u32` little-endian length followed by a MessagePack body.
    MessagePack,
}

impl TokenEncoding {
    pub fn encode(&self, token: &HistoryToken) -> Result<Vec<u8>> {
        match self {
            TokenEncoding::Json => serde_json::to_vec(token)
                .map_err(|e| FetchError::Serialization(format!("Failed to encode token: {}", e))),
            TokenEncoding::MessagePack => {
                let body = rmp_serde::to_vec(token).map_err(|e| {
                    FetchError::Serialization(format!("Failed to encode token: {}", e))
                })?;
                let mut bytes = Vec::with_capacity(4 + body.len());
                bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
                bytes.extend_from_slice(&body);
                Ok(bytes)
            }
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<HistoryToken> {
        match self {
            TokenEncoding::Json => serde_json::from_slice(bytes)
                .map_err(|e| FetchError::Serialization(format!("Failed to decode token: {}", e))),
            TokenEncoding::MessagePack => {
                let (len_bytes, body) = bytes.split_at_checked(4).ok_or_else(|| {
                    FetchError::Serialization("Token file shorter than length prefix".to_string())
                })?;
                let mut prefix = [0u8; 4];
                prefix.copy_from_slice(len_bytes);
                let len = u32::from_le_bytes(prefix) as usize;
                if body.len() != len {
                    return Err(FetchError::Serialization(format!(
                        "Token length prefix {} does not match body length {}",
                        len,
                        body.len()
                    )));
                }
                rmp_serde::from_slice(body).map_err(|e| {
                    FetchError::Serialization(format!("Failed to decode token: {}", e))
                })
            }
        }
    }
}

/// Single-value store for the replay checkpoint.
#[async_trait]
pub trait CheckpointTokenStore: Send + Sync {
    /// Last durably written token. Missing or unreadable tokens read as `None`.
    async fn read(&self) -> Option<HistoryToken>;

    /// Persists `token`, replacing any previous value.
    async fn write(&self, token: HistoryToken) -> Result<()>;
}

/// Token store backed by one file per store configuration.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    location: TokenLocation,
    encoding: TokenEncoding,
}

impl FileTokenStore {
    pub fn new(location: TokenLocation) -> Self {
        Self {
            location,
            encoding: TokenEncoding::default(),
        }
    }

    /// Opens the token store of the durable configuration matching `schema`.
    pub fn for_configurations(configurations: &[StoreConfiguration], schema: &str) -> Result<Self> {
        let configuration = StoreConfiguration::select(configurations, schema)?;
        Ok(Self::new(configuration.token_location()))
    }

    pub fn with_encoding(mut self, encoding: TokenEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn path(&self) -> PathBuf {
        self.location.path()
    }

    pub fn encoding(&self) -> TokenEncoding {
        self.encoding
    }

    /// Removes the token file so the next replay starts from the beginning.
    pub async fn reset(&self) -> Result<()> {
        match tokio::fs::remove_file(self.path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FetchError::IoError(format!("Failed to remove token file: {}", e))),
        }
    }
}

#[async_trait]
impl CheckpointTokenStore for FileTokenStore {
    async fn read(&self) -> Option<HistoryToken> {
        let path = self.path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                event!(Level::WARN, path = %path.display(), error = %e, "history token unreadable");
                return None;
            }
        };

        match self.encoding.decode(&bytes) {
            Ok(token) => Some(token),
            Err(err) => {
                event!(Level::WARN, path = %path.display(), error = %err, "history token corrupt");
                None
            }
        }
    }

    async fn write(&self, token: HistoryToken) -> Result<()> {
        let bytes = self.encoding.encode(&token)?;
        let directory = self.location.directory().to_path_buf();
        let path = self.path();

        tokio::task::spawn_blocking(move || write_atomically(&directory, &path, &bytes))
            .await
            .map_err(|e| FetchError::IoError(format!("token writer join: {}", e)))?
    }
}

fn write_atomically(directory: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(directory).map_err(|e| {
        FetchError::IoError(format!("Failed to create token directory: {}", e))
    })?;
    let mut temp = tempfile::NamedTempFile::new_in(directory)
        .map_err(|e| FetchError::IoError(format!("Failed to create temp file: {}", e)))?;
    temp.write_all(bytes)
        .map_err(|e| FetchError::IoError(format!("Failed to write token: {}", e)))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| FetchError::IoError(format!("Failed to sync token: {}", e)))?;
    temp.persist(path)
        .map_err(|e| FetchError::IoError(format!("Failed to rename token file: {}", e.error)))?;
    Ok(())
}

/// Token store that keeps the checkpoint in memory only.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<HistoryToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: HistoryToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

#[async_trait]
impl CheckpointTokenStore for MemoryTokenStore {
    async fn read(&self) -> Option<HistoryToken> {
        match self.token.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    async fn write(&self, token: HistoryToken) -> Result<()> {
        let mut guard = self.token.lock()?;
        *guard = Some(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> FileTokenStore {
        FileTokenStore::new(TokenLocation::new(dir.path(), "Main"))
    }

    #[tokio::test]
    async fn test_missing_token_reads_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store_in(&dir).read().await, None);
    }

    #[tokio::test]
    async fn test_write_creates_history_directory() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.write(HistoryToken::new(7)).await.unwrap();
        assert!(dir.path().join("History").join("Main.token").exists());
        assert_eq!(store.read().await, Some(HistoryToken::new(7)));
    }

    #[tokio::test]
    async fn test_write_overwrites_previous_token() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.write(HistoryToken::new(3)).await.unwrap();
        store.write(HistoryToken::new(9)).await.unwrap();
        assert_eq!(store.read().await, Some(HistoryToken::new(9)));
    }

    #[tokio::test]
    async fn test_corrupt_token_reads_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(dir.path().join("History")).unwrap();
        std::fs::write(store.path(), b"{not json").unwrap();
        assert_eq!(store.read().await, None);
    }

    #[tokio::test]
    async fn test_message_pack_encoding() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).with_encoding(TokenEncoding::MessagePack);
        store.write(HistoryToken::new(42)).await.unwrap();
        assert_eq!(store.read().await, Some(HistoryToken::new(42)));

        let json_reader = store_in(&dir);
        assert_eq!(json_reader.read().await, None);
    }

    #[test]
    fn test_truncated_message_pack_is_rejected() {
        let mut bytes = TokenEncoding::MessagePack.encode(&HistoryToken::new(5)).unwrap();
        bytes.pop();
        assert!(TokenEncoding::MessagePack.decode(&bytes).is_err());
        assert!(TokenEncoding::MessagePack.decode(&[1, 0]).is_err());
    }

    #[tokio::test]
    async fn test_reset_removes_token() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.reset().await.unwrap();
        store.write(HistoryToken::new(1)).await.unwrap();
        store.reset().await.unwrap();
        assert_eq!(store.read().await, None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::with_token(HistoryToken::new(2));
        tokio_test::block_on(async {
            assert_eq!(store.read().await, Some(HistoryToken::new(2)));
            store.write(HistoryToken::new(4)).await.unwrap();
            assert_eq!(store.read().await, Some(HistoryToken::new(4)));
        });
    }
}
