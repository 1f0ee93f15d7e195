use crate::core::{FetchError, Result};
use std::path::{Path, PathBuf};

/// Directory, next to the store file, that holds history checkpoint tokens.
pub const HISTORY_DIRECTORY_NAME: &str = "History";

/// Extension used for checkpoint token files.
pub const TOKEN_FILE_EXTENSION: &str = "token";

/// Description of one persistent store inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfiguration {
    /// Configuration name, unique within a container.
    pub name: String,

    /// Schema the store was opened with.
    pub schema: String,

    /// Location of the store file.
    pub url: PathBuf,

    /// In-memory stores have no durable location and cannot host a token file.
    pub stored_in_memory_only: bool,
}

impl StoreConfiguration {
    pub fn new(name: impl Into<String>, schema: impl Into<String>, url: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            url: url.into(),
            stored_in_memory_only: false,
        }
    }

    pub fn in_memory(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            url: PathBuf::from("/dev/null"),
            stored_in_memory_only: true,
        }
    }

    /// Directory containing the store file.
    pub fn storage_directory(&self) -> &Path {
        self.url.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Location of this configuration's checkpoint token file.
    pub fn token_location(&self) -> TokenLocation {
        TokenLocation::new(self.storage_directory(), &self.name)
    }

    /// Picks the durable configuration matching `schema`.
    pub fn select<'a>(
        configurations: &'a [StoreConfiguration],
        schema: &str,
    ) -> Result<&'a StoreConfiguration> {
        configurations
            .iter()
            .find(|config| config.schema == schema && !config.stored_in_memory_only)
            .ok_or_else(|| FetchError::ConfigurationNotFound(schema.to_string()))
    }
}

/// Where a configuration's checkpoint token lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLocation {
    directory: PathBuf,
    file_name: String,
}

impl TokenLocation {
    pub fn new(storage_directory: impl AsRef<Path>, configuration_name: &str) -> Self {
        Self {
            directory: storage_directory.as_ref().join(HISTORY_DIRECTORY_NAME),
            file_name: format!(
                "{}.{}",
                sanitize_file_stem(configuration_name),
                TOKEN_FILE_EXTENSION
            ),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

fn sanitize_file_stem(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            sanitized.push(ch);
        } else {
            sanitized.push('_');
        }
    }

    if sanitized.is_empty() {
        "default".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_location_is_derived_from_configuration() {
        let config = StoreConfiguration::new("Main", "People", "/data/app/main.store");
        let location = config.token_location();
        assert_eq!(location.directory(), Path::new("/data/app/History"));
        assert_eq!(location.path(), PathBuf::from("/data/app/History/Main.token"));
    }

    #[test]
    fn test_configurations_do_not_collide() {
        let a = StoreConfiguration::new("Main", "People", "/data/app/main.store");
        let b = StoreConfiguration::new("Cloud", "People", "/data/app/cloud.store");
        assert_ne!(a.token_location().path(), b.token_location().path());
    }

    #[test]
    fn test_configuration_names_are_sanitized() {
        let location = TokenLocation::new("/tmp", "team/a b");
        assert_eq!(location.path(), PathBuf::from("/tmp/History/team_a_b.token"));
    }

    #[test]
    fn test_select_skips_in_memory_configurations() {
        let configs = vec![
            StoreConfiguration::in_memory("Scratch", "People"),
            StoreConfiguration::new("Main", "People", "/data/main.store"),
        ];
        let selected = StoreConfiguration::select(&configs, "People").unwrap();
        assert_eq!(selected.name, "Main");
    }

    #[test]
    fn test_select_missing_configuration() {
        let configs = vec![StoreConfiguration::in_memory("Scratch", "People")];
        let err = StoreConfiguration::select(&configs, "People").unwrap_err();
        assert!(matches!(err, FetchError::ConfigurationNotFound(schema) if schema == "People"));
    }
}
