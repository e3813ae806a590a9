//! Context-level configuration.
//!
//! A small TOML-loadable description of where a data context lives:
//! the root folder data-set paths resolve against, an optional default
//! format for extensionless sources, and the lock directory plus lease
//! duration for the editor-coordination lock service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DataFormat;
use crate::error::{DataError, DataResult};
use crate::lock::LockService;

/// Folder name used for leases when no lock directory is configured.
const DEFAULT_LOCK_DIR: &str = ".locks";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Root folder all data-set paths resolve against.
    pub root: PathBuf,

    /// Format for sources whose extension the codec layer does not
    /// recognize. Unset means extension inference is mandatory.
    pub default_format: Option<DataFormat>,

    /// Folder holding lock leases. Relative paths resolve against
    /// `root`; defaults to `<root>/.locks`.
    pub lock_dir: Option<PathBuf>,

    /// Lease duration for the lock service, in seconds.
    pub lease_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            default_format: None,
            lock_dir: None,
            lease_secs: 300,
        }
    }
}

impl ContextConfig {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(source_id: &str, text: &str) -> DataResult<Self> {
        toml::from_str(text).map_err(|e| DataError::from_toml_de(source_id, e))
    }

    /// Load a configuration file.
    pub async fn load(path: &Path) -> DataResult<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&path.display().to_string(), &text)
    }

    /// Resolved lock directory.
    pub fn lock_dir(&self) -> PathBuf {
        match &self.lock_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.root.join(dir),
            None => self.root.join(DEFAULT_LOCK_DIR),
        }
    }

    /// Lease duration as a [`Duration`].
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Build the lock service this configuration describes.
    pub fn lock_service(&self) -> LockService {
        LockService::new(self.lock_dir()).with_default_lease(self.lease())
    }

    /// Start a context builder rooted and defaulted per this
    /// configuration.
    pub fn context_builder(&self) -> crate::context::DataContextBuilder {
        let mut builder = crate::context::DataContextBuilder::new(&self.root);
        if let Some(format) = self.default_format {
            builder = builder.default_format(format);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.root, PathBuf::from("."));
        assert_eq!(config.lease_secs, 300);
        assert_eq!(config.lock_dir(), PathBuf::from("./.locks"));
    }

    #[test]
    fn test_parse_toml() {
        let text = "root = \"data\"\ndefault_format = \"yaml\"\nlease_secs = 60\n";
        let config = ContextConfig::from_toml_str("tabula.toml", text).unwrap();
        assert_eq!(config.root, PathBuf::from("data"));
        assert_eq!(config.default_format, Some(DataFormat::Yaml));
        assert_eq!(config.lease(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ContextConfig::from_toml_str("tabula.toml", "root = \"data\"\n").unwrap();
        assert_eq!(config.lease_secs, 300);
        assert_eq!(config.default_format, None);
    }

    #[test]
    fn test_malformed_toml_is_format_error() {
        let err = ContextConfig::from_toml_str("tabula.toml", "root = [").unwrap_err();
        assert!(err.to_string().contains("tabula.toml"));
    }

    #[test]
    fn test_lock_dir_resolution() {
        let mut config = ContextConfig::new("data");
        assert_eq!(config.lock_dir(), PathBuf::from("data/.locks"));

        config.lock_dir = Some(PathBuf::from("leases"));
        assert_eq!(config.lock_dir(), PathBuf::from("data/leases"));

        config.lock_dir = Some(PathBuf::from("/var/leases"));
        assert_eq!(config.lock_dir(), PathBuf::from("/var/leases"));
    }
}
