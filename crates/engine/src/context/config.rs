//! Engine configuration via `cfgd.toml`
//!
//! A default `cfgd.toml` can be written next to the store on first start.
//! To change settings, edit the file and restart.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cfgd_concurrency::{DiffOptions, LockPolicy};
use cfgd_core::{CfgdError, CfgdResult, TreeStore};
use cfgd_storage::{FileTreeStore, MemoryTreeStore};

/// Config file name placed in the engine's state directory.
pub const CONFIG_FILE_NAME: &str = "cfgd.toml";

/// Where the named trees are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process memory; nothing survives a restart
    Memory,
    /// One JSON document per tree under a directory
    File(PathBuf),
}

/// `[store]` section of `cfgd.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// `"memory"` (default) or `"file"`
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Directory for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_backend() -> String {
    "memory".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// Parse the backend selection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unknown backend, or for the file
    /// backend without a path.
    pub fn backend(&self) -> CfgdResult<StoreBackend> {
        match self.backend.as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "file" => match &self.path {
                Some(path) => Ok(StoreBackend::File(path.clone())),
                None => Err(CfgdError::InvalidConfig(
                    "store backend \"file\" requires [store] path".to_string(),
                )),
            },
            other => Err(CfgdError::InvalidConfig(format!(
                "Invalid store backend '{}' in cfgd.toml. Expected \"memory\" or \"file\".",
                other
            ))),
        }
    }
}

/// Engine configuration loaded from `cfgd.toml`.
///
/// # Example
///
/// ```toml
/// lock_wait_ms = 500
/// rebase_on_commit = true
///
/// [store]
/// backend = "file"
/// path = "/var/lib/cfgd"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// `0`: lock fails at once when held. Otherwise wait up to this many ms.
    #[serde(default)]
    pub lock_wait_ms: u64,
    /// validate/commit require the caller to hold the candidate lock.
    #[serde(default = "default_true")]
    pub require_lock: bool,
    /// Release the session's candidate lock after a successful commit.
    #[serde(default)]
    pub release_lock_on_commit: bool,
    /// Release the session's candidate lock after a failed commit.
    #[serde(default)]
    pub release_lock_on_failure: bool,
    /// Report pure reorderings of `ordered-by user` entries.
    #[serde(default = "default_true")]
    pub ordered_by_user_moves: bool,
    /// Rebase the candidate onto running at commit when running moved on.
    #[serde(default)]
    pub rebase_on_commit: bool,
    /// Copy running into startup after every successful commit.
    #[serde(default)]
    pub persist_startup: bool,
    /// Tree store selection.
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: 0,
            require_lock: true,
            release_lock_on_commit: false,
            release_lock_on_failure: false,
            ordered_by_user_moves: true,
            rebase_on_commit: false,
            persist_startup: false,
            store: StoreConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Lock acquisition policy for `lock`.
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy::from_wait_ms(self.lock_wait_ms)
    }

    /// How long `lock` may block.
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    /// Diff policy used for every transaction.
    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            ordered_by_user_moves: self.ordered_by_user_moves,
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the store section is invalid.
    pub fn validate(&self) -> CfgdResult<()> {
        self.store.backend().map(|_| ())
    }

    /// Open the configured tree store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad store section, or the store's
    /// error if the directory cannot be opened.
    pub fn open_store(&self) -> CfgdResult<Arc<dyn TreeStore>> {
        Ok(match self.store.backend()? {
            StoreBackend::Memory => Arc::new(MemoryTreeStore::new()),
            StoreBackend::File(dir) => Arc::new(FileTreeStore::open(dir)?),
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# cfgd engine configuration
#
# Lock wait in milliseconds (default: 0)
#   0  = lock fails immediately when another session holds it
#   >0 = lock blocks up to this long, then fails with a timeout
lock_wait_ms = 0

# Require the candidate lock for validate/commit (default: true)
# When false, an unlocked candidate is locked for the duration of the run.
require_lock = true

# Release the session's candidate lock after commit (default: false)
release_lock_on_commit = false
release_lock_on_failure = false

# Report reordering of ordered-by user entries as changes (default: true)
ordered_by_user_moves = true

# Rebase the candidate onto running at commit time when running has
# changed since the candidate was reset (default: false)
rebase_on_commit = false

# Copy running into startup after each successful commit (default: false)
persist_startup = false

[store]
# "memory" (default) or "file"
backend = "memory"
# path = "/var/lib/cfgd"
"#
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the text cannot be parsed or fails validation.
    pub fn from_toml_str(content: &str) -> CfgdResult<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| CfgdError::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> CfgdResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CfgdError::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            CfgdError::InvalidConfig(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> CfgdResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                CfgdError::internal(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> CfgdResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CfgdError::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            CfgdError::internal(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
