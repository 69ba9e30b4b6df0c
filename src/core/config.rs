use crate::core::common::OxibaseError;
use crate::core::storage::pf::ReplacementPolicy;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Tunable settings for the storage layer.
///
/// Supports loading from a TOML file and provides sensible defaults;
/// a missing file yields the default configuration. Buffer capacity is
/// fixed once a manager is constructed from the config; the replacement
/// policy may still be changed at runtime.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of frames in the buffer pool.
    /// Default: 40
    #[serde(default = "default_buffer_pool_frames")]
    pub buffer_pool_frames: usize,

    /// Which unpinned page to evict when the pool is full: "lru" or
    /// "mru".
    /// Default: "lru"
    #[serde(default = "default_replacement_policy")]
    pub replacement_policy: ReplacementPolicy,
}

fn default_buffer_pool_frames() -> usize {
    40
}
fn default_replacement_policy() -> ReplacementPolicy {
    ReplacementPolicy::Lru
}

impl Default for Config {
    fn default() -> Self {
        Config {
            buffer_pool_frames: default_buffer_pool_frames(),
            replacement_policy: default_replacement_policy(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// If the specified file does not exist, default configuration
    /// values are returned.
    ///
    /// # Errors
    ///
    /// Returns `OxibaseError::Configuration` if the file cannot be
    /// parsed, `OxibaseError::Io` if it cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, OxibaseError> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                OxibaseError::Configuration(format!(
                    "failed to parse config file '{}': {e}",
                    path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(OxibaseError::Io(e)),
        }
    }

    /// Loads configuration from an optional TOML file path; `None` (or a
    /// missing file) yields the defaults.
    pub fn load_or_default(optional_path: Option<&Path>) -> Result<Self, OxibaseError> {
        match optional_path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Config::default()),
        }
    }
}
