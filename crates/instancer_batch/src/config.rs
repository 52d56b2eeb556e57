//! # Batch Configuration
//!
//! Tunables for batch construction, loaded once at startup from TOML:
//!
//! ```toml
//! index_overflow = "reject"
//! low_capacity_threshold = 4
//! max_instances_per_batch = 64
//! label = "crowd"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, BatchResult};

/// What to do when merged vertices no longer fit 16-bit indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOverflowPolicy {
    /// Promote the merged index buffer to 32-bit indices.
    #[default]
    Widen,
    /// Fail the build with `IndexRangeOverflow`.
    Reject,
}

/// Configuration for building batches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Policy when 16-bit indices cannot address the merged vertices.
    pub index_overflow: IndexOverflowPolicy,
    /// Capacities below this log a warning.
    pub low_capacity_threshold: usize,
    /// Optional hard cap on instances per batch, applied after the shader limit.
    pub max_instances_per_batch: Option<usize>,
    /// Prefix for buffer labels.
    pub label: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            index_overflow: IndexOverflowPolicy::Widen,
            low_capacity_threshold: 3,
            max_instances_per_batch: None,
            label: "instance_batch".to_owned(),
        }
    }
}

impl BatchConfig {
    /// Parses a config from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the text is not valid TOML for this struct.
    pub fn from_toml_str(text: &str) -> BatchResult<Self> {
        toml::from_str(text).map_err(|e| BatchError::InvalidConfig(e.to_string()))
    }

    /// Loads a config file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> BatchResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BatchError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
