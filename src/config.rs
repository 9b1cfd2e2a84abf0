//! Engine configuration, constructed once at startup and passed through
//! explicitly — the core never reads process globals (§9).

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::compaction::CompactionStrategyType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("buffer_dir and database_dir must be distinct: {0}")]
    BufferDatabaseSame(String),

    #[error("buffer_dir `{buffer}` and database_dir `{database}` must not be ancestors of one another")]
    DirectoryNesting { buffer: String, database: String },

    #[error(
        "default_environment `{0}` sanitizes to empty; the configured default must itself sanitize non-empty"
    )]
    InvalidDefaultEnvironment(String),
}

/// Strips every character outside `[A-Za-z0-9_]` from `input` (§6, §8
/// scenario 6).
///
/// ```
/// use juncturedb::config::sanitize;
/// assert_eq!(sanitize("$_%&test_@envir==--onment*_*"), "_test_environment_");
/// ```
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn is_ancestor(candidate: &Path, of: &Path) -> bool {
    of.starts_with(candidate)
}

/// Engine configuration: directory layout, default environment, durability
/// and compaction tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub buffer_dir: PathBuf,
    pub database_dir: PathBuf,
    pub default_environment: String,

    /// Bytes a write-buffer segment may grow to before it is rotated.
    pub buffer_segment_size: usize,

    /// Revisions a family's current block may hold before it is sealed.
    pub block_seal_threshold: usize,

    pub compaction_strategy: CompactionStrategyType,
    pub min_block_count_for_compaction: usize,

    /// How many writes `transport` drains from the buffer per invocation.
    pub transport_batch_size: usize,

    /// Interval between background transporter runs.
    pub transport_interval: std::time::Duration,
}

impl EngineConfig {
    /// Builds a config rooted at `root`, using `root/buffer` and
    /// `root/database` as the two (disjoint, by construction) directories.
    pub fn at_root(root: impl AsRef<Path>, default_environment: impl Into<String>) -> Self {
        let root = root.as_ref();
        Self {
            buffer_dir: root.join("buffer"),
            database_dir: root.join("database"),
            default_environment: default_environment.into(),
            buffer_segment_size: 8 * 1024 * 1024,
            block_seal_threshold: 4096,
            compaction_strategy: CompactionStrategyType::Stcs,
            min_block_count_for_compaction: 4,
            transport_batch_size: 1024,
            transport_interval: std::time::Duration::from_millis(50),
        }
    }

    /// Validates the directory layout and default environment (§6).
    ///
    /// Resolves the environment name by sanitizing `default_environment`;
    /// an empty sanitized result is only acceptable if it is *not* the
    /// fallback being resolved — per §8 scenario 8, `sanitize("")` must
    /// fall back to the configured default, which must itself sanitize
    /// non-empty or the Engine fails to start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_dir == self.database_dir {
            return Err(ConfigError::BufferDatabaseSame(
                self.buffer_dir.display().to_string(),
            ));
        }
        if is_ancestor(&self.buffer_dir, &self.database_dir)
            || is_ancestor(&self.database_dir, &self.buffer_dir)
        {
            return Err(ConfigError::DirectoryNesting {
                buffer: self.buffer_dir.display().to_string(),
                database: self.database_dir.display().to_string(),
            });
        }

        if sanitize(&self.default_environment).is_empty() {
            return Err(ConfigError::InvalidDefaultEnvironment(
                self.default_environment.clone(),
            ));
        }

        Ok(())
    }

    /// Resolves a requested environment name, falling back to
    /// `default_environment` (itself sanitized) when the requested name
    /// sanitizes to empty.
    pub fn resolve_environment(&self, requested: &str) -> String {
        let sanitized = sanitize(requested);
        if sanitized.is_empty() {
            sanitize(&self.default_environment)
        } else {
            sanitized
        }
    }
}
