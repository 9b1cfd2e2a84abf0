//! Compaction strategy selector (§4.3 added).
//!
//! The block families compact independently of one another; each carries
//! out its own size-tiered merge via [`crate::db::compaction`]. This module
//! only holds the config-level strategy selector — kept separate so
//! `EngineConfig` doesn't need to depend on `db` directly, and so a second
//! strategy family could be added here later without touching `db`.

/// Selects which compaction strategy family a database uses for its block
/// families. Only one family is implemented today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyType {
    /// Size-tiered merge-without-cancellation (see
    /// [`crate::db::compaction::bucket_blocks`]).
    Stcs,
}
