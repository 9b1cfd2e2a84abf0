//! The block-indexed Database (§3, §4.3): three immutable, block-sealed
//! families (primary `cpb`, secondary `csb`, search `ctb`) fronted by a
//! shared catalog and record cache.
//!
//! `Db` itself does not know about the write buffer — it only absorbs
//! already-versioned [`Revision`]s handed to it by the engine's background
//! transporter (§5) and answers point/predicate/token reads against what
//! it has durably accepted.

pub mod block;
pub mod cache;
pub mod catalog;
pub mod compaction;
pub mod family;
pub mod keys;

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::value::Value;
use crate::write::Write as Revision;

pub use block::BlockError;
pub use catalog::CatalogError;
pub use keys::Operator;

use cache::RecordCache;
use catalog::Catalog;
use family::{Family, FamilyKind};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("block error: {0}")]
    Block(#[from] BlockError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// The three block families plus the catalog/cache that front them.
pub struct Db {
    primary: Family,
    secondary: Family,
    search: Family,
    catalog: Catalog,
    cache: RecordCache,
}

impl Db {
    /// Opens (or creates) the database rooted at `dir`, recovers each
    /// family's sealed blocks, and reconciles them against the catalog so
    /// that any block id missing from one family is dropped from all three
    /// (§3: "a block id must exist in all three families or be dropped
    /// from all").
    pub fn open(dir: impl AsRef<Path>, block_seal_threshold: usize) -> Result<Self, DbError> {
        let dir = dir.as_ref();
        let primary = Family::open(dir, FamilyKind::Primary, block_seal_threshold)?;
        let secondary = Family::open(dir, FamilyKind::Secondary, block_seal_threshold)?;
        let search = Family::open(dir, FamilyKind::Search, block_seal_threshold)?;
        let catalog = Catalog::open(dir)?;

        let balanced = catalog.reconcile(&primary.sealed_ids(), &secondary.sealed_ids(), &search.sealed_ids())?;
        primary.discard_unbalanced(&balanced)?;
        secondary.discard_unbalanced(&balanced)?;
        search.discard_unbalanced(&balanced)?;

        info!(blocks = balanced.len(), "database opened");

        Ok(Db {
            primary,
            secondary,
            search,
            catalog,
            cache: RecordCache::new(),
        })
    }

    /// Absorbs one already-versioned revision into all three families
    /// (§4.3: "every accepted Write is appended to all three families").
    pub fn accept(&self, revision: Revision) -> Result<(), DbError> {
        let primary_key = keys::primary_key(revision.record, &revision.key, revision.version);
        let primary_group = keys::primary_prefix(revision.record, Some(&revision.key));
        if let Some(id) = self.primary.accept(primary_key, primary_group, revision.clone())? {
            self.catalog.record_sealed(FamilyKind::Primary, id)?;
        }

        let secondary_key = keys::secondary_keys_for(&revision);
        let secondary_group = keys::secondary_key_prefix(&revision.key);
        if let Some(id) = self.secondary.accept(secondary_key, secondary_group, revision.clone())? {
            self.catalog.record_sealed(FamilyKind::Secondary, id)?;
        }

        let tokens = revision.value.search_tokens();
        let search_keys = keys::search_keys_for(&revision);
        for (token, search_key) in tokens.into_iter().zip(search_keys) {
            let group = keys::search_key_token_prefix(&revision.key, &token);
            if let Some(id) = self.search.accept(search_key, group, revision.clone())? {
                self.catalog.record_sealed(FamilyKind::Search, id)?;
            }
        }

        self.catalog.record_newest_version(revision.version)?;
        self.cache.observe_accepted(&revision);
        Ok(())
    }

    /// All revisions of `key` on `record`, optionally restricted to
    /// versions at or before `as_of` (the Scenario for historical reads).
    pub fn select(&self, record: i64, key: &str, as_of: Option<u64>) -> Result<Vec<Revision>, DbError> {
        if as_of.is_none() {
            if let Some(cached) = self.cache.get_primary(record, key) {
                return Ok(cached);
            }
        }
        let prefix = keys::primary_prefix(record, Some(key));
        let cells = self.primary.scan_prefix(&prefix)?;
        let mut revisions: Vec<Revision> = cells
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| as_of.map(|ts| r.version <= ts).unwrap_or(true))
            .collect();
        revisions.sort_by_key(|r| r.version);
        if as_of.is_none() {
            self.cache.put_primary(record, key, revisions.clone());
        }
        Ok(revisions)
    }

    /// Revisions of `key` whose value satisfies `op` against `value`,
    /// across every record (§6 added predicate find).
    pub fn find(&self, key: &str, op: Operator, value: &Value, as_of: Option<u64>) -> Result<Vec<Revision>, DbError> {
        let prefix = keys::secondary_key_prefix(key);
        let cells = self.secondary.scan_prefix(&prefix)?;
        let mut out: Vec<Revision> = cells
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| as_of.map(|ts| r.version <= ts).unwrap_or(true))
            .filter(|r| op.matches(&r.value, value))
            .collect();
        out.sort_by_key(|r| r.version);
        Ok(out)
    }

    /// Revisions of `key` whose STRING value contains `token` (§6 added
    /// tokenized search).
    pub fn search(&self, key: &str, token: &str) -> Result<Vec<Revision>, DbError> {
        let lowered = token.to_lowercase();
        if let Some(cached) = self.cache.get_search(key, &lowered) {
            return Ok(cached);
        }
        let prefix = keys::search_key_token_prefix(key, &lowered);
        let cells = self.search.scan_prefix(&prefix)?;
        let mut out: Vec<Revision> = cells.into_iter().map(|(_, r)| r).collect();
        out.sort_by(|a, b| a.record.cmp(&b.record).then(a.version.cmp(&b.version)));
        self.cache.put_search(key, &lowered, out.clone());
        Ok(out)
    }

    /// Forces all three families to seal their current block, bypassing
    /// the size threshold (`triggerSync`, §4.3).
    pub fn trigger_sync(&self) -> Result<(), DbError> {
        if let Some(id) = self.primary.force_seal()? {
            self.catalog.record_sealed(FamilyKind::Primary, id)?;
        }
        if let Some(id) = self.secondary.force_seal()? {
            self.catalog.record_sealed(FamilyKind::Secondary, id)?;
        }
        if let Some(id) = self.search.force_seal()? {
            self.catalog.record_sealed(FamilyKind::Search, id)?;
        }
        Ok(())
    }

    /// One incremental compaction round per family (periodic, cheap).
    pub fn minor_compact(&self, min_block_size: u64, bucket_low: f64, bucket_high: f64) -> Result<(), DbError> {
        compaction::minor_compact(&self.primary, min_block_size, bucket_low, bucket_high)?;
        compaction::minor_compact(&self.secondary, min_block_size, bucket_low, bucket_high)?;
        compaction::minor_compact(&self.search, min_block_size, bucket_low, bucket_high)?;
        Ok(())
    }

    /// Collapses every sealed block in every family into one (rarely
    /// called; expensive, but preserves every revision — see
    /// [`compaction`]).
    pub fn major_compact(&self) -> Result<(), DbError> {
        compaction::major_compact(&self.primary)?;
        compaction::major_compact(&self.secondary)?;
        compaction::major_compact(&self.search)?;
        Ok(())
    }

    pub fn newest_version(&self) -> u64 {
        self.catalog.newest_version()
    }

    /// Invalidates every cache entry — used when a restart or reconcile
    /// leaves no guarantee the cache still reflects durable state.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Flushes the catalog's WAL into a fresh snapshot (`Engine::close`).
    pub fn stop(&self) -> Result<(), DbError> {
        self.trigger_sync()?;
        self.catalog.checkpoint()?;
        Ok(())
    }
}
