//! The database catalog: which block ids exist in which family, and the
//! newest version durably transported into the DB (§4.3 added: "a single
//! catalog ... tracks which block ids exist in which families").
//!
//! Persisted as a small WAL of catalog events plus a periodic snapshot,
//! atomically renamed into place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{info, warn};

use crate::encoding::{self, EncodingError};
use crate::wal::{Wal, WalError};

const SNAPSHOT_FILENAME: &str = "CATALOG-000001";
const SNAPSHOT_TMP_SUFFIX: &str = ".tmp";
const WAL_FILENAME: &str = "catalog.wal";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("catalog snapshot checksum mismatch")]
    SnapshotChecksumMismatch,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CatalogData {
    primary_blocks: Vec<u64>,
    secondary_blocks: Vec<u64>,
    search_blocks: Vec<u64>,
    newest_version: u64,
}

impl encoding::Encode for CatalogData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::encode_vec(&self.primary_blocks, buf)?;
        encoding::encode_vec(&self.secondary_blocks, buf)?;
        encoding::encode_vec(&self.search_blocks, buf)?;
        self.newest_version.encode_to(buf)
    }
}

impl encoding::Decode for CatalogData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (primary_blocks, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
        offset += n;
        let (secondary_blocks, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
        offset += n;
        let (search_blocks, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
        offset += n;
        let (newest_version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                primary_blocks,
                secondary_blocks,
                search_blocks,
                newest_version,
            },
            offset,
        ))
    }
}

#[derive(Debug)]
enum CatalogEvent {
    SealPrimary(u64),
    SealSecondary(u64),
    SealSearch(u64),
    DropBlocks { primary: Vec<u64>, secondary: Vec<u64>, search: Vec<u64> },
    NewestVersion(u64),
}

impl encoding::Encode for CatalogEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            CatalogEvent::SealPrimary(id) => {
                0u32.encode_to(buf)?;
                id.encode_to(buf)
            }
            CatalogEvent::SealSecondary(id) => {
                1u32.encode_to(buf)?;
                id.encode_to(buf)
            }
            CatalogEvent::SealSearch(id) => {
                2u32.encode_to(buf)?;
                id.encode_to(buf)
            }
            CatalogEvent::DropBlocks { primary, secondary, search } => {
                3u32.encode_to(buf)?;
                encoding::encode_vec(primary, buf)?;
                encoding::encode_vec(secondary, buf)?;
                encoding::encode_vec(search, buf)
            }
            CatalogEvent::NewestVersion(v) => {
                4u32.encode_to(buf)?;
                v.encode_to(buf)
            }
        }
    }
}

impl encoding::Decode for CatalogEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u32::decode_from(buf)?;
        match tag {
            0 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                Ok((CatalogEvent::SealPrimary(id), offset + n))
            }
            1 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                Ok((CatalogEvent::SealSecondary(id), offset + n))
            }
            2 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                Ok((CatalogEvent::SealSearch(id), offset + n))
            }
            3 => {
                let (primary, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                let (secondary, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                let (search, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::DropBlocks { primary, secondary, search }, offset))
            }
            4 => {
                let (v, n) = u64::decode_from(&buf[offset..])?;
                Ok((CatalogEvent::NewestVersion(v), offset + n))
            }
            other => Err(EncodingError::InvalidTag { tag: other, type_name: "CatalogEvent" }),
        }
    }
}

/// Tracks block-family balance (§3 invariant) and the newest version the
/// DB has durably absorbed, so the write buffer knows what it may truncate.
pub struct Catalog {
    dir: PathBuf,
    wal: Wal<CatalogEvent>,
    data: Mutex<CatalogData>,
}

impl Catalog {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = root.as_ref().join("catalog");
        fs::create_dir_all(&dir)?;

        let snapshot_path = dir.join(SNAPSHOT_FILENAME);
        let mut data = CatalogData::default();
        if snapshot_path.exists() {
            match Self::read_snapshot(&snapshot_path) {
                Ok(snap) => data = snap,
                Err(e) => {
                    warn!("catalog snapshot unreadable ({e}); replaying WAL from scratch");
                }
            }
        }

        let wal = Wal::<CatalogEvent>::open(dir.join(WAL_FILENAME), None)?;
        for event in wal.replay_iter()? {
            let event = event?;
            apply(&mut data, event);
        }

        info!(primary = data.primary_blocks.len(), secondary = data.secondary_blocks.len(), search = data.search_blocks.len(), "catalog opened");

        Ok(Catalog { dir, wal, data: Mutex::new(data) })
    }

    fn read_snapshot(path: &Path) -> Result<CatalogData, CatalogError> {
        let bytes = fs::read(path)?;
        if bytes.len() < 4 {
            return Err(CatalogError::SnapshotChecksumMismatch);
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        let mut crc = crc32fast::Hasher::new();
        crc.update(body);
        if crc.finalize() != expected {
            return Err(CatalogError::SnapshotChecksumMismatch);
        }
        let (data, _) = CatalogData::decode_from(body)?;
        Ok(data)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CatalogData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_sealed(&self, kind: super::family::FamilyKind, id: u64) -> Result<(), CatalogError> {
        use super::family::FamilyKind::*;
        let event = match kind {
            Primary => CatalogEvent::SealPrimary(id),
            Secondary => CatalogEvent::SealSecondary(id),
            Search => CatalogEvent::SealSearch(id),
        };
        self.wal.append(&event)?;
        apply(&mut self.lock(), event);
        Ok(())
    }

    pub fn record_newest_version(&self, version: u64) -> Result<(), CatalogError> {
        let mut data = self.lock();
        if version <= data.newest_version {
            return Ok(());
        }
        drop(data);
        let event = CatalogEvent::NewestVersion(version);
        self.wal.append(&event)?;
        apply(&mut self.lock(), event);
        Ok(())
    }

    pub fn newest_version(&self) -> u64 {
        self.lock().newest_version
    }

    /// Block ids present in all three families; drops (and records the
    /// drop of) anything unbalanced. Returns the balanced id set.
    pub fn reconcile(
        &self,
        primary_on_disk: &[u64],
        secondary_on_disk: &[u64],
        search_on_disk: &[u64],
    ) -> Result<std::collections::HashSet<u64>, CatalogError> {
        use std::collections::HashSet;
        let p: HashSet<u64> = primary_on_disk.iter().copied().collect();
        let s: HashSet<u64> = secondary_on_disk.iter().copied().collect();
        let t: HashSet<u64> = search_on_disk.iter().copied().collect();
        let balanced: HashSet<u64> = p.intersection(&s).copied().collect::<HashSet<_>>().intersection(&t).copied().collect();

        let drop_p: Vec<u64> = p.difference(&balanced).copied().collect();
        let drop_s: Vec<u64> = s.difference(&balanced).copied().collect();
        let drop_t: Vec<u64> = t.difference(&balanced).copied().collect();

        if !drop_p.is_empty() || !drop_s.is_empty() || !drop_t.is_empty() {
            warn!(?drop_p, ?drop_s, ?drop_t, "discarding unbalanced blocks on startup");
            let event = CatalogEvent::DropBlocks { primary: drop_p, secondary: drop_s, search: drop_t };
            self.wal.append(&event)?;
            apply(&mut self.lock(), event);
        }

        let mut data = self.lock();
        data.primary_blocks.retain(|id| balanced.contains(id));
        data.secondary_blocks.retain(|id| balanced.contains(id));
        data.search_blocks.retain(|id| balanced.contains(id));

        Ok(balanced)
    }

    /// Compacts the WAL into a fresh snapshot (called from `Db::stop`).
    pub fn checkpoint(&self) -> Result<(), CatalogError> {
        let data = self.lock().clone();
        let mut body = Vec::new();
        data.encode_to(&mut body)?;
        let mut crc = crc32fast::Hasher::new();
        crc.update(&body);
        body.extend_from_slice(&crc.finalize().to_le_bytes());

        let tmp = self.dir.join(format!("{SNAPSHOT_FILENAME}{SNAPSHOT_TMP_SUFFIX}"));
        fs::write(&tmp, &body)?;
        fs::rename(&tmp, self.dir.join(SNAPSHOT_FILENAME))?;
        Ok(())
    }
}

fn apply(data: &mut CatalogData, event: CatalogEvent) {
    match event {
        CatalogEvent::SealPrimary(id) => data.primary_blocks.push(id),
        CatalogEvent::SealSecondary(id) => data.secondary_blocks.push(id),
        CatalogEvent::SealSearch(id) => data.search_blocks.push(id),
        CatalogEvent::DropBlocks { primary, secondary, search } => {
            data.primary_blocks.retain(|id| !primary.contains(id));
            data.secondary_blocks.retain(|id| !secondary.contains(id));
            data.search_blocks.retain(|id| !search.contains(id));
        }
        CatalogEvent::NewestVersion(v) => data.newest_version = data.newest_version.max(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reconcile_drops_unbalanced_block_ids() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let balanced = catalog.reconcile(&[1, 2], &[1], &[1, 2]).unwrap();
        assert_eq!(balanced, [1].into_iter().collect());
    }

    #[test]
    fn newest_version_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let catalog = Catalog::open(dir.path()).unwrap();
            catalog.record_newest_version(42).unwrap();
        }
        let catalog = Catalog::open(dir.path()).unwrap();
        assert_eq!(catalog.newest_version(), 42);
    }
}
