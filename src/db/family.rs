//! A single block family: sealed blocks plus one current, in-memory,
//! appendable block (§4.3).
//!
//! The "current" block is not itself separately durable — durability for
//! its contents is provided by the write buffer until the block is sealed
//! (fsync'd to disk). `Engine::transport` only truncates the buffer prefix
//! once the corresponding writes have reached a *sealed* block in every
//! family, so a crash before sealing simply replays from the buffer.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use crate::write::Write as Revision;

use super::block::{self, Block, BlockError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FamilyKind {
    Primary,
    Secondary,
    Search,
}

impl FamilyKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            FamilyKind::Primary => "cpb",
            FamilyKind::Secondary => "csb",
            FamilyKind::Search => "ctb",
        }
    }
}

struct CurrentBlock {
    cells: Vec<(Vec<u8>, Revision)>,
    group_keys: Vec<Vec<u8>>,
}

impl CurrentBlock {
    fn new() -> Self {
        Self {
            cells: Vec::new(),
            group_keys: Vec::new(),
        }
    }
}

/// One block family: a sorted, sealed block list plus a current buffer.
pub struct Family {
    pub kind: FamilyKind,
    dir: PathBuf,
    seal_threshold: usize,
    sealed: RwLock<Vec<Arc<Block>>>,
    current: Mutex<CurrentBlock>,
    next_block_id: Mutex<u64>,
}

impl Family {
    pub fn open(root: &Path, kind: FamilyKind, seal_threshold: usize) -> Result<Self, BlockError> {
        let dir = root.join(kind.dir_name());
        std::fs::create_dir_all(&dir)?;

        let mut sealed = Vec::new();
        let mut max_id = 0u64;
        if dir.exists() {
            let mut entries: Vec<_> = std::fs::read_dir(&dir)?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().map(|ext| ext == "blk").unwrap_or(false))
                .collect();
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let stem = entry.path().file_stem().and_then(|s| s.to_str()).unwrap_or("0").to_string();
                if let Ok(id) = stem.parse::<u64>() {
                    if let Ok(block) = Block::open(entry.path(), id) {
                        max_id = max_id.max(id);
                        sealed.push(Arc::new(block));
                    }
                }
            }
        }

        Ok(Family {
            kind,
            dir,
            seal_threshold,
            sealed: RwLock::new(sealed),
            current: Mutex::new(CurrentBlock::new()),
            next_block_id: Mutex::new(max_id + 1),
        })
    }

    /// Block ids currently sealed, for balance-checking across families.
    pub fn sealed_ids(&self) -> Vec<u64> {
        self.sealed.read().unwrap().iter().map(|b| b.id).collect()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocates a fresh block id (used by compaction to name its merged
    /// output without colliding with a concurrently sealing current block).
    pub fn reserve_block_id(&self) -> u64 {
        let mut guard = self.next_block_id.lock().unwrap();
        let id = *guard;
        *guard += 1;
        id
    }

    /// Drops sealed blocks whose id is not in `keep` (§3: unbalanced blocks
    /// are discarded on startup).
    pub fn discard_unbalanced(&self, keep: &std::collections::HashSet<u64>) -> io::Result<()> {
        let mut sealed = self.sealed.write().unwrap();
        let (keep_blocks, drop_blocks): (Vec<_>, Vec<_>) = sealed.drain(..).partition(|b| keep.contains(&b.id));
        for block in &drop_blocks {
            info!(family = ?self.kind, block_id = block.id, "dropping unbalanced block");
            let _ = std::fs::remove_file(block.path());
        }
        *sealed = keep_blocks;
        Ok(())
    }

    /// Appends one `(composite_key, revision)` cell plus its group key (for
    /// the bloom filter) to the current block, sealing if the threshold is
    /// exceeded. Returns `Some(new_block_id)` if a seal happened.
    pub fn accept(&self, composite_key: Vec<u8>, group_key: Vec<u8>, revision: Revision) -> Result<Option<u64>, BlockError> {
        let mut current = self.current.lock().unwrap();
        current.cells.push((composite_key, revision));
        current.group_keys.push(group_key);

        if current.cells.len() >= self.seal_threshold {
            let id = self.seal_locked(&mut current)?;
            return Ok(Some(id));
        }
        Ok(None)
    }

    /// Forces a seal of the current block regardless of threshold
    /// (`triggerSync`). No-op if the current block is empty.
    pub fn force_seal(&self) -> Result<Option<u64>, BlockError> {
        let mut current = self.current.lock().unwrap();
        if current.cells.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.seal_locked(&mut current)?))
    }

    fn seal_locked(&self, current: &mut CurrentBlock) -> Result<u64, BlockError> {
        current.cells.sort_by(|a, b| a.0.cmp(&b.0));
        let mut id_guard = self.next_block_id.lock().unwrap();
        let id = *id_guard;
        *id_guard += 1;
        drop(id_guard);

        let block = block::build(&self.dir, id, &current.group_keys, &current.cells)?;
        debug!(family = ?self.kind, block_id = id, cells = block.len, "sealed block");
        self.sealed.write().unwrap().push(Arc::new(block));
        current.cells.clear();
        current.group_keys.clear();
        Ok(id)
    }

    /// All cells (sealed blocks, oldest-first, then the current block)
    /// whose key starts with `prefix`, in ascending key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Revision)>, BlockError> {
        let mut out = Vec::new();
        for block in self.sealed.read().unwrap().iter() {
            out.extend(block.scan_prefix(prefix)?);
        }
        let current = self.current.lock().unwrap();
        for (key, revision) in &current.cells {
            if key.starts_with(prefix) {
                out.push((key.clone(), revision.clone()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    pub fn sealed_block_count(&self) -> usize {
        self.sealed.read().unwrap().len()
    }

    pub fn sealed_blocks(&self) -> Vec<Arc<Block>> {
        self.sealed.read().unwrap().clone()
    }

    /// Replaces `old` sealed blocks with `new_block` (a compaction result).
    pub fn replace_blocks(&self, old_ids: &[u64], new_block: Option<Block>) {
        let mut sealed = self.sealed.write().unwrap();
        let old_blocks: Vec<Arc<Block>> = sealed
            .iter()
            .filter(|b| old_ids.contains(&b.id))
            .cloned()
            .collect();
        sealed.retain(|b| !old_ids.contains(&b.id));
        if let Some(block) = new_block {
            sealed.push(Arc::new(block));
        }
        for block in old_blocks {
            let _ = std::fs::remove_file(block.path());
        }
    }
}
