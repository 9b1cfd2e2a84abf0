//! Block-family compaction (§4.3 added): merges sealed blocks within a
//! single family to bound file count. Every Revision is a distinct,
//! immutable fact (its composite key embeds the version), so compaction
//! here is pure merge — it never drops or rewrites a cell. That keeps the
//! invariant simple: compaction must never change the result of
//! `select`/`find`/`search` for any retained version (§4.3), including a
//! historical `[ts]` read that falls between an ADD and its matching
//! REMOVE. Dropping provably-cancelled ADD/REMOVE pairs is therefore
//! deferred — see DESIGN.md.
//!
//! Size-tiered bucketing: blocks are grouped by file size so that merges
//! combine similarly-sized blocks rather than repeatedly re-merging one
//! giant block.

use std::sync::Arc;

use tracing::info;

use super::block::{self, Block, BlockError};
use super::family::Family;

/// Groups `blocks` into size buckets: anything under `min_block_size`
/// goes in a single "small" bucket; the rest are grouped so each block's
/// size falls within `[avg * low, avg * high]` of its bucket's average.
pub fn bucket_blocks(blocks: &[Arc<Block>], min_block_size: u64, bucket_low: f64, bucket_high: f64) -> Vec<Vec<usize>> {
    if blocks.is_empty() {
        return Vec::new();
    }
    let mut indices: Vec<usize> = (0..blocks.len()).collect();
    indices.sort_by_key(|&i| blocks[i].file_size());

    let mut small = Vec::new();
    let mut regular = Vec::new();
    for &i in &indices {
        if blocks[i].file_size() < min_block_size {
            small.push(i);
        } else {
            regular.push(i);
        }
    }

    let mut buckets = Vec::new();
    if small.len() > 1 {
        buckets.push(small);
    }

    let mut bucket: Vec<usize> = Vec::new();
    let mut bucket_total: u64 = 0;
    for i in regular {
        let size = blocks[i].file_size();
        if bucket.is_empty() {
            bucket.push(i);
            bucket_total = size;
            continue;
        }
        let avg = bucket_total / bucket.len() as u64;
        let low = (avg as f64 * bucket_low) as u64;
        let high = (avg as f64 * bucket_high) as u64;
        if size >= low && size <= high {
            bucket.push(i);
            bucket_total += size;
        } else {
            if bucket.len() > 1 {
                buckets.push(std::mem::take(&mut bucket));
            } else {
                bucket.clear();
            }
            bucket.push(i);
            bucket_total = size;
        }
    }
    if bucket.len() > 1 {
        buckets.push(bucket);
    }
    buckets
}

/// Merges every sealed block in `family` whose index falls in `bucket`
/// into one new block, k-way-merged by composite key (all blocks are
/// internally sorted, so this is a straight multi-way merge).
pub fn merge_bucket(family: &Family, blocks: &[Arc<Block>], bucket: &[usize]) -> Result<(Vec<u64>, Option<Block>), BlockError> {
    if bucket.len() < 2 {
        return Ok((Vec::new(), None));
    }
    let mut all_cells = Vec::new();
    let mut old_ids = Vec::new();
    for &i in bucket {
        old_ids.push(blocks[i].id);
        all_cells.extend(blocks[i].scan_all()?);
    }
    all_cells.sort_by(|a, b| a.0.cmp(&b.0));
    let group_keys: Vec<Vec<u8>> = all_cells.iter().map(|(k, _)| k.clone()).collect();

    let new_id = family.reserve_block_id();
    let merged = block::build(family.dir(), new_id, &group_keys, &all_cells)?;
    info!(family = ?family.kind, old_blocks = ?old_ids, new_block = new_id, cells = merged.len, "compacted blocks");
    Ok((old_ids, Some(merged)))
}

/// Minor compaction: one round of bucket-and-merge, merging at most one
/// bucket — incremental and cheap, meant to be called periodically rather
/// than merging everything at once.
pub fn minor_compact(family: &Family, min_block_size: u64, bucket_low: f64, bucket_high: f64) -> Result<bool, BlockError> {
    let blocks = family.sealed_blocks();
    let buckets = bucket_blocks(&blocks, min_block_size, bucket_low, bucket_high);
    let Some(bucket) = buckets.into_iter().next() else {
        return Ok(false);
    };
    let (old_ids, new_block) = merge_bucket(family, &blocks, &bucket)?;
    family.replace_blocks(&old_ids, new_block);
    Ok(true)
}

/// Major compaction: merges every sealed block in the family into one.
pub fn major_compact(family: &Family) -> Result<bool, BlockError> {
    let blocks = family.sealed_blocks();
    if blocks.len() < 2 {
        return Ok(false);
    }
    let all_indices: Vec<usize> = (0..blocks.len()).collect();
    let (old_ids, new_block) = merge_bucket(family, &blocks, &all_indices)?;
    family.replace_blocks(&old_ids, new_block);
    Ok(true)
}
