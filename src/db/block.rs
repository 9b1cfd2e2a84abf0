//! A sealed, immutable block: a sorted on-disk run of `(composite_key,
//! Revision)` cells plus a sparse index and a bloom filter over group
//! prefixes (§3 "Block", §4.3).
//!
//! On-disk layout, trimmed to what a block family actually needs — no
//! range tombstones, no per-key multi-version dedup (each composite key,
//! version embedded, is already unique):
//!
//! ```text
//! [MAGIC 4][FORMAT_VERSION 4]
//! [CELL_LEN_LE][CELL_BYTES][CELL_CRC32_LE]   (repeated, sorted by key)
//! ...
//! [BLOOM_LEN_LE][BLOOM_BYTES][BLOOM_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER: data_len:8][bloom_off:8][bloom_len:8][index_off:8][index_len:8][footer_crc:4]
//! ```
//!
//! The footer gives fixed-size, reverse-readable offsets, so a reader can
//! locate the bloom filter and index without scanning the data section.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::write::{Write as Revision, WriteEncodingError};

const MAGIC: [u8; 4] = *b"JBLK";
const FORMAT_VERSION: u32 = 1;
const FOOTER_LEN: usize = 8 * 5 + 4;
/// Every `SPARSE_INDEX_STRIDE`th cell gets a sparse index entry.
const SPARSE_INDEX_STRIDE: usize = 16;
const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("revision encoding error: {0}")]
    Revision(#[from] WriteEncodingError),
    #[error("checksum mismatch in block {0:?}")]
    ChecksumMismatch(PathBuf),
    #[error("bad magic/version/footer in block {0:?}")]
    BadHeader(PathBuf),
}

struct IndexEntry {
    key: Vec<u8>,
    offset: u64,
}

/// A sealed, memory-mapped block file. Immutable: every read is lock-free.
pub struct Block {
    pub id: u64,
    path: PathBuf,
    mmap: Mmap,
    data_len: u64,
    index: Vec<IndexEntry>,
    bloom: Bloom<[u8]>,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub len: usize,
}

/// Builds a sealed block from an already key-sorted run of `(key, revision)`
/// pairs and fsyncs it durably (§4.3: "Sealing ... fsyncs").
pub fn build(
    dir: impl AsRef<Path>,
    id: u64,
    group_keys: &[Vec<u8>],
    cells: &[(Vec<u8>, Revision)],
) -> Result<Block, BlockError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let final_path = dir.join(format!("{id:020}.blk"));
    let tmp_path = dir.join(format!("{id:020}.blk.tmp"));

    let mut bloom = Bloom::new_for_fp_rate(group_keys.len().max(1), BLOOM_FALSE_POSITIVE_RATE)
        .unwrap_or_else(|_| Bloom::new(1024, 8));
    for gk in group_keys {
        bloom.set(gk.as_slice());
    }

    let file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;

    let mut index = Vec::new();
    let mut offset: u64 = 8;
    for (i, (key, revision)) in cells.iter().enumerate() {
        if i % SPARSE_INDEX_STRIDE == 0 {
            index.push(IndexEntry { key: key.clone(), offset });
        }
        let mut payload = Vec::new();
        key.encode_to(&mut payload)?;
        payload.extend_from_slice(&revision.encode_be());

        let len = payload.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&payload)?;
        let mut crc = Crc32::new();
        crc.update(&payload);
        writer.write_all(&crc.finalize().to_le_bytes())?;
        offset += 4 + payload.len() as u64 + 4;
    }
    let data_len = offset;

    let bloom_bytes = bloom.to_bytes();
    let bloom_off = offset;
    write_checked_section(&mut writer, &bloom_bytes)?;
    offset += 4 + bloom_bytes.len() as u64 + 4;

    let mut index_buf = Vec::new();
    encoding::encode_vec(
        &index
            .iter()
            .map(|e| IndexEntryWire {
                key: e.key.clone(),
                offset: e.offset,
            })
            .collect::<Vec<_>>(),
        &mut index_buf,
    )?;
    let index_off = offset;
    write_checked_section(&mut writer, &index_buf)?;

    let mut footer = Vec::with_capacity(FOOTER_LEN);
    footer.extend_from_slice(&data_len.to_le_bytes());
    footer.extend_from_slice(&bloom_off.to_le_bytes());
    footer.extend_from_slice(&(bloom_bytes.len() as u64).to_le_bytes());
    footer.extend_from_slice(&index_off.to_le_bytes());
    footer.extend_from_slice(&(index_buf.len() as u64).to_le_bytes());
    let mut crc = Crc32::new();
    crc.update(&footer);
    writer.write_all(&footer)?;
    writer.write_all(&crc.finalize().to_le_bytes())?;

    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);
    fs::rename(&tmp_path, &final_path)?;

    let file = File::open(&final_path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    let min_key = cells.first().map(|(k, _)| k.clone()).unwrap_or_default();
    let max_key = cells.last().map(|(k, _)| k.clone()).unwrap_or_default();

    Ok(Block {
        id,
        path: final_path,
        mmap,
        data_len,
        index,
        bloom,
        min_key,
        max_key,
        len: cells.len(),
    })
}

fn write_checked_section(writer: &mut impl IoWrite, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(bytes)?;
    let mut crc = Crc32::new();
    crc.update(bytes);
    writer.write_all(&crc.finalize().to_le_bytes())
}

struct IndexEntryWire {
    key: Vec<u8>,
    offset: u64,
}

impl Encode for IndexEntryWire {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.offset.encode_to(buf)
    }
}

impl Decode for IndexEntryWire {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (off, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { key, offset: off }, offset))
    }
}

impl Block {
    /// Reopens a previously sealed block file (used on [`crate::engine::Engine::start`]).
    pub fn open(path: impl AsRef<Path>, id: u64) -> Result<Self, BlockError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < 8 + FOOTER_LEN || mmap[0..4] != MAGIC {
            return Err(BlockError::BadHeader(path));
        }
        let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(BlockError::BadHeader(path));
        }

        let footer_start = mmap.len() - FOOTER_LEN;
        let footer = &mmap[footer_start..footer_start + FOOTER_LEN - 4];
        let footer_crc = u32::from_le_bytes(mmap[mmap.len() - 4..].try_into().unwrap());
        let mut crc = Crc32::new();
        crc.update(footer);
        if crc.finalize() != footer_crc {
            return Err(BlockError::ChecksumMismatch(path));
        }

        let data_len = u64::from_le_bytes(footer[0..8].try_into().unwrap());
        let bloom_off = u64::from_le_bytes(footer[8..16].try_into().unwrap()) as usize;
        let bloom_len = u64::from_le_bytes(footer[16..24].try_into().unwrap()) as usize;
        let index_off = u64::from_le_bytes(footer[24..32].try_into().unwrap()) as usize;
        let index_len = u64::from_le_bytes(footer[32..40].try_into().unwrap()) as usize;

        let bloom_bytes = read_checked_section(&mmap, bloom_off, bloom_len, &path)?;
        let index_bytes = read_checked_section(&mmap, index_off, index_len, &path)?;

        let bloom = Bloom::from_bytes(bloom_bytes.to_vec()).map_err(|_| BlockError::BadHeader(path.clone()))?;
        let (entries, _) = encoding::decode_vec::<IndexEntryWire>(index_bytes)?;
        let index: Vec<IndexEntry> = entries
            .into_iter()
            .map(|e| IndexEntry { key: e.key, offset: e.offset })
            .collect();

        let mut scan_offset = 8u64;
        let mut len = 0usize;
        let mut min_key = None;
        let mut max_key = Vec::new();
        while scan_offset < data_len {
            let (key, _rev, consumed) = read_cell(&mmap, scan_offset as usize, &path)?;
            if min_key.is_none() {
                min_key = Some(key.clone());
            }
            max_key = key;
            scan_offset += consumed as u64;
            len += 1;
        }

        Ok(Block {
            id,
            path,
            mmap,
            data_len,
            index,
            bloom,
            min_key: min_key.unwrap_or_default(),
            max_key,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// `true` if the bloom filter says `group_key` may be present; `false`
    /// means it is definitely absent.
    pub fn may_contain(&self, group_key: &[u8]) -> bool {
        self.bloom.check(group_key)
    }

    /// Returns every `(composite_key, revision)` cell whose key starts with
    /// `prefix`, in ascending key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Revision)>, BlockError> {
        let start = self.seek_offset(prefix);
        let mut out = Vec::new();
        let mut offset = start;
        while offset < self.data_len {
            let (key, revision, consumed) = read_cell(&self.mmap, offset as usize, &self.path)?;
            if prefix.is_empty() {
                out.push((key, revision));
            } else if key.starts_with(prefix) {
                out.push((key, revision));
            } else if key.as_slice() > prefix {
                break;
            }
            offset += consumed as u64;
        }
        Ok(out)
    }

    /// All cells in this block, in key order.
    pub fn scan_all(&self) -> Result<Vec<(Vec<u8>, Revision)>, BlockError> {
        self.scan_prefix(&[])
    }

    fn seek_offset(&self, prefix: &[u8]) -> u64 {
        match self.index.binary_search_by(|e| e.key.as_slice().cmp(prefix)) {
            Ok(i) => self.index[i].offset,
            Err(0) => 8,
            Err(i) => self.index[i - 1].offset,
        }
    }
}

fn read_checked_section<'a>(
    mmap: &'a [u8],
    offset: usize,
    len: usize,
    path: &Path,
) -> Result<&'a [u8], BlockError> {
    let len_start = offset;
    let data_start = len_start + 4;
    let data_end = data_start + len;
    let crc_end = data_end + 4;
    if crc_end > mmap.len() {
        return Err(BlockError::BadHeader(path.to_path_buf()));
    }
    let bytes = &mmap[data_start..data_end];
    let expected_crc = u32::from_le_bytes(mmap[data_end..crc_end].try_into().unwrap());
    let mut crc = Crc32::new();
    crc.update(bytes);
    if crc.finalize() != expected_crc {
        return Err(BlockError::ChecksumMismatch(path.to_path_buf()));
    }
    Ok(bytes)
}

fn read_cell(mmap: &[u8], offset: usize, path: &Path) -> Result<(Vec<u8>, Revision, usize), BlockError> {
    if offset + 4 > mmap.len() {
        return Err(BlockError::BadHeader(path.to_path_buf()));
    }
    let len = u32::from_le_bytes(mmap[offset..offset + 4].try_into().unwrap()) as usize;
    let payload_start = offset + 4;
    let payload_end = payload_start + len;
    if payload_end + 4 > mmap.len() {
        return Err(BlockError::BadHeader(path.to_path_buf()));
    }
    let payload = &mmap[payload_start..payload_end];
    let crc_bytes = &mmap[payload_end..payload_end + 4];
    let expected_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
    let mut crc = Crc32::new();
    crc.update(payload);
    if crc.finalize() != expected_crc {
        return Err(BlockError::ChecksumMismatch(path.to_path_buf()));
    }

    let (key, n) = Vec::<u8>::decode_from(payload)?;
    let (revision, _) = Revision::decode_be(&payload[n..])?;
    Ok((key, revision, 4 + len + 4))
}
