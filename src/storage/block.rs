//! Block file manager for photovault storage
//!
//! Image payloads are cut into fixed-size blocks and scattered over a bank
//! of segment files. A block's global index decides where it lives:
//!
//! ```text
//! global index ──► segment ordinal = index / BLOCKS_PER_FILE
//!              └─► slot           = index % BLOCKS_PER_FILE
//!
//! block-a000.dat                     block-a001.dat
//! ┌────────┬────────┬─────┬────────┐ ┌────────┬────────┬─────
//! │ slot 0 │ slot 1 │ ... │ 1023   │ │ slot 0 │ slot 1 │ ...
//! └────────┴────────┴─────┴────────┘ └────────┴────────┴─────
//!   64 KiB   64 KiB         64 KiB     (global 1024, 1025, ...)
//! ```
//!
//! Allocation is append-only. Indices are never handed out twice, even
//! after the owning image is deleted.
//!
//! Every payload of length `n` occupies `n / BLOCK_SIZE + 1` blocks. All
//! blocks but the last hold `BLOCK_SIZE` bytes; the last holds
//! `n % BLOCK_SIZE` bytes (possibly zero).

use crate::storage::error::{StorageError, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Size of one block in bytes
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Number of blocks held by one segment file (64 MiB per file)
pub const BLOCKS_PER_FILE: u64 = 1024;

/// Offset added to the segment ordinal when naming files
const SEGMENT_NAME_BASE: u64 = 0xA000;

const SEGMENT_PREFIX: &str = "block-";
const SEGMENT_EXTENSION: &str = "dat";

/// File name of the segment with the given ordinal
pub fn segment_file_name(ordinal: u64) -> String {
    format!(
        "{}{:x}.{}",
        SEGMENT_PREFIX,
        ordinal + SEGMENT_NAME_BASE,
        SEGMENT_EXTENSION
    )
}

/// Reserve blocks for a payload of `payload_len` bytes
///
/// Returns `payload_len / BLOCK_SIZE + 1` consecutive indices starting
/// right after `high_water_mark`. An exact multiple of `BLOCK_SIZE` still
/// gets a trailing (empty) block.
pub fn allocate(payload_len: usize, high_water_mark: i64) -> Vec<u64> {
    let count = (payload_len / BLOCK_SIZE + 1) as u64;
    let start = (high_water_mark + 1).max(0) as u64;
    (start..start + count).collect()
}

/// One positioned transfer between the payload buffer and a segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOp {
    /// Ordinal of the block within the payload
    pub position: usize,
    /// Block slot within the segment file
    pub slot: u64,
    /// Bytes to transfer
    pub len: usize,
}

impl BlockOp {
    /// Offset into the payload buffer
    pub fn buffer_offset(&self) -> usize {
        self.position * BLOCK_SIZE
    }

    /// Offset into the segment file
    pub fn file_offset(&self) -> u64 {
        self.slot * BLOCK_SIZE as u64
    }
}

/// All transfers that touch one segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    /// Segment ordinal
    pub ordinal: u64,
    /// Transfers in payload order
    pub ops: Vec<BlockOp>,
}

impl SegmentPlan {
    /// Total bytes moved by this plan
    pub fn byte_len(&self) -> usize {
        self.ops.iter().map(|op| op.len).sum()
    }
}

/// Group a block list by segment file
///
/// Segments appear in the order their first block appears in `blocks`.
pub fn plan(blocks: &[u64], payload_len: usize) -> StorageResult<Vec<SegmentPlan>> {
    let expected = payload_len / BLOCK_SIZE + 1;
    if blocks.len() != expected {
        return Err(StorageError::Corruption(format!(
            "{} bytes need {} blocks, got {}",
            payload_len,
            expected,
            blocks.len()
        )));
    }

    let mut plans: Vec<SegmentPlan> = Vec::new();
    let last = blocks.len() - 1;

    for (position, &block) in blocks.iter().enumerate() {
        let ordinal = block / BLOCKS_PER_FILE;
        let op = BlockOp {
            position,
            slot: block % BLOCKS_PER_FILE,
            len: if position == last {
                payload_len % BLOCK_SIZE
            } else {
                BLOCK_SIZE
            },
        };

        match plans.iter_mut().find(|p| p.ordinal == ordinal) {
            Some(existing) => existing.ops.push(op),
            None => plans.push(SegmentPlan {
                ordinal,
                ops: vec![op],
            }),
        }
    }

    Ok(plans)
}

/// Write every op of one segment, opening the file once
fn write_segment(path: &Path, ops: &[BlockOp], payload: &[u8]) -> StorageResult<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    for op in ops {
        if op.len == 0 {
            continue;
        }
        let start = op.buffer_offset();
        file.seek(SeekFrom::Start(op.file_offset()))?;
        file.write_all(&payload[start..start + op.len])?;
    }

    file.flush()?;
    Ok(())
}

/// Read every op of one segment, opening the file once
///
/// Returns the bytes of all ops concatenated in op order.
fn read_segment(path: &Path, ops: &[BlockOp]) -> StorageResult<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut fragment = vec![0u8; ops.iter().map(|op| op.len).sum()];
    let mut cursor = 0;

    for op in ops {
        if op.len == 0 {
            continue;
        }
        file.seek(SeekFrom::Start(op.file_offset()))?;
        file.read_exact(&mut fragment[cursor..cursor + op.len])?;
        cursor += op.len;
    }

    Ok(fragment)
}

/// Copy a segment fragment back into its payload positions
fn scatter(buffer: &mut [u8], ops: &[BlockOp], fragment: &[u8]) {
    let mut cursor = 0;
    for op in ops {
        let start = op.buffer_offset();
        buffer[start..start + op.len].copy_from_slice(&fragment[cursor..cursor + op.len]);
        cursor += op.len;
    }
}

/// Reads and writes payload blocks inside one storage folder
#[derive(Debug, Clone)]
pub struct BlockFileManager {
    folder: PathBuf,
}

impl BlockFileManager {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    /// Path of the segment with the given ordinal
    pub fn segment_path(&self, ordinal: u64) -> PathBuf {
        self.folder.join(segment_file_name(ordinal))
    }

    /// Write a payload into its allocated blocks (blocking)
    pub fn write(&self, blocks: &[u64], payload: &[u8]) -> StorageResult<()> {
        let plans = plan(blocks, payload.len())?;

        for segment in &plans {
            write_segment(&self.segment_path(segment.ordinal), &segment.ops, payload)?;
        }

        tracing::debug!(
            "Wrote {} bytes across {} blocks in {} segment(s)",
            payload.len(),
            blocks.len(),
            plans.len()
        );
        Ok(())
    }

    /// Write a payload into its allocated blocks
    ///
    /// One blocking task per segment file; resolves once every task has
    /// finished, whatever order they finish in.
    pub async fn write_async(&self, blocks: &[u64], payload: Arc<Vec<u8>>) -> StorageResult<()> {
        let plans = plan(blocks, payload.len())?;
        let segment_count = plans.len();
        let mut tasks = JoinSet::new();

        for segment in plans {
            let path = self.segment_path(segment.ordinal);
            let payload = Arc::clone(&payload);
            tasks.spawn_blocking(move || write_segment(&path, &segment.ops, &payload));
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(StorageError::from).and_then(|r| r);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        tracing::debug!(
            "Wrote {} bytes across {} blocks in {} segment(s)",
            payload.len(),
            blocks.len(),
            segment_count
        );
        Ok(())
    }

    /// Read a payload back from its blocks (blocking)
    pub fn read(&self, blocks: &[u64], payload_len: usize) -> StorageResult<Vec<u8>> {
        let plans = plan(blocks, payload_len)?;
        let mut buffer = vec![0u8; payload_len];

        for segment in &plans {
            let fragment = read_segment(&self.segment_path(segment.ordinal), &segment.ops)?;
            scatter(&mut buffer, &segment.ops, &fragment);
        }

        tracing::debug!(
            "Read {} bytes from {} segment(s)",
            payload_len,
            plans.len()
        );
        Ok(buffer)
    }

    /// Read a payload back from its blocks
    ///
    /// Segment files are read concurrently and stitched together once the
    /// last one has been read.
    pub async fn read_async(&self, blocks: &[u64], payload_len: usize) -> StorageResult<Vec<u8>> {
        let plans = plan(blocks, payload_len)?;
        let segment_count = plans.len();
        let mut tasks = JoinSet::new();

        for segment in plans {
            let path = self.segment_path(segment.ordinal);
            tasks.spawn_blocking(move || {
                read_segment(&path, &segment.ops).map(|fragment| (segment.ops, fragment))
            });
        }

        let mut buffer = vec![0u8; payload_len];
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(StorageError::from).and_then(|r| r) {
                Ok((ops, fragment)) => scatter(&mut buffer, &ops, &fragment),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        tracing::debug!(
            "Read {} bytes from {} segment(s)",
            payload_len,
            segment_count
        );
        Ok(buffer)
    }

    /// Segment files currently present in the folder
    pub fn segment_files(&self) -> StorageResult<Vec<PathBuf>> {
        let mut files = Vec::new();

        if !self.folder.exists() {
            return Ok(files);
        }

        for entry in std::fs::read_dir(&self.folder)? {
            let path = entry?.path();
            let is_segment = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(SEGMENT_PREFIX))
                .unwrap_or(false)
                && path.extension().map(|e| e == SEGMENT_EXTENSION).unwrap_or(false);
            if is_segment {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Bytes occupied by all segment files
    pub fn disk_usage(&self) -> StorageResult<u64> {
        let mut total = 0;
        for path in self.segment_files()? {
            total += std::fs::metadata(path)?.len();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(0), "block-a000.dat");
        assert_eq!(segment_file_name(1), "block-a001.dat");
        assert_eq!(segment_file_name(0x1f), "block-a01f.dat");
    }

    #[test]
    fn test_allocate_counts() {
        assert_eq!(allocate(0, -1), vec![0]);
        assert_eq!(allocate(BLOCK_SIZE - 1, -1), vec![0]);
        // exact multiple still reserves a trailing block
        assert_eq!(allocate(BLOCK_SIZE, -1), vec![0, 1]);
        assert_eq!(allocate(BLOCK_SIZE + 1, 4), vec![5, 6]);
        assert_eq!(allocate(200_000, -1), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_allocations_disjoint_and_increasing() {
        let mut mark = -1i64;
        let mut seen = Vec::new();

        for len in [0, 10, BLOCK_SIZE, 3 * BLOCK_SIZE + 7, 1] {
            let blocks = allocate(len, mark);
            assert_eq!(blocks[0] as i64, mark + 1);
            mark = *blocks.last().unwrap() as i64;
            seen.extend(blocks);
        }

        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*seen.last().unwrap() as i64, mark);
    }

    #[test]
    fn test_plan_groups_by_segment() {
        let blocks = allocate(2 * BLOCK_SIZE + 5, 1022);
        assert_eq!(blocks, vec![1023, 1024, 1025]);

        let plans = plan(&blocks, 2 * BLOCK_SIZE + 5).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].ordinal, 0);
        assert_eq!(
            plans[0].ops,
            vec![BlockOp { position: 0, slot: 1023, len: BLOCK_SIZE }]
        );
        assert_eq!(plans[1].ordinal, 1);
        assert_eq!(
            plans[1].ops,
            vec![
                BlockOp { position: 1, slot: 0, len: BLOCK_SIZE },
                BlockOp { position: 2, slot: 1, len: 5 },
            ]
        );
        assert_eq!(plans.iter().map(|p| p.byte_len()).sum::<usize>(), 2 * BLOCK_SIZE + 5);
    }

    #[test]
    fn test_plan_rejects_mismatched_blocks() {
        let result = plan(&[0, 1], 10);
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_roundtrip_boundary_lengths() {
        let dir = tempdir().unwrap();
        let manager = BlockFileManager::new(dir.path());
        let mut mark = -1i64;

        for (seed, len) in [0, BLOCK_SIZE - 1, BLOCK_SIZE, BLOCK_SIZE + 1, 200_000]
            .into_iter()
            .enumerate()
        {
            let data = payload(len, seed as u8);
            let blocks = allocate(len, mark);
            mark = *blocks.last().unwrap() as i64;

            manager.write(&blocks, &data).unwrap();
            let restored = manager.read(&blocks, len).unwrap();
            assert_eq!(restored, data, "length {}", len);
        }
    }

    #[test]
    fn test_later_writes_keep_earlier_blocks() {
        let dir = tempdir().unwrap();
        let manager = BlockFileManager::new(dir.path());

        let first = payload(1000, 1);
        let first_blocks = allocate(first.len(), -1);
        manager.write(&first_blocks, &first).unwrap();

        let second = payload(BLOCK_SIZE + 300, 2);
        let second_blocks = allocate(second.len(), *first_blocks.last().unwrap() as i64);
        manager.write(&second_blocks, &second).unwrap();

        assert_eq!(manager.read(&first_blocks, first.len()).unwrap(), first);
        assert_eq!(manager.read(&second_blocks, second.len()).unwrap(), second);
        assert_eq!(manager.segment_files().unwrap().len(), 1);
    }

    #[test]
    fn test_payload_spanning_segments() {
        let dir = tempdir().unwrap();
        let manager = BlockFileManager::new(dir.path());

        let data = payload(BLOCK_SIZE + 42, 9);
        let blocks = allocate(data.len(), BLOCKS_PER_FILE as i64 - 2);
        assert_eq!(blocks, vec![1023, 1024]);

        manager.write(&blocks, &data).unwrap();
        assert!(manager.segment_path(0).exists());
        assert!(manager.segment_path(1).exists());
        assert_eq!(manager.read(&blocks, data.len()).unwrap(), data);
    }

    #[test]
    fn test_missing_segment_is_io_error() {
        let dir = tempdir().unwrap();
        let manager = BlockFileManager::new(dir.path());

        let result = manager.read(&[0], 10);
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn test_async_matches_sync() {
        let dir = tempdir().unwrap();
        let manager = BlockFileManager::new(dir.path());

        let data = payload(3 * BLOCK_SIZE + 17, 5);
        let blocks = allocate(data.len(), BLOCKS_PER_FILE as i64 - 3);

        manager
            .write_async(&blocks, Arc::new(data.clone()))
            .await
            .unwrap();

        let sync_read = manager.read(&blocks, data.len()).unwrap();
        let async_read = manager.read_async(&blocks, data.len()).await.unwrap();

        assert_eq!(sync_read, data);
        assert_eq!(async_read, sync_read);
    }

    #[tokio::test]
    async fn test_async_missing_segment_fails() {
        let dir = tempdir().unwrap();
        let manager = BlockFileManager::new(dir.path());

        let result = manager.read_async(&[5000, 5001], BLOCK_SIZE + 1).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn test_disk_usage() {
        let dir = tempdir().unwrap();
        let manager = BlockFileManager::new(dir.path());
        assert_eq!(manager.disk_usage().unwrap(), 0);

        let data = payload(BLOCK_SIZE + 10, 3);
        let blocks = allocate(data.len(), -1);
        manager.write(&blocks, &data).unwrap();

        assert_eq!(manager.disk_usage().unwrap(), (BLOCK_SIZE + 10) as u64);
    }
}
