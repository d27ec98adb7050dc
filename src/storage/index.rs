//! Metadata index: image records, tag vocabulary and block table
//!
//! The whole index lives in memory and is persisted as one encrypted
//! snapshot (`data.db`). Save replaces the file wholesale; there is no
//! incremental persistence.
//!
//! Snapshot pipeline:
//! ```text
//! IndexSnapshot ─bincode─► lz4 ─► IndexCipher::encrypt ─► data.db
//! ```
//!
//! Tags are not part of the snapshot. They are recomputed from the records
//! whenever the index is loaded.

use crate::storage::block;
use crate::storage::crypto::IndexCipher;
use crate::storage::error::StorageResult;
use crate::storage::types::{BlockEntry, Image, ImageId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// File name of the index artifact inside a storage folder
pub const INDEX_FILE: &str = "data.db";

/// Path of the index artifact for a storage folder
pub fn index_path(folder: &Path) -> PathBuf {
    folder.join(INDEX_FILE)
}

/// What actually goes to disk
#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    next_id: ImageId,
    images: Vec<Image>,
    blocks: BTreeMap<ImageId, BlockEntry>,
    block_max: i64,
}

/// In-memory metadata for one storage folder
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataIndex {
    next_id: ImageId,
    images: Vec<Image>,
    /// Distinct tags in first-seen order
    tags: Vec<String>,
    blocks: BTreeMap<ImageId, BlockEntry>,
    /// Highest block index ever allocated, -1 before the first
    block_max: i64,
}

impl Default for MetadataIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl MetadataIndex {
    /// A fresh, empty store
    pub fn empty() -> Self {
        Self {
            next_id: 1,
            images: Vec::new(),
            tags: Vec::new(),
            blocks: BTreeMap::new(),
            block_max: -1,
        }
    }

    /// Load the index of `folder`
    ///
    /// - No artifact: `Some(empty)`
    /// - Artifact that fails to decrypt or parse: `None`
    /// - Unreadable artifact: `Err`
    pub fn load(folder: &Path, cipher: &dyn IndexCipher) -> StorageResult<Option<Self>> {
        let path = index_path(folder);

        if !path.exists() {
            tracing::info!("No index at {:?}, starting empty", path);
            return Ok(Some(Self::empty()));
        }

        let sealed = std::fs::read(&path)?;
        let Some(compressed) = cipher.decrypt(&sealed) else {
            tracing::warn!("Failed to decrypt index {:?}", path);
            return Ok(None);
        };

        let snapshot = match Self::decode_snapshot(&compressed) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Failed to parse index {:?}: {}", path, e);
                return Ok(None);
            }
        };

        let mut index = Self {
            next_id: snapshot.next_id,
            images: snapshot.images,
            tags: Vec::new(),
            blocks: snapshot.blocks,
            block_max: snapshot.block_max,
        };
        index.rebuild_tags();

        tracing::info!(
            "Loaded index: {} images, {} tags, {} payloads",
            index.images.len(),
            index.tags.len(),
            index.blocks.len()
        );
        Ok(Some(index))
    }

    fn decode_snapshot(compressed: &[u8]) -> StorageResult<IndexSnapshot> {
        let raw = lz4_flex::decompress_size_prepended(compressed)?;
        Ok(bincode::deserialize(&raw)?)
    }

    /// Serialize, encrypt and overwrite the artifact of `folder`
    pub fn save(&self, folder: &Path, cipher: &dyn IndexCipher) -> StorageResult<()> {
        std::fs::create_dir_all(folder)?;

        let snapshot = IndexSnapshot {
            next_id: self.next_id,
            images: self.images.clone(),
            blocks: self.blocks.clone(),
            block_max: self.block_max,
        };

        let raw = bincode::serialize(&snapshot)?;
        let compressed = lz4_flex::compress_prepend_size(&raw);
        let sealed = cipher.encrypt(&compressed)?;

        // Plain overwrite: a crash mid-write can leave a torn artifact
        std::fs::write(index_path(folder), sealed)?;

        tracing::debug!(
            "Saved index: {} images, {} bytes raw, {} bytes compressed",
            self.images.len(),
            raw.len(),
            compressed.len()
        );
        Ok(())
    }

    /// Id the next created image should take
    pub fn next_id(&self) -> ImageId {
        self.next_id
    }

    /// Raise `next_id` past the highest inserted id
    pub fn advance_next_id(&mut self, max_inserted: ImageId) {
        self.next_id = self.next_id.max(max_inserted + 1);
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn block_max(&self) -> i64 {
        self.block_max
    }

    pub fn block_entry(&self, id: ImageId) -> Option<&BlockEntry> {
        self.blocks.get(&id)
    }

    pub fn block_entry_count(&self) -> usize {
        self.blocks.len()
    }

    /// Append a record and fold its tags into the vocabulary
    pub fn insert(&mut self, image: Image) {
        self.fold_tags(&image.tags);
        self.images.push(image);
    }

    /// Replace the record with the same id
    ///
    /// Returns false when no such record exists.
    pub fn replace(&mut self, image: Image) -> bool {
        match self.images.iter_mut().find(|existing| existing.id == image.id) {
            Some(existing) => {
                *existing = image;
                true
            }
            None => false,
        }
    }

    /// Remove a record and forget its block entry
    ///
    /// The blocks themselves stay allocated; they are never handed out
    /// again. Returns false when no such record exists.
    pub fn remove(&mut self, id: ImageId) -> bool {
        match self.images.iter().position(|image| image.id == id) {
            Some(pos) => {
                self.images.remove(pos);
                self.blocks.remove(&id);
                true
            }
            None => false,
        }
    }

    /// Allocate blocks for a payload and move the high-water mark past them
    pub fn reserve_blocks(&mut self, payload_len: usize) -> Vec<u64> {
        let blocks = block::allocate(payload_len, self.block_max);
        if let Some(&last) = blocks.last() {
            self.block_max = last as i64;
        }
        blocks
    }

    /// Record where a payload was written and raise the high-water mark
    pub fn record_blocks(&mut self, id: ImageId, entry: BlockEntry) {
        if let Some(max) = entry.max_block() {
            self.block_max = self.block_max.max(max as i64);
        }
        self.blocks.insert(id, entry);
    }

    /// Recompute the vocabulary from the current records
    pub fn rebuild_tags(&mut self) {
        let mut seen = HashSet::new();
        let mut tags = Vec::new();
        for image in &self.images {
            for tag in &image.tags {
                if seen.insert(tag.as_str()) {
                    tags.push(tag.clone());
                }
            }
        }
        self.tags = tags;
    }

    fn fold_tags(&mut self, tags: &[String]) {
        for tag in tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::crypto::XChaChaCipher;
    use tempfile::tempdir;

    fn sample_index() -> MetadataIndex {
        let mut index = MetadataIndex::empty();
        index.insert(Image::new(1).title("cat").tags(["cat", "outdoor"]));
        index.insert(Image::new(2).tags(["dog", "outdoor"]));
        index.record_blocks(1, BlockEntry::new(200_000, vec![0, 1, 2, 3]));
        index.advance_next_id(2);
        index
    }

    #[test]
    fn test_empty_defaults() {
        let index = MetadataIndex::empty();
        assert_eq!(index.next_id(), 1);
        assert!(index.images().is_empty());
        assert!(index.tags().is_empty());
        assert_eq!(index.block_max(), -1);
        assert_eq!(index.block_entry_count(), 0);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempdir().unwrap();
        let cipher = XChaChaCipher::from_passphrase("k");

        let index = MetadataIndex::load(dir.path(), &cipher).unwrap().unwrap();
        assert_eq!(index, MetadataIndex::empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let cipher = XChaChaCipher::from_passphrase("k");
        let index = sample_index();

        index.save(dir.path(), &cipher).unwrap();
        let restored = MetadataIndex::load(dir.path(), &cipher).unwrap().unwrap();

        assert_eq!(restored, index);
        assert_eq!(restored.tags(), &["cat", "outdoor", "dog"]);
        assert_eq!(restored.block_max(), 3);
        assert_eq!(restored.next_id(), 3);
    }

    #[test]
    fn test_load_wrong_key_is_none() {
        let dir = tempdir().unwrap();
        sample_index()
            .save(dir.path(), &XChaChaCipher::from_passphrase("right"))
            .unwrap();

        let result = MetadataIndex::load(dir.path(), &XChaChaCipher::from_passphrase("wrong"));
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_load_unparseable_is_none() {
        let dir = tempdir().unwrap();
        let cipher = XChaChaCipher::from_passphrase("k");
        let garbage = lz4_flex::compress_prepend_size(b"definitely not a snapshot");
        let sealed = cipher.encrypt(&garbage).unwrap();
        std::fs::write(index_path(dir.path()), sealed).unwrap();

        assert!(MetadataIndex::load(dir.path(), &cipher).unwrap().is_none());
    }

    #[test]
    fn test_reserve_blocks_moves_mark() {
        let mut index = MetadataIndex::empty();
        assert_eq!(index.reserve_blocks(10), vec![0]);
        assert_eq!(index.reserve_blocks(block::BLOCK_SIZE), vec![1, 2]);
        assert_eq!(index.block_max(), 2);
        // nothing recorded until the payload is written
        assert_eq!(index.block_entry_count(), 0);
    }

    #[test]
    fn test_advance_next_id_keeps_max() {
        let mut index = MetadataIndex::empty();
        index.advance_next_id(10);
        assert_eq!(index.next_id(), 11);
        index.advance_next_id(4);
        assert_eq!(index.next_id(), 11);
    }

    #[test]
    fn test_replace_and_remove() {
        let mut index = sample_index();

        assert!(index.replace(Image::new(2).tag("bird")));
        assert!(!index.replace(Image::new(99)));

        assert!(index.remove(1));
        assert!(!index.remove(1));
        assert!(index.block_entry(1).is_none());
        // high-water mark never goes back
        assert_eq!(index.block_max(), 3);

        index.rebuild_tags();
        assert_eq!(index.tags(), &["bird"]);
    }
}
