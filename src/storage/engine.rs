//! Photovault Storage Engine
//!
//! The facade over the metadata index, block files and caches:
//! - Write path: Image → allocate blocks → segment files → index (in memory)
//! - Read path: decoded cache → origin cache → segment files → transcoder
//!
//! The index is loaded by `connect` and persisted by `close`. Nothing is
//! flushed in between unless `flush` is called.
//!
//! Thread-safe via `std::sync` locks. Locks are never held across disk I/O
//! or `.await`, so the blocking and async paths share the same state.

use crate::storage::block::BlockFileManager;
use crate::storage::cache::BufferCache;
use crate::storage::crypto::{IndexCipher, XChaChaCipher};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::index::{self, MetadataIndex};
use crate::storage::transcoder::{DataUrlTranscoder, ImageTranscoder};
use crate::storage::types::{BlockEntry, Image, ImageFilter, ImageId, ImageSpecification, TagFilter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Configuration for the storage engine
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Storage folder holding `data.db` and the segment files
    pub data_dir: PathBuf,
    /// Entries kept in the decoded-representation cache (default: 256)
    pub decoded_cache_capacity: usize,
    /// Raw payloads kept in the origin cache (default: 32)
    pub origin_cache_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("photovault_data"),
            decoded_cache_capacity: 256,
            origin_cache_capacity: 32,
        }
    }
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn decoded_cache_capacity(mut self, capacity: usize) -> Self {
        self.decoded_cache_capacity = capacity;
        self
    }

    pub fn origin_cache_capacity(mut self, capacity: usize) -> Self {
        self.origin_cache_capacity = capacity;
        self
    }

    /// Get path to the index artifact
    pub fn index_path(&self) -> PathBuf {
        index::index_path(&self.data_dir)
    }
}

#[derive(Debug, Default)]
struct Counters {
    disk_reads: AtomicU64,
    transcodes: AtomicU64,
    decoded_hits: AtomicU64,
    origin_hits: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A payload whose blocks are reserved but not yet written
struct PendingPayload {
    id: ImageId,
    blocks: Vec<u64>,
    buffer: Arc<Vec<u8>>,
}

impl PendingPayload {
    fn into_entry(self) -> (ImageId, BlockEntry) {
        tracing::debug!("Stored payload of image {} in {} block(s)", self.id, self.blocks.len());
        (self.id, BlockEntry::new(self.buffer.len() as u64, self.blocks))
    }
}

/// Where a render request can be satisfied from
enum Lookup {
    Decoded(String),
    Origin(Arc<Vec<u8>>),
    Disk(BlockEntry),
    Missing,
}

/// The main photovault storage engine
pub struct StorageEngine<T: ImageTranscoder = DataUrlTranscoder> {
    /// Configuration
    config: StorageConfig,
    /// Index artifact cipher
    cipher: Arc<dyn IndexCipher>,
    /// Renders raw payloads
    transcoder: T,
    /// Segment file access
    blocks: BlockFileManager,
    /// Records, tags and block table
    index: RwLock<MetadataIndex>,
    /// (spec, id) → rendered representation
    decoded_cache: Mutex<BufferCache<String>>,
    /// (Origin, id) → raw payload
    origin_cache: Mutex<BufferCache<Arc<Vec<u8>>>>,
    counters: Counters,
}

impl StorageEngine<DataUrlTranscoder> {
    /// Engine with the default cipher and data-URL transcoder
    pub fn with_passphrase(config: StorageConfig, passphrase: &str) -> Self {
        Self::new(
            config,
            Arc::new(XChaChaCipher::from_passphrase(passphrase)),
            DataUrlTranscoder,
        )
    }
}

impl<T: ImageTranscoder> StorageEngine<T> {
    /// Create an engine. Nothing is read until `connect`.
    pub fn new(config: StorageConfig, cipher: Arc<dyn IndexCipher>, transcoder: T) -> Self {
        Self {
            blocks: BlockFileManager::new(&config.data_dir),
            index: RwLock::new(MetadataIndex::empty()),
            decoded_cache: Mutex::new(BufferCache::new(config.decoded_cache_capacity)),
            origin_cache: Mutex::new(BufferCache::new(config.origin_cache_capacity)),
            counters: Counters::default(),
            config,
            cipher,
            transcoder,
        }
    }

    fn index_read(&self) -> StorageResult<RwLockReadGuard<'_, MetadataIndex>> {
        self.index
            .read()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire index lock: {}", e)))
    }

    fn index_write(&self) -> StorageResult<RwLockWriteGuard<'_, MetadataIndex>> {
        self.index
            .write()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire index lock: {}", e)))
    }

    fn decoded(&self) -> StorageResult<MutexGuard<'_, BufferCache<String>>> {
        self.decoded_cache
            .lock()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire decoded cache lock: {}", e)))
    }

    fn origin(&self) -> StorageResult<MutexGuard<'_, BufferCache<Arc<Vec<u8>>>>> {
        self.origin_cache
            .lock()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire origin cache lock: {}", e)))
    }

    /// Load the index from the storage folder
    ///
    /// Returns `false` (leaving the in-memory state untouched) when the
    /// artifact exists but cannot be decrypted or parsed.
    pub fn connect(&self) -> StorageResult<bool> {
        std::fs::create_dir_all(&self.config.data_dir)?;

        let Some(loaded) = MetadataIndex::load(&self.config.data_dir, self.cipher.as_ref())? else {
            tracing::warn!("Index at {:?} is unusable", self.config.index_path());
            return Ok(false);
        };

        *self.index_write()? = loaded;
        self.decoded()?.clear();
        self.origin()?.clear();

        tracing::info!("Connected to {:?}", self.config.data_dir);
        Ok(true)
    }

    /// Persist the index
    pub fn flush(&self) -> StorageResult<()> {
        let index = self.index_read()?;
        index.save(&self.config.data_dir, self.cipher.as_ref())
    }

    /// Persist the index at the end of a session
    pub fn close(&self) -> StorageResult<()> {
        self.flush()?;
        tracing::info!("Closed {:?}", self.config.data_dir);
        Ok(())
    }

    /// Find images
    ///
    /// Without a filter every record is returned in collection order.
    pub fn find(&self, filter: Option<&ImageFilter>) -> StorageResult<Vec<Image>> {
        let index = self.index_read()?;

        let Some(filter) = filter else {
            return Ok(index.images().to_vec());
        };

        let mut found: Vec<Image> = index
            .images()
            .iter()
            .filter(|image| filter.matches(image))
            .cloned()
            .collect();
        filter.apply_order(&mut found);
        Ok(found)
    }

    /// Find tags in the vocabulary
    pub fn find_tags(&self, filter: Option<&TagFilter>) -> StorageResult<Vec<String>> {
        let index = self.index_read()?;

        let Some(filter) = filter else {
            return Ok(index.tags().to_vec());
        };

        let mut found: Vec<String> = index
            .tags()
            .iter()
            .filter(|tag| filter.matches(tag))
            .cloned()
            .collect();
        filter.apply_order(&mut found);
        Ok(found)
    }

    /// Id the next created image should take
    pub fn next_id(&self) -> StorageResult<ImageId> {
        Ok(self.index_read()?.next_id())
    }

    /// Reserve blocks for every payload in the batch
    ///
    /// Only the high-water mark moves here. If a later write fails the
    /// reserved blocks are simply abandoned.
    fn reserve(&self, images: &mut [Image]) -> StorageResult<Vec<PendingPayload>> {
        let mut index = self.index_write()?;
        let mut pending = Vec::new();

        for image in images.iter_mut() {
            if let Some(buffer) = image.buffer.take() {
                let blocks = index.reserve_blocks(buffer.len());
                pending.push(PendingPayload {
                    id: image.id,
                    blocks,
                    buffer: Arc::new(buffer),
                });
            }
        }

        Ok(pending)
    }

    /// Insert a batch whose payloads are already on disk
    fn commit(
        &self,
        images: Vec<Image>,
        entries: Vec<(ImageId, BlockEntry)>,
    ) -> StorageResult<Vec<Image>> {
        let mut index = self.index_write()?;

        for (id, entry) in entries {
            index.record_blocks(id, entry);
        }
        for image in &images {
            index.insert(image.clone());
        }
        if let Some(max_id) = images.iter().map(|image| image.id).max() {
            index.advance_next_id(max_id);
        }

        tracing::debug!("Created {} image(s), next id {}", images.len(), index.next_id());
        Ok(images)
    }

    /// Create images, writing their payloads (blocking)
    ///
    /// Returns the accepted records without their payloads.
    pub fn create(&self, mut images: Vec<Image>) -> StorageResult<Vec<Image>> {
        let pending = self.reserve(&mut images)?;
        let mut entries = Vec::with_capacity(pending.len());

        for payload in pending {
            self.blocks.write(&payload.blocks, &payload.buffer)?;
            entries.push(payload.into_entry());
        }

        self.commit(images, entries)
    }

    /// Create images, writing their payloads without blocking the runtime
    pub async fn create_async(&self, mut images: Vec<Image>) -> StorageResult<Vec<Image>> {
        let pending = self.reserve(&mut images)?;
        let mut entries = Vec::with_capacity(pending.len());

        for payload in pending {
            self.blocks
                .write_async(&payload.blocks, Arc::clone(&payload.buffer))
                .await?;
            entries.push(payload.into_entry());
        }

        self.commit(images, entries)
    }

    /// Replace existing records
    ///
    /// Unknown ids are dropped from the result. Payloads are ignored; stored
    /// blocks are immutable.
    pub fn update(&self, images: Vec<Image>) -> StorageResult<Vec<Image>> {
        let mut index = self.index_write()?;
        let mut accepted = Vec::new();

        for mut image in images {
            image.buffer = None;
            if index.replace(image.clone()) {
                accepted.push(image);
            }
        }

        if !accepted.is_empty() {
            index.rebuild_tags();
        }
        Ok(accepted)
    }

    /// Delete images by id or record, returning how many existed
    ///
    /// Their blocks are abandoned, not reclaimed.
    pub fn delete<I>(&self, targets: I) -> StorageResult<usize>
    where
        I: IntoIterator,
        I::Item: Into<ImageId>,
    {
        let mut index = self.index_write()?;
        let mut decoded = self.decoded()?;
        let mut origin = self.origin()?;
        let mut deleted = 0;

        for target in targets {
            let id = target.into();
            if index.remove(id) {
                decoded.remove(id);
                origin.remove(id);
                deleted += 1;
            }
        }

        if deleted > 0 {
            index.rebuild_tags();
            tracing::debug!("Deleted {} image(s)", deleted);
        }
        Ok(deleted)
    }

    fn lookup(&self, id: ImageId, spec: ImageSpecification) -> StorageResult<Lookup> {
        if let Some(url) = self.decoded()?.get(spec, id) {
            Counters::bump(&self.counters.decoded_hits);
            return Ok(Lookup::Decoded(url));
        }

        if let Some(raw) = self.origin()?.get(ImageSpecification::Origin, id) {
            Counters::bump(&self.counters.origin_hits);
            return Ok(Lookup::Origin(raw));
        }

        Ok(match self.index_read()?.block_entry(id) {
            Some(entry) => Lookup::Disk(entry.clone()),
            None => Lookup::Missing,
        })
    }

    fn render(&self, id: ImageId, spec: ImageSpecification, raw: &[u8]) -> StorageResult<String> {
        let image = self.transcoder.decode(raw)?;
        let url = self.transcoder.convert(&image, &spec)?;
        Counters::bump(&self.counters.transcodes);

        self.decoded()?.set(spec, id, url.clone());
        Ok(url)
    }

    fn render_from_disk(
        &self,
        id: ImageId,
        spec: ImageSpecification,
        raw: Vec<u8>,
    ) -> StorageResult<String> {
        let raw = Arc::new(raw);
        let url = self.render(id, spec, &raw)?;
        self.origin()?.set(ImageSpecification::Origin, id, raw);
        Ok(url)
    }

    /// Resolve a renderable representation (blocking)
    ///
    /// `None` when the image has no stored payload. The specification
    /// defaults to `Origin`.
    pub fn resolve_render_url(
        &self,
        id: ImageId,
        spec: Option<ImageSpecification>,
    ) -> StorageResult<Option<String>> {
        let spec = spec.unwrap_or_default();

        match self.lookup(id, spec)? {
            Lookup::Decoded(url) => Ok(Some(url)),
            Lookup::Origin(raw) => self.render(id, spec, &raw).map(Some),
            Lookup::Missing => Ok(None),
            Lookup::Disk(entry) => {
                Counters::bump(&self.counters.disk_reads);
                let raw = self.blocks.read(&entry.blocks, entry.size as usize)?;
                self.render_from_disk(id, spec, raw).map(Some)
            }
        }
    }

    /// Resolve a renderable representation without blocking the runtime
    pub async fn resolve_render_url_async(
        &self,
        id: ImageId,
        spec: Option<ImageSpecification>,
    ) -> StorageResult<Option<String>> {
        let spec = spec.unwrap_or_default();

        let entry = match self.lookup(id, spec)? {
            Lookup::Decoded(url) => return Ok(Some(url)),
            Lookup::Origin(raw) => return self.render(id, spec, &raw).map(Some),
            Lookup::Missing => return Ok(None),
            Lookup::Disk(entry) => entry,
        };

        Counters::bump(&self.counters.disk_reads);
        let raw = self
            .blocks
            .read_async(&entry.blocks, entry.size as usize)
            .await?;
        self.render_from_disk(id, spec, raw).map(Some)
    }

    /// Resolve a renderable representation and hand it to `callback`
    ///
    /// The callback runs exactly once. Outside a Tokio runtime it is invoked
    /// immediately with a `Task` error.
    pub fn resolve_render_url_with<F>(
        self: &Arc<Self>,
        id: ImageId,
        spec: Option<ImageSpecification>,
        callback: F,
    ) where
        F: FnOnce(StorageResult<Option<String>>) + Send + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                callback(Err(StorageError::Task(format!("No Tokio runtime: {}", e))));
                return;
            }
        };

        let engine = Arc::clone(self);
        handle.spawn(async move {
            let result = engine.resolve_render_url_async(id, spec).await;
            callback(result);
        });
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageResult<StorageStats> {
        let (image_count, tag_count, payload_count, block_high_water) = {
            let index = self.index_read()?;
            (
                index.images().len(),
                index.tags().len(),
                index.block_entry_count(),
                index.block_max(),
            )
        };

        Ok(StorageStats {
            image_count,
            tag_count,
            payload_count,
            block_high_water,
            segment_count: self.blocks.segment_files()?.len(),
            storage_size_bytes: self.blocks.disk_usage()?,
            disk_reads: self.counters.disk_reads.load(Ordering::Relaxed),
            transcodes: self.counters.transcodes.load(Ordering::Relaxed),
            decoded_hits: self.counters.decoded_hits.load(Ordering::Relaxed),
            origin_hits: self.counters.origin_hits.load(Ordering::Relaxed),
            decoded_cached: self.decoded()?.len(),
            origin_cached: self.origin()?.len(),
        })
    }

    /// Get the storage folder path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub image_count: usize,
    pub tag_count: usize,
    pub payload_count: usize,
    pub block_high_water: i64,
    pub segment_count: usize,
    pub storage_size_bytes: u64,
    pub disk_reads: u64,
    pub transcodes: u64,
    pub decoded_hits: u64,
    pub origin_hits: u64,
    pub decoded_cached: usize,
    pub origin_cached: usize,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Images: {}, Tags: {}, Payloads: {}, Blocks: {}, Segments: {}, Size: {:.2} MB, \
             Disk reads: {}, Transcodes: {}, Cache hits: {}/{}",
            self.image_count,
            self.tag_count,
            self.payload_count,
            self.block_high_water + 1,
            self.segment_count,
            self.storage_size_bytes as f64 / (1024.0 * 1024.0),
            self.disk_reads,
            self.transcodes,
            self.decoded_hits,
            self.origin_hits
        )
    }
}
