//! Photovault Storage Engine
//!
//! This module provides the local image store:
//!
//! - **types**: Core data structures (Image, ImageSpecification, filters)
//! - **block**: Fixed-size block allocation over segment files
//! - **crypto**: Index artifact encryption
//! - **index**: In-memory metadata index and its snapshot
//! - **cache**: LRU caches for rendered and raw payloads
//! - **transcoder**: Raw payload → renderable representation
//! - **engine**: Main storage engine orchestrating all components
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Image → allocate blocks → segment files → MetadataIndex (memory) → data.db on close
//!
//! Read Path:
//!   render(id, spec) → decoded cache → origin cache → segment files → transcoder
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use photovault::storage::{Image, ImageSpecification, StorageConfig, StorageEngine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = StorageEngine::with_passphrase(StorageConfig::new("./photos"), "passphrase");
//!     if !engine.connect()? {
//!         return Err("wrong passphrase or damaged index".into());
//!     }
//!
//!     let id = engine.next_id()?;
//!     let bytes = std::fs::read("cat.png")?;
//!     engine.create(vec![Image::new(id).tags(["cat", "outdoor"]).buffer(bytes)])?;
//!
//!     let url = engine.resolve_render_url(id, Some(ImageSpecification::Thumbnail))?;
//!     println!("{:?}", url.map(|u| u.len()));
//!
//!     engine.close()?;
//!     Ok(())
//! }
//! ```

pub mod block;
pub mod cache;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod index;
pub mod transcoder;
pub mod types;

// Re-export commonly used types
pub use block::{allocate, BlockFileManager, BLOCKS_PER_FILE, BLOCK_SIZE};
pub use cache::BufferCache;
pub use crypto::{IndexCipher, XChaChaCipher};
pub use engine::{StorageConfig, StorageEngine, StorageStats};
pub use error::{StorageError, StorageResult};
pub use index::MetadataIndex;
pub use transcoder::{DataUrlTranscoder, ImageTranscoder, RawImage};
pub use types::{
    BlockEntry, Image, ImageFilter, ImageId, ImageOrder, ImageSpecification, TagFilter,
};
