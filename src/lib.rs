//! # Photovault
//!
//! Local storage engine for a desktop photo manager: image payloads in
//! block-segmented files, an encrypted metadata index, and a two-tier
//! decode cache for fast repeated rendering.
//!
//! ## Features
//!
//! - **Block storage**: Payloads split into 64 KiB blocks over 64 MiB segment files
//! - **Encrypted index**: Records and block table sealed with XChaCha20-Poly1305
//! - **Tiered cache**: Rendered representations and raw payloads kept in LRUs
//! - **Dual I/O paths**: Blocking calls and Tokio-based async/callback calls
//!
//! ## Modules
//!
//! - [`storage`]: Core storage engine
//! - [`config`]: File and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photovault::storage::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = StorageEngine::with_passphrase(StorageConfig::new("./photos"), "passphrase");
//!     assert!(engine.connect()?);
//!
//!     let id = engine.next_id()?;
//!     engine
//!         .create_async(vec![Image::new(id).tag("cat").buffer(std::fs::read("cat.png")?)])
//!         .await?;
//!
//!     let cats = engine.find(Some(&ImageFilter::new().tag("cat")))?;
//!     println!("Found {} cat photos", cats.len());
//!
//!     let url = engine
//!         .resolve_render_url_async(id, Some(ImageSpecification::Thumbnail))
//!         .await?;
//!     println!("Rendered: {}", url.is_some());
//!
//!     engine.close()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Image, ImageFilter, ImageId, ImageOrder, ImageSpecification, StorageConfig, StorageEngine,
    StorageError, StorageResult, StorageStats, TagFilter,
};

pub use config::{
    CacheConfig, Config, ConfigError, LoggingConfig, StorageConfig as ConfigStorageConfig,
};
