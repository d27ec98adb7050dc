//! Photovault CLI
//!
//! Command-line interface over a local photovault storage folder:
//! - Import image files
//! - List records and tags
//! - Render an image to a data URL
//! - Delete records and inspect statistics

use anyhow::{bail, Context};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use clap::{Parser, Subcommand, ValueEnum};
use photovault::config::{generate_default_config, Config, LoggingConfig};
use photovault::storage::*;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "photovault")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Encrypted local image store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Storage folder (overrides config)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Index passphrase
    #[arg(long, env = "PHOTOVAULT_KEY", hide_env_values = true, global = true)]
    pub key: Option<String>,

    /// Config file (default: standard locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OrderArg {
    Id,
    Created,
    Title,
}

impl From<OrderArg> for ImageOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Id => ImageOrder::Id,
            OrderArg::Created => ImageOrder::CreatedAt,
            OrderArg::Title => ImageOrder::Title,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import image files as new records
    Import {
        /// Files to import
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Tag applied to every imported image
        #[arg(short, long)]
        tag: Vec<String>,
        /// Title (default: file name)
        #[arg(long)]
        title: Option<String>,
    },

    /// List image records
    List {
        /// Required tags (all must match)
        #[arg(short, long)]
        tag: Vec<String>,
        /// Alternative tags (at least one must match)
        #[arg(long)]
        any: Vec<String>,
        /// Sort field
        #[arg(long, value_enum)]
        order: Option<OrderArg>,
        /// Ascending order
        #[arg(long)]
        asc: bool,
    },

    /// List known tags
    Tags {
        /// Only tags containing this text
        #[arg(long)]
        contains: Option<String>,
        /// Sort alphabetically
        #[arg(long)]
        sorted: bool,
    },

    /// Render an image
    Render {
        /// Image id
        id: ImageId,
        /// origin, thumbnail, preview or fit:WxH
        #[arg(short, long, default_value = "origin")]
        spec: ImageSpecification,
        /// Write decoded bytes here instead of printing the URL
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete image records
    Delete {
        /// Image ids
        #[arg(required = true)]
        ids: Vec<ImageId>,
    },

    /// Show storage statistics
    Stats,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    // Logging depends on the config, so load failures surface as errors
    let config_path = cli.config.clone().or_else(Config::find_default_path);
    let mut config = match &config_path {
        Some(path) => Config::load_with_env(path)?,
        None => Config::from_env(),
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.to_string_lossy().to_string();
    }
    init_logging(&config.logging);
    match &config_path {
        Some(path) => tracing::debug!("Loaded config from {:?}", path),
        None => tracing::debug!("Using default config with environment overrides"),
    }

    let key = cli
        .key
        .clone()
        .or_else(|| config.storage.key.clone())
        .context("no passphrase: pass --key or set PHOTOVAULT_KEY")?;

    let engine = StorageEngine::with_passphrase(config.engine_config(), &key);
    if !engine.connect()? {
        bail!(
            "cannot open index at {}: wrong passphrase or damaged file",
            engine.config().index_path().display()
        );
    }

    match cli.command {
        Commands::Import { files, tag, title } => {
            let mut next = engine.next_id()?;
            let mut images = Vec::with_capacity(files.len());
            for path in &files {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let name = title.clone().or_else(|| {
                    path.file_name()
                        .map(|n| n.to_string_lossy().to_string())
                });
                let mut image = Image::new(next).tags(tag.iter().cloned()).buffer(bytes);
                if let Some(name) = name {
                    image = image.title(name);
                }
                images.push(image);
                next += 1;
            }

            let created = engine.create_async(images).await?;
            engine.close()?;

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&created)?),
                OutputFormat::Table => {
                    for image in &created {
                        println!("Imported #{} {}", image.id, image.title.as_deref().unwrap_or(""));
                    }
                }
            }
        }

        Commands::List {
            tag,
            any,
            order,
            asc,
        } => {
            let mut filter = ImageFilter::new();
            for t in tag {
                filter = filter.tag(t);
            }
            for t in any {
                filter = filter.any_tag(t);
            }
            if let Some(order) = order {
                filter = filter.order(order.into());
            }
            if asc {
                filter = filter.desc(false);
            }

            let images = engine.find(Some(&filter))?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&images)?),
                OutputFormat::Table => print_images(&images),
            }
        }

        Commands::Tags { contains, sorted } => {
            let mut filter = TagFilter::new();
            if let Some(needle) = contains {
                filter = filter.contains(needle);
            }
            if sorted {
                filter = filter.sorted();
            }

            let tags = engine.find_tags(Some(&filter))?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tags)?),
                OutputFormat::Table => {
                    for tag in &tags {
                        println!("{}", tag);
                    }
                }
            }
        }

        Commands::Render { id, spec, output } => {
            let Some(url) = engine.resolve_render_url_async(id, Some(spec)).await? else {
                bail!("image {} has no stored payload", id);
            };

            match output {
                Some(path) => {
                    let bytes = decode_data_url(&url).unwrap_or_else(|| url.into_bytes());
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Wrote {} bytes to {}", bytes.len(), path.display());
                }
                None => println!("{}", url),
            }
        }

        Commands::Delete { ids } => {
            let removed = engine.delete(ids)?;
            engine.close()?;
            println!("Deleted {} image(s)", removed);
        }

        Commands::Stats => {
            let stats = engine.stats()?;
            match cli.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "images": stats.image_count,
                        "tags": stats.tag_count,
                        "payloads": stats.payload_count,
                        "block_high_water": stats.block_high_water,
                        "segments": stats.segment_count,
                        "storage_size_bytes": stats.storage_size_bytes,
                    })
                ),
                OutputFormat::Table => println!("{}", stats),
            }
        }

        Commands::Config { .. } => unreachable!("handled before connecting"),
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("photovault={}", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Payload bytes of a `data:...;base64,` URL
fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let (_, encoded) = url.strip_prefix("data:")?.split_once(";base64,")?;
    BASE64_STANDARD.decode(encoded).ok()
}

fn print_images(images: &[Image]) {
    if images.is_empty() {
        println!("No images");
        return;
    }

    println!("{:<8} {:<20} {:<30} {}", "ID", "Created", "Title", "Tags");
    println!("{}", "-".repeat(80));
    for image in images {
        println!(
            "{:<8} {:<20} {:<30} {}",
            image.id,
            image.created_at.format("%Y-%m-%d %H:%M:%S"),
            image.title.as_deref().unwrap_or("-"),
            image.tags.join(", ")
        );
    }
}
