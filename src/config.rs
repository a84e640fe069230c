//! Configuration management for OCT Streamer.
//!
//! The binary is driven by three subcommands:
//!
//! - `serve` - run the HTTP service over a persistent frame cache
//! - `evict` - drop expired cache entries once and exit
//! - `checksum` - print the checksum of a local file or a remote descriptor
//!
//! # Environment Variables
//!
//! Every `serve` option can also be set via an `OCT_`-prefixed variable:
//!
//! - `OCT_HOST` - Server bind address (default: 0.0.0.0)
//! - `OCT_PORT` - Server port (default: 3000)
//! - `OCT_CACHE_DIR` - Frame cache root (default: cache)
//! - `OCT_CACHE_TTL_HOURS` - Cache entry lifetime (default: 168)
//! - `OCT_JPEG_QUALITY` - Frame JPEG quality (default: 95)
//! - `OCT_CHECKSUM_MEMO` - Path → checksum memo capacity (default: 10000)
//! - `OCT_MAX_UPLOAD_MB` - Largest accepted upload (default: 2048)
//! - `OCT_MEDIAN_KERNEL` - Flattening median filter width (default: 151)
//! - `OCT_CLAHE_CLIP_LIMIT` / `OCT_CLAHE_GRID` - Contrast enhancement
//! - `OCT_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `OCT_CORS_ORIGINS` - Comma-separated allowed origins
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use oct_streamer::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("listening on {}", config.bind_address()),
//!     Command::Evict(config) => println!("evicting under {}", config.cache_dir.display()),
//!     Command::Checksum(_) => {}
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::checksum::{RemoteDescriptor, DEFAULT_MEMO_CAPACITY};
use crate::flatten::{
    ContrastMethod, FlattenConfig, DEFAULT_CLAHE_GRID, DEFAULT_CLIP_LIMIT, DEFAULT_MEDIAN_KERNEL,
};
use crate::raster::DEFAULT_JPEG_QUALITY;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default frame cache root.
pub const DEFAULT_CACHE_DIR: &str = "cache";

/// Default cache entry lifetime (7 days).
pub const DEFAULT_CACHE_TTL_HOURS: u64 = 168;

/// Default upload limit in MiB.
pub const DEFAULT_MAX_UPLOAD_MB: usize = 2048;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// OCT Streamer - ophthalmic imaging ingestion and frame server.
#[derive(Parser, Debug, Clone)]
#[command(name = "oct-streamer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(ServeConfig),

    /// Remove expired entries from the frame cache and exit.
    Evict(EvictConfig),

    /// Print the checksum of a file or a remote object descriptor.
    Checksum(ChecksumConfig),
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "OCT_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "OCT_PORT")]
    pub port: u16,

    /// Largest accepted upload, in MiB.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB, env = "OCT_MAX_UPLOAD_MB")]
    pub max_upload_mb: usize,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Root directory of the persistent frame cache.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "OCT_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Hours before a cache entry expires.
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL_HOURS, env = "OCT_CACHE_TTL_HOURS")]
    pub cache_ttl_hours: u64,

    /// Capacity of the path → checksum memo.
    #[arg(long, default_value_t = DEFAULT_MEMO_CAPACITY, env = "OCT_CHECKSUM_MEMO")]
    pub checksum_memo: usize,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "OCT_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // Image Configuration
    // =========================================================================
    /// JPEG quality for encoded frames (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "OCT_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Median filter width used when the boundary fit fails (odd).
    #[arg(long, default_value_t = DEFAULT_MEDIAN_KERNEL, env = "OCT_MEDIAN_KERNEL")]
    pub median_kernel: usize,

    /// CLAHE clip limit.
    #[arg(long, default_value_t = DEFAULT_CLIP_LIMIT, env = "OCT_CLAHE_CLIP_LIMIT")]
    pub clahe_clip_limit: f64,

    /// CLAHE tile grid size.
    #[arg(long, default_value_t = DEFAULT_CLAHE_GRID, env = "OCT_CLAHE_GRID")]
    pub clahe_grid: usize,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "OCT_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err("Cache directory is required. Set --cache-dir or OCT_CACHE_DIR".to_string());
        }

        if self.cache_ttl_hours == 0 {
            return Err("cache_ttl_hours must be greater than 0".to_string());
        }

        if self.checksum_memo == 0 {
            return Err("checksum_memo must be greater than 0".to_string());
        }

        if self.max_upload_mb == 0 {
            return Err("max_upload_mb must be greater than 0".to_string());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.median_kernel == 0 || self.median_kernel % 2 == 0 {
            return Err("median_kernel must be a positive odd number".to_string());
        }

        if !self.clahe_clip_limit.is_finite() || self.clahe_clip_limit <= 0.0 {
            return Err("clahe_clip_limit must be a positive number".to_string());
        }

        if self.clahe_grid == 0 {
            return Err("clahe_grid must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Flattening settings derived from the CLI knobs.
    pub fn flatten_config(&self) -> FlattenConfig {
        FlattenConfig::default()
            .with_median_kernel(self.median_kernel)
            .with_contrast(ContrastMethod::Clahe {
                clip_limit: self.clahe_clip_limit,
                grid: self.clahe_grid,
            })
    }
}

// =============================================================================
// Evict
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct EvictConfig {
    /// Root directory of the persistent frame cache.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "OCT_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Entries older than this many hours are removed.
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL_HOURS)]
    pub max_age_hours: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl EvictConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }
}

// =============================================================================
// Checksum
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ChecksumConfig {
    /// Local file to checksum by content.
    #[arg(long, conflicts_with_all = ["path", "size", "last_modified", "frame"])]
    pub file: Option<PathBuf>,

    /// Remote object path.
    #[arg(long)]
    pub path: Option<String>,

    /// Remote object size in bytes.
    #[arg(long, requires = "path")]
    pub size: Option<u64>,

    /// Remote object last-modified stamp.
    #[arg(long, requires = "path")]
    pub last_modified: Option<String>,

    /// Frame number within the remote object.
    #[arg(long, requires = "path")]
    pub frame: Option<u32>,
}

impl ChecksumConfig {
    pub fn validate(&self) -> Result<(), String> {
        match (&self.file, &self.path) {
            (None, None) => Err("Either --file or --path is required".to_string()),
            (Some(_), Some(_)) => Err("--file and --path are mutually exclusive".to_string()),
            (Some(file), None) if file.as_os_str().is_empty() => {
                Err("--file must not be empty".to_string())
            }
            (None, Some(path)) if path.is_empty() => Err("--path must not be empty".to_string()),
            _ => Ok(()),
        }
    }

    /// The remote descriptor, when `--path` was given.
    pub fn descriptor(&self) -> Option<RemoteDescriptor> {
        let path = self.path.as_ref()?;
        Some(RemoteDescriptor {
            path: path.clone(),
            size: self.size,
            last_modified: self.last_modified.clone(),
            frame: self.frame,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
