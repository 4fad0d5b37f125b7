//! # animedl - anime episode downloader
//!
//! Resolves episode pages into media candidates and hands them to a
//! transfer engine, retrying with backoff and falling back to a generic
//! engine when a site-specific strategy runs out of options.
//!
//! ## Features
//!
//! - Pluggable extraction strategies with a generic default
//! - Retry with exponential backoff and a longer cool-down after HTTP 429
//! - Progress events normalised from raw engine output
//! - Free-space guard before any transfer
//! - Sequential or bounded-parallel batches
//!
//! ## Example
//!
//! ```rust,no_run
//! use animedl::{Downloader, ExtractorRegistry, HttpClientConfig, PageClient, YtDlpEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(PageClient::with_config(HttpClientConfig::default())?);
//!     let registry = ExtractorRegistry::with_builtin(client, &[]);
//!     let downloader = Downloader::new(Arc::new(registry), Arc::new(YtDlpEngine::default()))
//!         .with_output_dir("./downloads");
//!
//!     let result = downloader.download_url("EPISODE_URL").await;
//!     println!("success: {}", result.success);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod core;
pub mod download;
pub mod error;
pub mod platform;
pub mod utils;

// Re-export main types
pub use core::{
    BatchDownloader, BatchMode, BatchSummary, DownloadOptions, DownloadResult, Downloader,
    EpisodeRequest, ExtractionResult, ProgressEvent, ProgressHook, Quality,
};
pub use download::{HttpEngine, TransferEngine, YtDlpEngine};
pub use error::{AnimedlError, ErrorKind};
pub use platform::{Extractor, ExtractorRegistry, HttpClientConfig, PageClient};

/// Result type alias for animedl operations
pub type Result<T> = std::result::Result<T, AnimedlError>;
