//! Core functionality for animedl

pub mod batch;
pub mod downloader;
pub mod progress;
pub mod types;

pub use batch::*;
pub use downloader::*;
pub use progress::*;
pub use types::*;
