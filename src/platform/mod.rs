//! Episode page access and extraction strategies

pub mod client;
pub mod embed;
pub mod extractor;
pub mod generic;
pub mod registry;

pub use client::*;
pub use embed::*;
pub use extractor::*;
pub use generic::*;
pub use registry::*;
