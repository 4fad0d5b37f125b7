//! Utility functions for animedl

pub mod disk;
pub mod filename;
pub mod mime;
pub mod url;

pub use disk::*;
pub use filename::*;
pub use mime::*;
pub use self::url::*;
