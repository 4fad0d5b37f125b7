//! Free-space guard for the download directory

use std::path::Path;
use tracing::{debug, warn};

/// Default minimum free space required before a download starts (1 GiB)
pub const DEFAULT_MIN_FREE_SPACE: u64 = 1024 * 1024 * 1024;

/// Outcome of a free-space check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceCheck {
    /// Enough space is available
    Sufficient(u64),
    /// Less than the configured minimum is available
    Insufficient { available: u64, required: u64 },
    /// The platform query failed; callers proceed as if space were unbounded
    Unknown,
}

/// Checks free space on the volume holding a target directory
#[derive(Debug, Clone)]
pub struct DiskGuard {
    min_free_bytes: u64,
}

impl DiskGuard {
    pub fn new(min_free_bytes: u64) -> Self {
        Self { min_free_bytes }
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_bytes
    }

    /// Query free space; never fails, a platform error yields `SpaceCheck::Unknown`
    pub fn check(&self, path: &Path) -> SpaceCheck {
        match available_space(path) {
            Some(available) if available < self.min_free_bytes => SpaceCheck::Insufficient {
                available,
                required: self.min_free_bytes,
            },
            Some(available) => {
                debug!("Free space at {}: {} bytes", path.display(), available);
                SpaceCheck::Sufficient(available)
            }
            None => {
                warn!(
                    "Could not determine free space at {}, continuing",
                    path.display()
                );
                SpaceCheck::Unknown
            }
        }
    }
}

impl Default for DiskGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FREE_SPACE)
    }
}

/// Free bytes on the volume containing `path`, or `None` when unknown
pub fn available_space(path: &Path) -> Option<u64> {
    fs2::available_space(path).ok()
}
