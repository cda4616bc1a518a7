//! Filesystem layer tuning knobs.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Default freshness window of the cached directory listing.
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(300);
/// Default number of names kept in the size cache.
pub const DEFAULT_SIZE_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(200).unwrap();

#[derive(Debug, Clone)]
pub struct VfsConfig {
    /// Max age of a listing snapshot before it is refetched.
    pub listing_ttl: Duration,
    pub size_cache_capacity: NonZeroUsize,
    /// Directory whose statvfs answers `statfs`. Defaults to the store's
    /// scratch directory when unset.
    pub statfs_path: Option<PathBuf>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            listing_ttl: DEFAULT_LISTING_TTL,
            size_cache_capacity: DEFAULT_SIZE_CACHE_CAPACITY,
            statfs_path: None,
        }
    }
}
