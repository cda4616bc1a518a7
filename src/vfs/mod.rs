//! VFS layer (virtual filesystem)
//!
//! Translates name-based file operations into whole-object store calls:
//! - `fs`: `BundleFs`, the `PathFileSystem` implementation, plus the
//!   attribute/entry types shared with the transport
//! - `handle`: `FileHandle`, the in-memory working copy of one open file
//! - `cache`: the LRU size cache and the TTL listing snapshot
//! - `config`: tuning knobs
//! - `error`: the error kinds surfaced to the transport
pub mod cache;
pub mod config;
pub mod error;
pub mod fs;
pub mod handle;

pub use config::VfsConfig;
pub use error::VfsError;
pub use fs::{BundleFs, DirEntry, FileAttr, FileOps, FileType, FsStats, PathFileSystem};
pub use handle::FileHandle;

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::cadapter::client::ObjectClient;
    use crate::cadapter::memory::InMemoryBackend;
    use crate::cadapter::store::{BundleStore, StoreConfig};
    use std::time::Duration;
    use tempfile::TempDir;

    pub type MemoryFs = BundleFs<BundleStore<InMemoryBackend>>;

    pub fn memory_fs_with_timeout(timeout: Duration) -> (MemoryFs, InMemoryBackend, TempDir) {
        memory_fs_with(VfsConfig::default(), timeout)
    }

    pub fn memory_fs_with(
        config: VfsConfig,
        timeout: Duration,
    ) -> (MemoryFs, InMemoryBackend, TempDir) {
        let scratch = tempfile::tempdir().unwrap();
        let backend = InMemoryBackend::new();
        let store = BundleStore::new(
            ObjectClient::new(backend.clone()),
            StoreConfig {
                scratch_dir: scratch.path().to_path_buf(),
                timeout,
            },
        );
        (BundleFs::new(store, config), backend, scratch)
    }

    /// Filesystem over a fresh in-memory backend; keep the `TempDir` alive
    /// for as long as the filesystem is used.
    pub fn memory_fs() -> (MemoryFs, InMemoryBackend, TempDir) {
        memory_fs_with_timeout(Duration::from_secs(5))
    }
}
