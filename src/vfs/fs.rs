//! Flat-namespace filesystem over a whole-object store.
//!
//! `BundleFs` answers name-based calls from the transport. Attribute and
//! listing answers come from two caches when possible; content access pulls
//! the whole object into a `FileHandle`, and only a handle save writes back.

use crate::cadapter::store::{ObjectStore, StoreError};
use crate::vfs::cache::{ListingCache, SizeCache};
use crate::vfs::config::VfsConfig;
use crate::vfs::error::VfsError;
use crate::vfs::handle::FileHandle;
use async_trait::async_trait;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    File,
    Dir,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: FileType,
    pub size: u64,
}

impl FileAttr {
    pub fn file(size: u64) -> Self {
        Self {
            kind: FileType::File,
            size,
        }
    }

    pub fn dir() -> Self {
        Self {
            kind: FileType::Dir,
            size: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileType,
}

/// Space statistics of the local scratch filesystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// Name-based filesystem operations a transport drives.
///
/// Names are relative to the root and never contain `/` or NUL, nor are they
/// `.` or `..`; the empty name is the root directory.
#[async_trait]
pub trait PathFileSystem: Send + Sync + 'static {
    type File: FileOps + 'static;

    async fn get_attr(&self, name: &str) -> Result<FileAttr, VfsError>;

    /// Attributes answerable without any store call, if known.
    fn cached_attr(&self, name: &str) -> Option<FileAttr>;

    async fn open_dir(&self, name: &str) -> Result<Vec<DirEntry>, VfsError>;

    async fn open(&self, name: &str) -> Result<Self::File, VfsError>;

    async fn create(&self, name: &str) -> Result<Self::File, VfsError>;

    async fn unlink(&self, name: &str) -> Result<(), VfsError>;

    fn chmod(&self, name: &str, mode: u32) -> Result<(), VfsError>;

    fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<(), VfsError>;

    fn statfs(&self) -> Option<FsStats>;
}

/// Operations on one open file. Reads and writes never touch the store.
#[async_trait]
pub trait FileOps: Send + Sync {
    fn get_attr(&self) -> FileAttr;

    /// Up to `len` bytes from `offset`; empty past the end.
    fn read(&self, len: usize, offset: u64) -> &[u8];

    /// Returns the number of bytes written: `content.len()`, or 0 when the
    /// write would grow the file past `MAX_FILE_SIZE`.
    fn write(&mut self, content: &[u8], offset: u64) -> usize;

    fn truncate(&mut self, size: u64);

    async fn flush(&self) -> Result<(), VfsError>;

    async fn fsync(&self, flags: u32) -> Result<(), VfsError>;
}

struct FsInner<S: ObjectStore> {
    store: S,
    config: VfsConfig,
    sizes: Mutex<SizeCache>,
    // tokio mutex: a refresh holds it across the store call so concurrent
    // lookups wait for one listing instead of each issuing their own
    listing: tokio::sync::Mutex<ListingCache>,
    name_locks: NameLocks,
}

type NameLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Held while a name's remote object and its size entry change together.
pub(crate) struct NameGuard {
    name: String,
    locks: NameLocks,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap();
        // only the map and this guard refer to the lock: nobody is waiting
        if locks
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            locks.remove(&self.name);
        }
    }
}

/// Cheap to clone; handles keep a clone as their back-reference.
pub struct BundleFs<S: ObjectStore> {
    inner: Arc<FsInner<S>>,
}

impl<S: ObjectStore> Clone for BundleFs<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn check_name(name: &str) -> Result<(), VfsError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(VfsError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl<S: ObjectStore> BundleFs<S> {
    pub fn new(store: S, config: VfsConfig) -> Self {
        let sizes = SizeCache::new(config.size_cache_capacity);
        Self {
            inner: Arc::new(FsInner {
                store,
                config,
                sizes: Mutex::new(sizes),
                listing: tokio::sync::Mutex::new(ListingCache::new()),
                name_locks: NameLocks::default(),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &VfsConfig {
        &self.inner.config
    }

    /// Serializes uploads, deletes and size updates of `name`.
    pub(crate) async fn lock_name(&self, name: &str) -> NameGuard {
        let lock = self
            .inner
            .name_locks
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone();
        NameGuard {
            name: name.to_string(),
            locks: self.inner.name_locks.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Called by a handle after a successful upload, under `lock_name`.
    pub(crate) async fn record_save(&self, name: &str, size: u64) {
        self.inner.sizes.lock().unwrap().set(name, size);
        self.expire_listing().await;
    }

    async fn expire_listing(&self) {
        self.inner.listing.lock().await.invalidate();
    }

    /// Returns the listing, refetched first when stale. A failed refetch
    /// keeps the previous snapshot.
    async fn listing(&self) -> tokio::sync::MutexGuard<'_, ListingCache> {
        let mut listing = self.inner.listing.lock().await;
        if !listing.is_fresh(self.inner.config.listing_ttl) {
            match self.inner.store.list("").await {
                Ok(names) => {
                    debug!(count = names.len(), "listing refreshed");
                    listing.replace(names);
                }
                Err(e) => warn!(error = %e, "listing refresh failed, keeping previous snapshot"),
            }
        }
        listing
    }

    fn downgrade(name: &str, op: &'static str, source: StoreError) -> VfsError {
        warn!(name, op, error = %source, "store failure reported as not found");
        VfsError::NotFound {
            name: name.to_string(),
            source: Some(source),
        }
    }
}

#[async_trait]
impl<S: ObjectStore> PathFileSystem for BundleFs<S> {
    type File = FileHandle<S>;

    async fn get_attr(&self, name: &str) -> Result<FileAttr, VfsError> {
        debug!(name, "get_attr");
        if name.is_empty() {
            return Ok(FileAttr::dir());
        }
        check_name(name)?;

        let cached = self.inner.sizes.lock().unwrap().get(name);
        if let Some(size) = cached {
            return Ok(FileAttr::file(size));
        }

        let present = self.listing().await.contains(name);
        if !present {
            return Err(VfsError::not_found(name));
        }
        let object = self
            .inner
            .store
            .get(name)
            .await
            .map_err(|e| Self::downgrade(name, "get_attr", e))?;
        let size = tokio::fs::metadata(object.path())
            .await
            .map_err(|source| {
                let e = StoreError::Scratch {
                    path: object.path().to_path_buf(),
                    source,
                };
                Self::downgrade(name, "get_attr", e)
            })?
            .len();
        self.inner.sizes.lock().unwrap().populate(name, size);
        Ok(FileAttr::file(size))
    }

    fn cached_attr(&self, name: &str) -> Option<FileAttr> {
        if name.is_empty() {
            return Some(FileAttr::dir());
        }
        let size = self.inner.sizes.lock().unwrap().get(name)?;
        Some(FileAttr::file(size))
    }

    async fn open_dir(&self, name: &str) -> Result<Vec<DirEntry>, VfsError> {
        debug!(name, "open_dir");
        if !name.is_empty() {
            return Err(VfsError::not_found(name));
        }
        let listing = self.listing().await;
        Ok(listing
            .names()
            .iter()
            .map(|n| DirEntry {
                name: n.clone(),
                kind: FileType::File,
            })
            .collect())
    }

    async fn open(&self, name: &str) -> Result<FileHandle<S>, VfsError> {
        debug!(name, "open");
        check_name(name)?;
        let object = self
            .inner
            .store
            .get(name)
            .await
            .map_err(|e| Self::downgrade(name, "open", e))?;
        let data = tokio::fs::read(object.path()).await.map_err(|source| {
            let e = StoreError::Scratch {
                path: object.path().to_path_buf(),
                source,
            };
            Self::downgrade(name, "open", e)
        })?;
        Ok(FileHandle::new(name.to_string(), data, self.clone(), object))
    }

    async fn create(&self, name: &str) -> Result<FileHandle<S>, VfsError> {
        debug!(name, "create");
        check_name(name)?;
        let store_err = |source: StoreError| {
            warn!(name, error = %source, "create failed");
            VfsError::Store {
                name: name.to_string(),
                source,
            }
        };
        // the empty object goes up before the handle exists, so a created
        // file is always visible remotely
        let object = self
            .inner
            .store
            .new_object_from_content(&[], name)
            .await
            .map_err(store_err)?;
        {
            let _name = self.lock_name(name).await;
            object.upload(&self.inner.store).await.map_err(store_err)?;
            self.inner.sizes.lock().unwrap().set(name, 0);
        }
        self.expire_listing().await;
        Ok(FileHandle::new(
            name.to_string(),
            Vec::new(),
            self.clone(),
            object,
        ))
    }

    async fn unlink(&self, name: &str) -> Result<(), VfsError> {
        debug!(name, "unlink");
        check_name(name)?;
        {
            let _name = self.lock_name(name).await;
            if let Err(e) = self.inner.store.delete(name).await {
                warn!(name, error = %e, "delete failed, ignored");
            }
            self.inner.sizes.lock().unwrap().remove(name);
        }
        self.expire_listing().await;
        Ok(())
    }

    fn chmod(&self, name: &str, mode: u32) -> Result<(), VfsError> {
        debug!(name, mode, "chmod ignored");
        Ok(())
    }

    fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<(), VfsError> {
        debug!(name, uid, gid, "chown ignored");
        Ok(())
    }

    fn statfs(&self) -> Option<FsStats> {
        let path = self
            .inner
            .config
            .statfs_path
            .as_deref()
            .unwrap_or_else(|| self.inner.store.scratch_dir());
        match statvfs(path) {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(path = ?path, error = %e, "statfs unavailable");
                None
            }
        }
    }
}

fn statvfs(path: &Path) -> std::io::Result<FsStats> {
    let c_path = CString::new(path.as_os_str().as_bytes())?;
    // SAFETY: statvfs is plain-old-data; zeroed is a valid initial value
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and st is a valid out pointer
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(FsStats {
        blocks: st.f_blocks as u64,
        bfree: st.f_bfree as u64,
        bavail: st.f_bavail as u64,
        files: st.f_files as u64,
        ffree: st.f_ffree as u64,
        bsize: st.f_bsize as u32,
        namelen: st.f_namemax as u32,
        frsize: st.f_frsize as u32,
    })
}
