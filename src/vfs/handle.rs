//! Open-file handle: the whole object held in memory between open and flush.

use crate::cadapter::store::{ObjectStore, StoreError, StoreObject};
use crate::vfs::error::VfsError;
use crate::vfs::fs::{BundleFs, FileAttr, FileOps};
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, warn};

/// Largest size a handle buffer may grow to.
pub const MAX_FILE_SIZE: u64 = 1 << 34;

/// Buffer length for `size` bytes, or `None` when a handle may not hold it.
pub(crate) fn buffer_len(size: u64) -> Option<usize> {
    if size > MAX_FILE_SIZE {
        return None;
    }
    usize::try_from(size).ok()
}

/// One open file.
///
/// `data` is the only copy of the content until the next successful save.
/// Handles are never shared: two opens of one name give two buffers and the
/// last save wins.
pub struct FileHandle<S: ObjectStore> {
    name: String,
    data: Vec<u8>,
    fs: BundleFs<S>,
    object: StoreObject,
}

impl<S: ObjectStore> FileHandle<S> {
    pub(crate) fn new(name: String, data: Vec<u8>, fs: BundleFs<S>, object: StoreObject) -> Self {
        Self {
            name,
            data,
            fs,
            object,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Writes the buffer to the object's scratch file and uploads it.
    ///
    /// On success the adapter's size entry for this name is overwritten and
    /// its listing snapshot expired. The buffer is never modified.
    pub async fn save(&self) -> Result<(), StoreError> {
        // held until the size is recorded, so saves of one name apply in order
        let _name = self.fs.lock_name(&self.name).await;
        tokio::fs::write(self.object.path(), &self.data)
            .await
            .map_err(|source| StoreError::Scratch {
                path: self.object.path().to_path_buf(),
                source,
            })?;
        self.object.upload(self.fs.store()).await?;
        self.fs.record_save(&self.name, self.data.len() as u64).await;
        debug!(name = %self.name, len = self.data.len(), "saved");
        Ok(())
    }

    async fn save_or_io(&self, op: &'static str) -> Result<(), VfsError> {
        self.save().await.map_err(|source| {
            warn!(name = %self.name, op, error = %source, "save failed");
            VfsError::Io {
                name: self.name.clone(),
                source,
            }
        })
    }
}

#[async_trait]
impl<S: ObjectStore> FileOps for FileHandle<S> {
    fn get_attr(&self) -> FileAttr {
        FileAttr::file(self.data.len() as u64)
    }

    fn read(&self, len: usize, offset: u64) -> &[u8] {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        &self.data[start..end]
    }

    fn write(&mut self, content: &[u8], offset: u64) -> usize {
        let end = offset
            .checked_add(content.len() as u64)
            .and_then(buffer_len);
        let Some(end) = end else {
            warn!(
                name = %self.name,
                offset,
                len = content.len(),
                "write past maximum file size ignored"
            );
            return 0;
        };
        let start = end - content.len();
        // a gap between the old end and `offset` reads back as zeros
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(content);
        content.len()
    }

    fn truncate(&mut self, size: u64) {
        match buffer_len(size) {
            Some(len) => self.data.resize(len, 0),
            None => warn!(name = %self.name, size, "truncate past maximum file size ignored"),
        }
    }

    async fn flush(&self) -> Result<(), VfsError> {
        self.save_or_io("flush").await
    }

    async fn fsync(&self, _flags: u32) -> Result<(), VfsError> {
        self.save_or_io("fsync").await
    }
}

impl<S: ObjectStore> fmt::Debug for FileHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.data[..self.data.len().min(10)];
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("head", &hex::encode(head))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::fs::PathFileSystem;
    use crate::vfs::test_util::memory_fs;

    #[tokio::test]
    async fn test_write_then_read_back() {
        let (fs, _backend, _scratch) = memory_fs();
        let mut f = fs.create("w").await.unwrap();

        assert_eq!(f.write(b"hello world", 0), 11);
        assert_eq!(f.read(5, 6), b"world");

        // overwrite in the middle keeps the tail
        assert_eq!(f.write(b"WO", 6), 2);
        assert_eq!(f.read(64, 0), b"hello WOrld");
        assert_eq!(f.get_attr().size, 11);
    }

    #[tokio::test]
    async fn test_write_at_end_and_past_end() {
        let (fs, _backend, _scratch) = memory_fs();
        let mut f = fs.create("w").await.unwrap();

        f.write(b"abc", 0);
        f.write(b"def", 3);
        assert_eq!(f.read(6, 0), b"abcdef");

        f.write(b"z", 8);
        assert_eq!(f.read(16, 0), b"abcdef\0\0z");
        assert_eq!(f.len(), 9);
    }

    #[tokio::test]
    async fn test_read_out_of_range_is_empty() {
        let (fs, _backend, _scratch) = memory_fs();
        let mut f = fs.create("r").await.unwrap();
        f.write(b"0123", 0);

        assert!(f.read(10, 4).is_empty());
        assert!(f.read(10, 100).is_empty());
        assert!(f.read(10, u64::MAX).is_empty());
        assert_eq!(f.read(usize::MAX, 2), b"23");
    }

    #[tokio::test]
    async fn test_truncate_grows_with_zeros_and_shrinks() {
        let (fs, _backend, _scratch) = memory_fs();
        let mut f = fs.create("t").await.unwrap();
        f.write(b"abc", 0);

        f.truncate(6);
        assert_eq!(f.get_attr().size, 6);
        assert_eq!(f.read(3, 3), [0u8; 3]);

        f.truncate(2);
        assert_eq!(f.get_attr().size, 2);
        assert_eq!(f.read(10, 0), b"ab");

        f.truncate(0);
        assert!(f.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_write_and_truncate_leave_buffer_alone() {
        let (fs, _backend, _scratch) = memory_fs();
        let mut f = fs.create("big").await.unwrap();
        f.write(b"abc", 0);

        assert_eq!(f.write(b"x", u64::MAX), 0);
        assert_eq!(f.write(b"xy", u64::MAX - 1), 0);
        assert_eq!(f.write(b"x", MAX_FILE_SIZE), 0);
        f.truncate(u64::MAX);
        f.truncate(MAX_FILE_SIZE + 1);
        assert_eq!(f.read(64, 0), b"abc");
        assert_eq!(buffer_len(u64::MAX), None);
    }

    #[tokio::test]
    async fn test_flush_twice_uploads_identical_content() {
        let (fs, backend, _scratch) = memory_fs();
        let mut f = fs.create("twice").await.unwrap();
        f.write(b"same", 0);
        let puts = backend.put_calls();

        f.flush().await.unwrap();
        assert_eq!(backend.peek("twice").unwrap(), b"same");
        f.flush().await.unwrap();
        assert_eq!(backend.peek("twice").unwrap(), b"same");

        assert_eq!(backend.put_calls(), puts + 2);
        assert_eq!(f.read(4, 0), b"same");
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_buffer_and_retry_succeeds() {
        let (fs, backend, _scratch) = memory_fs();
        let mut f = fs.create("retry").await.unwrap();
        f.write(b"keep me", 0);

        backend.fail_puts(true);
        let err = f.fsync(0).await.unwrap_err();
        assert!(matches!(err, VfsError::Io { .. }));
        assert_eq!(err.errno(), libc::EIO);
        assert_eq!(f.read(64, 0), b"keep me");
        assert_eq!(backend.peek("retry").unwrap(), b"");
        // a failed save must not record the unsaved size
        assert_eq!(fs.get_attr("retry").await.unwrap().size, 0);

        backend.fail_puts(false);
        f.flush().await.unwrap();
        assert_eq!(backend.peek("retry").unwrap(), b"keep me");
        assert_eq!(fs.get_attr("retry").await.unwrap().size, 7);
    }

    #[tokio::test]
    async fn test_debug_shows_head_of_buffer() {
        let (fs, _backend, _scratch) = memory_fs();
        let mut f = fs.create("dbg").await.unwrap();
        f.write(b"\x01\x02", 0);
        let s = format!("{f:?}");
        assert!(s.contains("0102"));
        assert!(s.contains("dbg"));
    }
}
