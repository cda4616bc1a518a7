//! FUSE adapter and request handling
//!
//! `FuseAdapter` implements the rfuse3 `Filesystem` trait over any
//! `PathFileSystem`. The kernel speaks inodes and file handles; the layer
//! below speaks flat names and owned `FileOps` values, so this module keeps
//! two tables: inode <-> name (`inode`) and fh -> open file.
//!
//! Only the root is a directory. Requests naming any other parent fail with
//! ENOENT.
pub mod inode;
pub mod mount;

use crate::vfs::handle::buffer_len;
use crate::vfs::{FileAttr as VfsFileAttr, FileOps, FileType as VfsFileType, PathFileSystem};
use bytes::Bytes;
use inode::{InodeTable, ROOT_INODE};
use libc::c_int;
use rfuse3::Result as FuseResult;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, ReplyAttr, ReplyCreated, ReplyData, ReplyDirectory,
    ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::debug;

use futures_util::stream::{self, Stream};
use rfuse3::raw::Filesystem;
use rfuse3::{FileType as FuseFileType, SetAttr, Timestamp};

const TTL: Duration = Duration::from_secs(1);

type OpenFile<F> = Arc<tokio::sync::Mutex<<F as PathFileSystem>::File>>;

pub struct FuseAdapter<F: PathFileSystem> {
    fs: F,
    inodes: Mutex<InodeTable>,
    handles: Mutex<HashMap<u64, OpenFile<F>>>,
    next_fh: AtomicU64,
}

impl<F: PathFileSystem> FuseAdapter<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            inodes: Mutex::new(InodeTable::new()),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    fn ino_for(&self, name: &str) -> u64 {
        if name.is_empty() {
            return ROOT_INODE;
        }
        self.inodes.lock().unwrap().ino_for(name)
    }

    /// Inode for a reply the kernel keeps a reference from.
    fn lookup_ino(&self, name: &str) -> u64 {
        if name.is_empty() {
            return ROOT_INODE;
        }
        self.inodes.lock().unwrap().lookup(name)
    }

    fn name_of(&self, ino: u64) -> Result<String, c_int> {
        self.inodes
            .lock()
            .unwrap()
            .name_of(ino)
            .map(str::to_string)
            .ok_or(libc::ENOENT)
    }

    /// Name of `name` under `parent`; the namespace has one directory.
    fn child_name(parent: u64, name: &OsStr) -> Result<String, c_int> {
        if parent != ROOT_INODE {
            return Err(libc::ENOENT);
        }
        name.to_str().map(str::to_string).ok_or(libc::EINVAL)
    }

    fn insert_handle(&self, file: F::File) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles
            .lock()
            .unwrap()
            .insert(fh, Arc::new(tokio::sync::Mutex::new(file)));
        fh
    }

    fn handle(&self, fh: u64) -> Result<OpenFile<F>, c_int> {
        self.handles
            .lock()
            .unwrap()
            .get(&fh)
            .cloned()
            .ok_or(libc::EBADF)
    }

    fn open_handles(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Attributes of `ino`, from the open handle when one is given so the
    /// size reflects unsaved writes.
    async fn attr_of(&self, ino: u64, fh: Option<u64>) -> Result<VfsFileAttr, c_int> {
        if let Some(file) = fh.and_then(|fh| self.handle(fh).ok()) {
            return Ok(file.lock().await.get_attr());
        }
        let name = self.name_of(ino)?;
        self.fs.get_attr(&name).await.map_err(|e| e.errno())
    }

    async fn lookup_name(&self, parent: u64, name: &OsStr) -> Result<(u64, VfsFileAttr), c_int> {
        let name = Self::child_name(parent, name)?;
        let attr = self.fs.get_attr(&name).await.map_err(|e| e.errno())?;
        Ok((self.lookup_ino(&name), attr))
    }

    async fn open_ino(&self, ino: u64) -> Result<u64, c_int> {
        if ino == ROOT_INODE {
            return Err(libc::EISDIR);
        }
        let name = self.name_of(ino)?;
        let file = self.fs.open(&name).await.map_err(|e| e.errno())?;
        Ok(self.insert_handle(file))
    }

    async fn create_name(
        &self,
        parent: u64,
        name: &OsStr,
    ) -> Result<(u64, u64, VfsFileAttr), c_int> {
        let name = Self::child_name(parent, name)?;
        let file = self.fs.create(&name).await.map_err(|e| e.errno())?;
        let attr = file.get_attr();
        let ino = self.lookup_ino(&name);
        Ok((ino, self.insert_handle(file), attr))
    }

    async fn unlink_name(&self, parent: u64, name: &OsStr) -> Result<(), c_int> {
        let name = Self::child_name(parent, name)?;
        self.fs.unlink(&name).await.map_err(|e| e.errno())?;
        self.inodes.lock().unwrap().unlinked(&name);
        Ok(())
    }

    fn forget_ino(&self, ino: u64, nlookup: u64) {
        self.inodes.lock().unwrap().forget(ino, nlookup);
    }

    async fn set_attr(
        &self,
        ino: u64,
        fh: Option<u64>,
        set_attr: &SetAttr,
    ) -> Result<VfsFileAttr, c_int> {
        if set_attr.size.is_some_and(|size| buffer_len(size).is_none()) {
            return Err(libc::EFBIG);
        }
        let name = self.name_of(ino)?;
        if let Some(mode) = set_attr.mode {
            self.fs.chmod(&name, mode).map_err(|e| e.errno())?;
        }
        if set_attr.uid.is_some() || set_attr.gid.is_some() {
            let uid = set_attr.uid.unwrap_or(u32::MAX);
            let gid = set_attr.gid.unwrap_or(u32::MAX);
            self.fs.chown(&name, uid, gid).map_err(|e| e.errno())?;
        }
        if let Some(size) = set_attr.size {
            match fh.and_then(|fh| self.handle(fh).ok()) {
                Some(file) => file.lock().await.truncate(size),
                None => {
                    // truncate(2) without an open file: a short-lived handle
                    let mut file = self.fs.open(&name).await.map_err(|e| e.errno())?;
                    file.truncate(size);
                    file.flush().await.map_err(|e| e.errno())?;
                }
            }
        }
        self.attr_of(ino, fh).await
    }

    async fn read_fh(&self, fh: u64, offset: u64, size: u32) -> Result<Bytes, c_int> {
        let file = self.handle(fh)?;
        let file = file.lock().await;
        Ok(Bytes::copy_from_slice(file.read(size as usize, offset)))
    }

    async fn write_fh(&self, fh: u64, offset: u64, data: &[u8]) -> Result<u32, c_int> {
        let file = self.handle(fh)?;
        let end = offset.checked_add(data.len() as u64);
        if end.and_then(buffer_len).is_none() {
            return Err(libc::EFBIG);
        }
        let written = file.lock().await.write(data, offset);
        Ok(written as u32)
    }

    async fn flush_fh(&self, fh: u64) -> Result<(), c_int> {
        let file = self.handle(fh)?;
        let file = file.lock().await;
        file.flush().await.map_err(|e| e.errno())
    }

    async fn fsync_fh(&self, fh: u64, datasync: bool) -> Result<(), c_int> {
        let file = self.handle(fh)?;
        let file = file.lock().await;
        file.fsync(datasync as u32).await.map_err(|e| e.errno())
    }

    fn release_fh(&self, fh: u64) {
        self.handles.lock().unwrap().remove(&fh);
    }

    /// (ino, name, kind) for ".", ".." and every name in the root.
    async fn root_entries(&self, ino: u64) -> Result<Vec<(u64, String, VfsFileType)>, c_int> {
        if ino != ROOT_INODE {
            return Err(match self.name_of(ino) {
                Ok(_) => libc::ENOTDIR,
                Err(e) => e,
            });
        }
        let entries = self.fs.open_dir("").await.map_err(|e| e.errno())?;
        let mut all = Vec::with_capacity(entries.len() + 2);
        all.push((ROOT_INODE, ".".to_string(), VfsFileType::Dir));
        all.push((ROOT_INODE, "..".to_string(), VfsFileType::Dir));
        for e in entries {
            all.push((self.ino_for(&e.name), e.name, e.kind));
        }
        Ok(all)
    }

    /// Root entries from `offset` with attributes, without fetching any
    /// object: sizes the filesystem does not already know are sent with a
    /// zero TTL so the kernel asks again when it needs them.
    async fn plus_entries(
        &self,
        ino: u64,
        offset: u64,
    ) -> Result<Vec<(u64, String, VfsFileAttr, Duration)>, c_int> {
        let all = self.root_entries(ino).await?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let mut entries = Vec::with_capacity(all.len().saturating_sub(start));
        for (inode, name, kind) in all.into_iter().skip(start) {
            let (attr, ttl) = match kind {
                VfsFileType::Dir => (VfsFileAttr::dir(), TTL),
                VfsFileType::File => match self.fs.cached_attr(&name) {
                    Some(attr) => (attr, TTL),
                    None => (VfsFileAttr::file(0), Duration::ZERO),
                },
            };
            // the kernel counts every non-dot entry as a lookup
            let inode = match kind {
                VfsFileType::File => self.lookup_ino(&name),
                VfsFileType::Dir => inode,
            };
            entries.push((inode, name, attr, ttl));
        }
        Ok(entries)
    }
}

impl<F> Filesystem for FuseAdapter<F>
where
    F: PathFileSystem,
{
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        // whole objects are buffered anyway; 1MiB keeps write calls few
        let max_write = NonZeroU32::new(1024 * 1024).unwrap();
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        debug!(open = self.open_handles(), "destroy");
    }

    async fn forget(&self, _req: Request, inode: u64, nlookup: u64) {
        self.forget_ino(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(u64, u64)]) {
        for &(inode, nlookup) in inodes {
            self.forget_ino(inode, nlookup);
        }
    }

    async fn lookup(&self, req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let (ino, vattr) = self.lookup_name(parent, name).await?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: vfs_to_fuse_attr(ino, &vattr, &req),
            generation: 0,
        })
    }

    async fn getattr(
        &self,
        req: Request,
        ino: u64,
        fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let vattr = self.attr_of(ino, fh).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: vfs_to_fuse_attr(ino, &vattr, &req),
        })
    }

    async fn setattr(
        &self,
        req: Request,
        ino: u64,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let vattr = self.set_attr(ino, fh, &set_attr).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: vfs_to_fuse_attr(ino, &vattr, &req),
        })
    }

    async fn open(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let fh = self.open_ino(ino).await?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data = self.read_fh(fh, offset, size).await?;
        Ok(ReplyData { data })
    }

    async fn write(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let written = self.write_fh(fh, offset, data).await?;
        Ok(ReplyWrite { written })
    }

    async fn flush(&self, _req: Request, _inode: u64, fh: u64, _lock_owner: u64) -> FuseResult<()> {
        Ok(self.flush_fh(fh).await?)
    }

    async fn fsync(&self, _req: Request, _inode: u64, fh: u64, datasync: bool) -> FuseResult<()> {
        Ok(self.fsync_fh(fh, datasync).await?)
    }

    // close(2) already went through flush; dropping the buffer is all that is left
    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        self.release_fh(fh);
        Ok(())
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let (ino, fh, vattr) = self.create_name(parent, name).await?;
        Ok(ReplyCreated {
            ttl: TTL,
            attr: vfs_to_fuse_attr(ino, &vattr, &req),
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        Ok(self.unlink_name(parent, name).await?)
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        if ino != ROOT_INODE {
            let code = match self.name_of(ino) {
                Ok(_) => libc::ENOTDIR,
                Err(e) => e,
            };
            return Err(code.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let all = self.root_entries(ino).await?;
        // offset is that of the last entry already returned
        let start = if offset <= 0 { 0 } else { offset as usize };
        let entries = all
            .into_iter()
            .enumerate()
            .skip(start)
            .map(|(i, (inode, name, kind))| {
                Ok(DirectoryEntry {
                    inode,
                    kind: vfs_kind_to_fuse(kind),
                    name: OsString::from(name),
                    offset: i as i64 + 1,
                })
            })
            .collect::<Vec<_>>();
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(entries));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let entries = self
            .plus_entries(ino, offset)
            .await?
            .into_iter()
            .enumerate()
            .map(|(i, (inode, name, vattr, ttl))| {
                Ok(DirectoryEntryPlus {
                    inode,
                    generation: 0,
                    kind: vfs_kind_to_fuse(vattr.kind),
                    name: OsString::from(name),
                    offset: offset as i64 + i as i64 + 1,
                    attr: vfs_to_fuse_attr(inode, &vattr, &req),
                    entry_ttl: ttl,
                    attr_ttl: ttl,
                })
            })
            .collect::<Vec<_>>();
        let boxed: Self::DirEntryPlusStream<'a> = Box::pin(stream::iter(entries));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    // statistics of the local scratch filesystem, not of the remote store
    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        let Some(st) = self.fs.statfs() else {
            return Err(libc::ENOSYS.into());
        };
        Ok(ReplyStatFs {
            blocks: st.blocks,
            bfree: st.bfree,
            bavail: st.bavail,
            files: st.files,
            ffree: st.ffree,
            bsize: st.bsize,
            namelen: st.namelen,
            frsize: st.frsize,
        })
    }
}

// =============== helpers ===============
fn vfs_kind_to_fuse(k: VfsFileType) -> FuseFileType {
    match k {
        VfsFileType::Dir => FuseFileType::Directory,
        VfsFileType::File => FuseFileType::RegularFile,
    }
}

fn vfs_to_fuse_attr(ino: u64, v: &VfsFileAttr, req: &Request) -> rfuse3::raw::reply::FileAttr {
    // no timestamps are kept; report now
    let now = Timestamp::from(SystemTime::now());
    let nlink = match v.kind {
        VfsFileType::Dir => 2,
        VfsFileType::File => 1,
    };
    rfuse3::raw::reply::FileAttr {
        ino,
        size: v.size,
        blocks: v.size.div_ceil(512),
        atime: now,
        mtime: now,
        ctime: now,
        #[cfg(target_os = "macos")]
        crtime: now,
        kind: vfs_kind_to_fuse(v.kind),
        // permissions are not modeled
        perm: 0o755,
        nlink,
        uid: req.uid,
        gid: req.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 4096,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::ObjectBackend;
    use crate::vfs::handle::MAX_FILE_SIZE;
    use crate::vfs::test_util::memory_fs;

    #[tokio::test]
    async fn test_create_write_flush_reopen() {
        let (fs, backend, _scratch) = memory_fs();
        let adapter = FuseAdapter::new(fs);

        let (ino, fh, attr) = adapter
            .create_name(ROOT_INODE, OsStr::new("f"))
            .await
            .unwrap();
        assert_ne!(ino, ROOT_INODE);
        assert_eq!(attr.size, 0);

        assert_eq!(adapter.write_fh(fh, 0, b"hello").await.unwrap(), 5);
        // size comes from the open handle before any flush
        assert_eq!(adapter.attr_of(ino, Some(fh)).await.unwrap().size, 5);
        adapter.flush_fh(fh).await.unwrap();
        adapter.release_fh(fh);
        assert_eq!(adapter.open_handles(), 0);
        assert_eq!(backend.peek("f").unwrap(), b"hello");

        let (looked_up, attr) = adapter
            .lookup_name(ROOT_INODE, OsStr::new("f"))
            .await
            .unwrap();
        assert_eq!(looked_up, ino);
        assert_eq!(attr.size, 5);

        let fh = adapter.open_ino(ino).await.unwrap();
        assert_eq!(&adapter.read_fh(fh, 1, 3).await.unwrap()[..], b"ell");
        assert!(adapter.read_fh(fh, 10, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_errno_mapping_at_the_boundary() {
        let (fs, _backend, _scratch) = memory_fs();
        let adapter = FuseAdapter::new(fs);

        assert_eq!(
            adapter.lookup_name(ROOT_INODE, OsStr::new("missing")).await.unwrap_err(),
            libc::ENOENT
        );
        assert_eq!(
            adapter.lookup_name(42, OsStr::new("x")).await.unwrap_err(),
            libc::ENOENT
        );
        assert_eq!(adapter.open_ino(ROOT_INODE).await.unwrap_err(), libc::EISDIR);
        assert_eq!(adapter.open_ino(4242).await.unwrap_err(), libc::ENOENT);
        assert_eq!(adapter.read_fh(77, 0, 1).await.unwrap_err(), libc::EBADF);
        assert_eq!(
            adapter.unlink_name(ROOT_INODE, OsStr::new("a/b")).await.unwrap_err(),
            libc::EINVAL
        );
    }

    #[tokio::test]
    async fn test_root_entries_and_non_dir() {
        let (fs, backend, _scratch) = memory_fs();
        backend.put_object("x", b"1").await.unwrap();
        backend.put_object("y", b"22").await.unwrap();
        let adapter = FuseAdapter::new(fs);

        let entries = adapter.root_entries(ROOT_INODE).await.unwrap();
        let names: Vec<_> = entries.iter().map(|(_, n, _)| n.as_str()).collect();
        assert_eq!(names, vec![".", "..", "x", "y"]);

        let x_ino = entries[2].0;
        assert_eq!(adapter.root_entries(x_ino).await.unwrap_err(), libc::ENOTDIR);
        assert_eq!(adapter.root_entries(999).await.unwrap_err(), libc::ENOENT);
    }

    #[tokio::test]
    async fn test_oversized_write_and_truncate_are_efbig() {
        let (fs, _backend, _scratch) = memory_fs();
        let adapter = FuseAdapter::new(fs);
        let (ino, fh, _) = adapter
            .create_name(ROOT_INODE, OsStr::new("big"))
            .await
            .unwrap();
        adapter.write_fh(fh, 0, b"abc").await.unwrap();

        assert_eq!(adapter.write_fh(fh, u64::MAX, b"x").await.unwrap_err(), libc::EFBIG);
        assert_eq!(
            adapter.write_fh(fh, MAX_FILE_SIZE, b"x").await.unwrap_err(),
            libc::EFBIG
        );
        let set_attr = SetAttr {
            size: Some(u64::MAX),
            ..Default::default()
        };
        assert_eq!(
            adapter.set_attr(ino, Some(fh), &set_attr).await.unwrap_err(),
            libc::EFBIG
        );
        assert_eq!(adapter.attr_of(ino, Some(fh)).await.unwrap().size, 3);
    }

    #[tokio::test]
    async fn test_plus_entries_use_cached_sizes_only() {
        let (fs, backend, _scratch) = memory_fs();
        backend.put_object("remote", b"12345").await.unwrap();
        let adapter = FuseAdapter::new(fs);
        let (_, fh, _) = adapter
            .create_name(ROOT_INODE, OsStr::new("local"))
            .await
            .unwrap();
        adapter.write_fh(fh, 0, b"xy").await.unwrap();
        adapter.flush_fh(fh).await.unwrap();
        let gets = backend.get_calls();

        let entries = adapter.plus_entries(ROOT_INODE, 0).await.unwrap();
        assert_eq!(backend.get_calls(), gets);
        let files: Vec<_> = entries
            .iter()
            .map(|(_, name, attr, ttl)| (name.as_str(), attr.size, *ttl))
            .collect();
        assert_eq!(
            files,
            vec![
                (".", 0, TTL),
                ("..", 0, TTL),
                ("local", 2, TTL),
                ("remote", 0, Duration::ZERO),
            ]
        );

        // resuming after the first two entries
        let rest = adapter.plus_entries(ROOT_INODE, 2).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].1, "local");
    }

    #[tokio::test]
    async fn test_inodes_released_by_forget_and_unlink() {
        let (fs, _backend, _scratch) = memory_fs();
        let adapter = FuseAdapter::new(fs);
        let (ino, fh, _) = adapter
            .create_name(ROOT_INODE, OsStr::new("gone"))
            .await
            .unwrap();
        adapter.release_fh(fh);

        // the kernel still references the inode: unlink keeps the mapping
        adapter
            .unlink_name(ROOT_INODE, OsStr::new("gone"))
            .await
            .unwrap();
        assert_eq!(adapter.name_of(ino).unwrap(), "gone");

        adapter.forget_ino(ino, 1);
        assert_eq!(adapter.name_of(ino).unwrap_err(), libc::ENOENT);
        assert!(adapter.inodes.lock().unwrap().is_empty());

        // names only ever listed go away on unlink
        let (ino, fh, _) = adapter
            .create_name(ROOT_INODE, OsStr::new("listed"))
            .await
            .unwrap();
        adapter.release_fh(fh);
        adapter.forget_ino(ino, 1);
        let entries = adapter.root_entries(ROOT_INODE).await.unwrap();
        assert_eq!(entries.len(), 3);
        adapter
            .unlink_name(ROOT_INODE, OsStr::new("listed"))
            .await
            .unwrap();
        assert!(adapter.inodes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncate_without_handle_persists() {
        let (fs, backend, _scratch) = memory_fs();
        backend.put_object("t", b"abcdef").await.unwrap();
        let adapter = FuseAdapter::new(fs);
        let (ino, _) = adapter
            .lookup_name(ROOT_INODE, OsStr::new("t"))
            .await
            .unwrap();

        let set_attr = SetAttr {
            size: Some(2),
            ..Default::default()
        };
        let attr = adapter.set_attr(ino, None, &set_attr).await.unwrap();
        assert_eq!(attr.size, 2);
        assert_eq!(backend.peek("t").unwrap(), b"ab");
    }

    // mount smoke test on Linux, enabled with BUNDLEFS_FUSE_TEST=1
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn smoke_mount_and_basic_ops() {
        use crate::fuse::mount::mount_unprivileged;
        use std::io::Write;

        if std::env::var("BUNDLEFS_FUSE_TEST").ok().as_deref() != Some("1") {
            eprintln!("skip fuse mount test: set BUNDLEFS_FUSE_TEST=1 to enable");
            return;
        }

        let (fs, backend, _scratch) = memory_fs();
        let mnt = tempfile::tempdir().expect("tmp mount");
        let mnt_path = mnt.path().to_path_buf();

        let handle = match mount_unprivileged(FuseAdapter::new(fs), &mnt_path).await {
            Ok(h) => h,
            Err(e) => {
                eprintln!("skip fuse test: mount failed: {}", e);
                return;
            }
        };
        tokio::time::sleep(Duration::from_millis(2000)).await;

        let file_path = mnt_path.join("hello.txt");
        let path = file_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut f = std::fs::File::create(&path).expect("create file");
            f.write_all(b"abc").expect("write");
            f.flush().expect("flush");
        })
        .await
        .unwrap();
        assert_eq!(backend.peek("hello.txt").unwrap(), b"abc");

        let path = file_path.clone();
        let content = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .unwrap()
            .expect("read back");
        assert_eq!(content, b"abc");

        let path = file_path.clone();
        tokio::task::spawn_blocking(move || std::fs::remove_file(path))
            .await
            .unwrap()
            .expect("unlink");

        if let Err(e) = handle.unmount().await {
            eprintln!("unmount error: {}", e);
        }
    }
}
