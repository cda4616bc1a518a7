//! Mount helpers for starting/stopping FUSE
//!
//! Only supported on Linux, where the unprivileged path goes through
//! fusermount3.

use std::path::Path;

use rfuse3::MountOptions;

use crate::fuse::FuseAdapter;
use crate::vfs::PathFileSystem;

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn default_mount_options() -> MountOptions {
    let mut mo = MountOptions::default();
    mo.fs_name("bundlefs");
    // no allow_other; the mount point must be empty
    mo
}

/// Mount `fs` on the given empty directory.
#[cfg(target_os = "linux")]
pub async fn mount_unprivileged<F: PathFileSystem>(
    fs: FuseAdapter<F>,
    mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    let session = rfuse3::raw::Session::new(default_mount_options());
    session.mount_with_unprivileged(fs, mount_point).await
}

#[cfg(not(target_os = "linux"))]
pub async fn mount_unprivileged<F: PathFileSystem>(
    _fs: FuseAdapter<F>,
    _mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux",
    ))
}
