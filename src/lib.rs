//! bundlefs: a flat FUSE filesystem over a whole-object store.
//!
//! - `cadapter`: object backends (local directory, S3, in-memory) and the
//!   staging store built on them
//! - `vfs`: name-based filesystem semantics, open-file buffers and caches
//! - `fuse`: the rfuse3 adapter and mount helpers

pub mod cadapter;
pub mod fuse;
pub mod vfs;
