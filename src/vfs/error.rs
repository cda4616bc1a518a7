//! Error kinds surfaced by the filesystem layer.
//!
//! Store failures never reach the transport verbatim: they are folded into
//! one of these kinds, with the original error kept as `source` for logs.

use crate::cadapter::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    /// The name contains a path separator; the namespace is flat.
    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("{name:?} not found")]
    NotFound {
        name: String,
        #[source]
        source: Option<StoreError>,
    },

    /// A mutating store call failed (initial upload on create).
    #[error("store error on {name:?}: {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },

    /// Saving a handle failed (scratch write or upload); the buffer is intact.
    #[error("i/o error saving {name:?}: {source}")]
    Io {
        name: String,
        #[source]
        source: StoreError,
    },
}

impl VfsError {
    pub(crate) fn not_found(name: &str) -> Self {
        VfsError::NotFound {
            name: name.to_string(),
            source: None,
        }
    }

    /// errno the kernel transport replies with.
    pub fn errno(&self) -> libc::c_int {
        match self {
            VfsError::InvalidName(_) => libc::EINVAL,
            VfsError::NotFound { .. } => libc::ENOENT,
            VfsError::Store { .. } | VfsError::Io { .. } => libc::EIO,
        }
    }
}
