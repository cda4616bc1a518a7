//! Object store adapter (cAdapter)
//!
//! Submodules:
//! - `client`: the `ObjectBackend` contract and the `ObjectClient` wrapper
//! - `localfs`: one-file-per-object backend over a local directory
//! - `memory`: in-memory backend with fault injection, for development and tests
//! - `s3`: S3-compatible backend
//! - `store`: `ObjectStore`, the whole-object contract the filesystem layer
//!   consumes, and `BundleStore`, its scratch-file staging implementation
pub mod client;
pub mod localfs;
pub mod memory;
pub mod s3;
pub mod store;
