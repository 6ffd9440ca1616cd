//! dropboxfs mounts a Dropbox account as a POSIX-like filesystem.
//!
//! Kernel requests flow through the FUSE adapter into per-path directory and
//! file objects, which talk to the remote API through a shared client. A
//! background long-poll loop picks up changes made elsewhere and invalidates
//! the node cache so the next kernel request sees them.

pub mod config;
pub mod dropbox;
pub mod fs;
pub mod http_server;
pub mod retry;
pub mod sync;

// Re-exports for the binary and tests.
pub use dropbox::{ApiError, DropboxClient, RemoteClient};
pub use fs::{DropboxFs, NodeCache};
pub use sync::ChangeNotifier;
