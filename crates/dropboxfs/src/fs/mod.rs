//! The node layer: identity cache, directory and file objects, and the FUSE
//! adapter that exposes them to the kernel.

pub mod directory;
pub mod file;
pub mod filesystem;
mod inode;
pub mod node_cache;

use std::sync::Arc;

pub use directory::DirectoryHandle;
pub use file::FileHandle;
pub use filesystem::DropboxFs;
pub use inode::inode;
pub use node_cache::{parent_of, NodeCache};

/// Attributes a node reports to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: u64,
    pub size: u64,
    pub is_dir: bool,
}

/// A resolved filesystem object.
#[derive(Clone)]
pub enum Node {
    File(Arc<FileHandle>),
    Dir(Arc<DirectoryHandle>),
}

impl Node {
    pub async fn attr(&self) -> NodeAttr {
        match self {
            Node::File(f) => f.attr().await,
            Node::Dir(d) => d.attr(),
        }
    }
}

/// One entry emitted by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub is_dir: bool,
}
