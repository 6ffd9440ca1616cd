//! FUSE adapter.
//!
//! Implements the fuser callbacks by routing each kernel request to the
//! matching directory or file object. Callbacks run on the FUSE dispatch
//! threads; remote work happens on the tokio runtime via `block_on`. No
//! global lock is held across remote I/O, only the per-object mutexes inside
//! the handles themselves.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use dashmap::DashMap;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
    FUSE_ROOT_ID,
};
use tokio::runtime::Handle;

use crate::dropbox::ApiError;
use crate::fs::directory::DirectoryHandle;
use crate::fs::file::FileHandle;
use crate::fs::node_cache::{parent_of, NodeCache};
use crate::fs::{Node, NodeAttr};

pub struct DropboxFs {
    /// Runtime handle for bridging into async code.
    rt: Handle,
    cache: Arc<NodeCache>,
    /// Kernel-visible nodes: inode → handle. The root is pinned at
    /// [`FUSE_ROOT_ID`]; everything else registers under its derived inode.
    nodes: DashMap<u64, Node>,
    next_fh: AtomicU64,
}

impl DropboxFs {
    /// TTL the kernel may cache attributes for.
    const ATTR_TTL: Duration = Duration::from_secs(1);

    const BLOCK_SIZE: u32 = 512;

    pub fn new(rt: Handle, cache: Arc<NodeCache>, root: Arc<DirectoryHandle>) -> Self {
        let nodes = DashMap::new();
        nodes.insert(FUSE_ROOT_ID, Node::Dir(root));
        Self {
            rt,
            cache,
            nodes,
            next_fh: AtomicU64::new(1),
        }
    }

    fn next_handle(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::SeqCst)
    }

    fn node_at(&self, ino: u64) -> Option<Node> {
        self.nodes.get(&ino).map(|n| n.clone())
    }

    fn dir_at(&self, ino: u64) -> Option<Arc<DirectoryHandle>> {
        match self.node_at(ino)? {
            Node::Dir(dir) => Some(dir),
            Node::File(_) => None,
        }
    }

    fn file_at(&self, ino: u64) -> Option<Arc<FileHandle>> {
        match self.node_at(ino)? {
            Node::File(file) => Some(file),
            Node::Dir(_) => None,
        }
    }

    /// Register a node under its derived inode and return (inode, attrs).
    fn register(&self, node: Node) -> (u64, NodeAttr) {
        let attr = self.rt.block_on(node.attr());
        self.nodes.insert(attr.ino, node);
        (attr.ino, attr)
    }

    fn make_attr(ino: u64, attr: &NodeAttr) -> FileAttr {
        let kind = if attr.is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        };

        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(u64::from(Self::BLOCK_SIZE)),
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind,
            perm: 0o700,
            nlink: 1,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: Self::BLOCK_SIZE,
            flags: 0,
        }
    }
}

impl Filesystem for DropboxFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        tracing::info!("filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let dir = match self.dir_at(parent) {
            Some(d) => d,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.rt.block_on(dir.lookup(name)) {
            Ok(node) => {
                let (ino, attr) = self.register(node);
                reply.entry(&Self::ATTR_TTL, &Self::make_attr(ino, &attr), 0);
            }
            Err(err) => {
                tracing::debug!(parent = %dir.path(), name, error = %err, "lookup failed");
                reply.error(err.errno());
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.node_at(ino) {
            Some(node) => {
                let attr = self.rt.block_on(node.attr());
                reply.attr(&Self::ATTR_TTL, &Self::make_attr(ino, &attr));
            }
            None => reply.error(libc::ENOENT),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let node = match self.node_at(ino) {
            Some(n) => n,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        if let Some(new_size) = size {
            match &node {
                Node::File(file) => self.rt.block_on(file.set_len(new_size)),
                Node::Dir(_) => {
                    reply.error(libc::EISDIR);
                    return;
                }
            }
        }

        let attr = self.rt.block_on(node.attr());
        reply.attr(&Self::ATTR_TTL, &Self::make_attr(ino, &attr));
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let dir = match self.dir_at(ino) {
            Some(d) => d,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let children = match self.rt.block_on(dir.read_dir_all()) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(path = %dir.path(), error = %err, "readdir failed");
                reply.error(err.errno());
                return;
            }
        };

        let parent_ino = if ino == FUSE_ROOT_ID {
            FUSE_ROOT_ID
        } else {
            self.cache
                .directory(parent_of(dir.path()))
                .map(|p| p.attr().ino)
                .unwrap_or(FUSE_ROOT_ID)
        };

        let mut all = Vec::with_capacity(children.len() + 2);
        all.push((ino, FileType::Directory, ".".to_string()));
        all.push((parent_ino, FileType::Directory, "..".to_string()));
        for child in children {
            let kind = if child.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            all.push((child.ino, kind, child.name));
        }

        for (i, (entry_ino, kind, name)) in all.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.node_at(ino) {
            Some(Node::File(file)) => match self.rt.block_on(file.open()) {
                Ok(()) => reply.opened(self.next_handle(), 0),
                Err(err) => {
                    tracing::error!(error = %err, "open failed");
                    reply.error(err.errno());
                }
            },
            Some(Node::Dir(_)) => reply.error(libc::EISDIR),
            None => reply.error(libc::ENOENT),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let file = match self.file_at(ino) {
            Some(f) => f,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.rt.block_on(file.read(offset as u64, size)) {
            Ok(data) => reply.data(&data),
            Err(err) => {
                tracing::error!(error = %err, "read failed");
                reply.error(err.errno());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let file = match self.file_at(ino) {
            Some(f) => f,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let written = self.rt.block_on(file.write(offset as u64, data));
        reply.written(written as u32);
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Writes stay buffered until release.
        if let Some(file) = self.file_at(ino) {
            self.rt.block_on(file.flush());
        }
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let file = match self.file_at(ino) {
            Some(f) => f,
            None => {
                reply.ok();
                return;
            }
        };

        match self.rt.block_on(file.release()) {
            Ok(()) => reply.ok(),
            Err(err) => {
                tracing::error!(error = %err, "upload on release failed");
                // A conflict on overwrite is not EEXIST from the kernel's
                // point of view; the write simply failed.
                let errno = match err {
                    ApiError::Conflict(_) => libc::EIO,
                    other => other.errno(),
                };
                reply.error(errno);
            }
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        let dir = match self.dir_at(parent) {
            Some(d) => d,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.rt.block_on(dir.create(name)) {
            Ok(file) => {
                let (ino, attr) = self.register(Node::File(file));
                reply.created(
                    &Self::ATTR_TTL,
                    &Self::make_attr(ino, &attr),
                    0,
                    self.next_handle(),
                    flags as u32,
                );
            }
            Err(err) => {
                tracing::error!(parent = %dir.path(), name, error = %err, "create failed");
                reply.error(err.errno());
            }
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        let dir = match self.dir_at(parent) {
            Some(d) => d,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.rt.block_on(dir.mkdir(name)) {
            Ok(subdir) => {
                let (ino, attr) = self.register(Node::Dir(subdir));
                reply.entry(&Self::ATTR_TTL, &Self::make_attr(ino, &attr), 0);
            }
            Err(err) => {
                tracing::error!(parent = %dir.path(), name, error = %err, "mkdir failed");
                reply.error(err.errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        let dir = match self.dir_at(parent) {
            Some(d) => d,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.rt.block_on(dir.remove(name, false)) {
            Ok(()) => reply.ok(),
            Err(err) => {
                tracing::error!(parent = %dir.path(), name, error = %err, "unlink failed");
                reply.error(err.errno());
            }
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        let dir = match self.dir_at(parent) {
            Some(d) => d,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.rt.block_on(dir.remove(name, true)) {
            Ok(()) => reply.ok(),
            Err(err) => {
                tracing::error!(parent = %dir.path(), name, error = %err, "rmdir failed");
                reply.error(err.errno());
            }
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (name, newname) = match (name.to_str(), newname.to_str()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        let src = match self.dir_at(parent) {
            Some(d) => d,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let dst = match self.dir_at(newparent) {
            Some(d) => d,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.rt.block_on(src.rename(name, newname, &dst)) {
            Ok(()) => reply.ok(),
            Err(err) => {
                tracing::error!(
                    from = %src.path(), name, to = %dst.path(), newname,
                    error = %err, "rename failed"
                );
                reply.error(err.errno());
            }
        }
    }
}
