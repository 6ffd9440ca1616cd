//! Directory object: metadata plus child listings.
//!
//! Children are held as metadata only; live handles are resolved through the
//! identity cache on demand. Each directory guards its listing state with
//! its own async mutex, held across the remote calls that mutate it.

use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use crate::dropbox::{ApiError, FileMeta, FolderMeta, Metadata, RemoteClient};
use crate::fs::file::FileHandle;
use crate::fs::inode::inode;
use crate::fs::node_cache::NodeCache;
use crate::fs::{DirEntry, Node, NodeAttr};
use crate::retry::{retry, Backoff};

#[derive(Debug, Default)]
pub struct DirState {
    pub files: Vec<FileMeta>,
    pub subdirs: Vec<FolderMeta>,
    pub populated: bool,
}

pub struct DirectoryHandle {
    metadata: FolderMeta,
    client: Arc<dyn RemoteClient>,
    cache: Weak<NodeCache>,
    backoff: Backoff,
    state: Mutex<DirState>,
}

impl DirectoryHandle {
    pub fn new(
        metadata: FolderMeta,
        client: Arc<dyn RemoteClient>,
        cache: Weak<NodeCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            metadata,
            client,
            cache,
            backoff: Backoff::default(),
            state: Mutex::new(DirState::default()),
        })
    }

    fn cache(&self) -> Arc<NodeCache> {
        self.cache.upgrade().expect("node cache outlives handles")
    }

    pub fn path(&self) -> &str {
        &self.metadata.path
    }

    pub fn metadata(&self) -> &FolderMeta {
        &self.metadata
    }

    pub fn attr(&self) -> NodeAttr {
        NodeAttr {
            ino: inode(&self.metadata.id),
            size: 0,
            is_dir: true,
        }
    }

    /// Fetch and partition the full listing unless this handle is canonical
    /// and already populated. On success the handle asserts cachedness.
    async fn populate_locked(self: &Arc<Self>, st: &mut DirState) -> Result<(), ApiError> {
        if st.populated && self.cache().is_directory_cached(&self.metadata.path) {
            tracing::debug!(path = %self.metadata.path, "directory cached, not fetching");
            return Ok(());
        }

        let entries = retry(self.backoff, || {
            self.client.list_folder_all(&self.metadata.path)
        })
        .await?;

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in entries {
            match entry {
                Metadata::File(meta) => files.push(meta),
                Metadata::Folder(meta) => subdirs.push(meta),
                // Tombstones only appear on change-feed cursors.
                Metadata::Deleted(_) => {}
            }
        }

        st.files = files;
        st.subdirs = subdirs;
        st.populated = true;
        self.cache()
            .insert_directory(&self.metadata.path, self.clone());
        tracing::debug!(
            path = %self.metadata.path,
            files = st.files.len(),
            subdirs = st.subdirs.len(),
            "populated directory"
        );
        Ok(())
    }

    /// Resolve a child by name, via the identity cache.
    pub async fn lookup(self: &Arc<Self>, name: &str) -> Result<Node, ApiError> {
        let mut st = self.state.lock().await;
        self.populate_locked(&mut st).await?;

        if let Some(meta) = st.files.iter().find(|f| f.name == name) {
            return Ok(Node::File(self.cache().get_or_create_file(meta.clone())));
        }
        if let Some(meta) = st.subdirs.iter().find(|d| d.name == name) {
            return Ok(Node::Dir(
                self.cache().get_or_create_directory(meta.clone()),
            ));
        }
        Err(ApiError::NotFound(self.child_path(name)))
    }

    /// Emit one entry per child. Ordering is whatever the listing gave us:
    /// files first, then subdirectories.
    pub async fn read_dir_all(self: &Arc<Self>) -> Result<Vec<DirEntry>, ApiError> {
        let mut st = self.state.lock().await;
        self.populate_locked(&mut st).await?;

        let mut entries = Vec::with_capacity(st.files.len() + st.subdirs.len());
        for f in &st.files {
            entries.push(DirEntry {
                ino: inode(&f.id),
                name: f.name.clone(),
                is_dir: false,
            });
        }
        for d in &st.subdirs {
            entries.push(DirEntry {
                ino: inode(&d.id),
                name: d.name.clone(),
                is_dir: true,
            });
        }
        Ok(entries)
    }

    /// Create an empty file by uploading zero bytes; the returned metadata
    /// is authoritative.
    pub async fn create(self: &Arc<Self>, name: &str) -> Result<Arc<FileHandle>, ApiError> {
        let mut st = self.state.lock().await;
        let path = self.child_path(name);
        tracing::info!(path = %path, "creating file");

        let meta = retry(self.backoff, || self.client.upload(&path, Vec::new())).await?;
        let handle = self.cache().get_or_create_file(meta.clone());
        handle.adopt_created(meta.clone()).await;
        self.cache().insert_file(&meta.path, handle.clone());
        st.files.push(meta);
        Ok(handle)
    }

    pub async fn mkdir(self: &Arc<Self>, name: &str) -> Result<Arc<DirectoryHandle>, ApiError> {
        let mut st = self.state.lock().await;
        let path = self.child_path(name);
        tracing::info!(path = %path, "creating folder");

        let meta = self.client.create_folder(&path).await?;
        let handle = self.cache().get_or_create_directory(meta.clone());
        st.subdirs.push(meta);
        Ok(handle)
    }

    /// Drop the child locally, then remotely. The local removal is not
    /// rolled back on remote failure; the change loop re-syncs us.
    pub async fn remove(self: &Arc<Self>, name: &str, is_dir: bool) -> Result<(), ApiError> {
        let mut st = self.state.lock().await;
        let path = self.child_path(name);
        tracing::info!(path = %path, is_dir, "removing");

        if is_dir {
            st.subdirs.retain(|d| d.name != name);
        } else {
            st.files.retain(|f| f.name != name);
        }
        self.cache().remove(&path);

        self.client.delete(&path).await?;
        Ok(())
    }

    /// Move a child into `new_parent` under `new_name`, preferring the
    /// metadata the remote returns over our locally patched copy. Both
    /// directories are de-populated so their next access re-lists.
    pub async fn rename(
        self: &Arc<Self>,
        old_name: &str,
        new_name: &str,
        new_parent: &Arc<DirectoryHandle>,
    ) -> Result<(), ApiError> {
        let old_path = self.child_path(old_name);
        let new_path = new_parent.child_path(new_name);
        tracing::info!(from = %old_path, to = %new_path, "renaming");

        if Arc::ptr_eq(self, new_parent) {
            let mut st = self.state.lock().await;
            detach_child(&mut st, old_name);
            let moved = self.client.move_entry(&old_path, &new_path).await?;
            attach_child(&mut st, moved)?;
            st.populated = false;
        } else {
            // Two distinct directories: lock in ascending path order.
            let (mut src, mut dst) = if self.metadata.path < new_parent.metadata.path {
                let a = self.state.lock().await;
                let b = new_parent.state.lock().await;
                (a, b)
            } else {
                let b = new_parent.state.lock().await;
                let a = self.state.lock().await;
                (a, b)
            };

            detach_child(&mut src, old_name);
            let moved = self.client.move_entry(&old_path, &new_path).await?;
            attach_child(&mut dst, moved)?;
            src.populated = false;
            dst.populated = false;
        }

        self.cache().remove(&old_path);
        Ok(())
    }

    fn child_path(&self, name: &str) -> String {
        format!("{}/{}", self.metadata.path, name)
    }

    /// Snapshot of the state, for assertions in tests.
    pub async fn state_snapshot(&self) -> (Vec<FileMeta>, Vec<FolderMeta>, bool) {
        let st = self.state.lock().await;
        (st.files.clone(), st.subdirs.clone(), st.populated)
    }
}

/// Pull the named child out of whichever slice holds it.
fn detach_child(st: &mut DirState, name: &str) {
    if let Some(pos) = st.subdirs.iter().position(|d| d.name == name) {
        st.subdirs.remove(pos);
        return;
    }
    if let Some(pos) = st.files.iter().position(|f| f.name == name) {
        st.files.remove(pos);
    }
}

/// Attach the moved entry to the destination slices. The remote's returned
/// metadata wins over any locally patched copy; a tombstone here would be a
/// protocol violation.
fn attach_child(st: &mut DirState, moved: Metadata) -> Result<(), ApiError> {
    match moved {
        Metadata::File(meta) => st.files.push(meta),
        Metadata::Folder(meta) => st.subdirs.push(meta),
        Metadata::Deleted(t) => {
            return Err(ApiError::Protocol(format!(
                "move returned a deleted entry for {}",
                t.path
            )));
        }
    }
    Ok(())
}

impl std::fmt::Debug for DirectoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryHandle")
            .field("path", &self.metadata.path)
            .finish_non_exhaustive()
    }
}
