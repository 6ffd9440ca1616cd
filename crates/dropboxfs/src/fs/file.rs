//! File object: metadata plus an in-memory byte buffer.
//!
//! The buffer is downloaded whole on first open, spliced in place by writes,
//! and uploaded on release when dirty. All state lives behind one async
//! mutex per handle; that lock is deliberately held across remote calls so
//! the metadata swap after an upload is atomic with respect to other
//! operations on the same file.

use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use crate::dropbox::{ApiError, FileMeta, RemoteClient};
use crate::fs::inode::inode;
use crate::fs::node_cache::NodeCache;
use crate::fs::NodeAttr;
use crate::retry::{retry, Backoff};

#[derive(Debug)]
pub struct FileState {
    pub metadata: FileMeta,
    pub data: Vec<u8>,
    pub data_loaded: bool,
    pub dirty: bool,
}

pub struct FileHandle {
    client: Arc<dyn RemoteClient>,
    cache: Weak<NodeCache>,
    backoff: Backoff,
    state: Mutex<FileState>,
}

impl FileHandle {
    pub fn new(
        metadata: FileMeta,
        client: Arc<dyn RemoteClient>,
        cache: Weak<NodeCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            cache,
            backoff: Backoff::default(),
            state: Mutex::new(FileState {
                metadata,
                data: Vec::new(),
                data_loaded: false,
                dirty: false,
            }),
        })
    }

    fn cache(&self) -> Arc<NodeCache> {
        self.cache.upgrade().expect("node cache outlives handles")
    }

    /// Download the content unless this handle already carries it and is the
    /// canonical entry for its path. Handles inserted by the change loop
    /// start with `data_loaded = false`, which is what forces the re-fetch
    /// of remotely modified content here.
    async fn populate_locked(&self, st: &mut FileState) -> Result<(), ApiError> {
        if st.data_loaded && self.cache().is_file_cached(&st.metadata.path) {
            tracing::debug!(path = %st.metadata.path, "file cached, not fetching");
            return Ok(());
        }
        let path = st.metadata.path.clone();
        let data = retry(self.backoff, || self.client.download(&path)).await?;
        st.metadata.size = data.len() as u64;
        st.data = data;
        st.data_loaded = true;
        st.dirty = false;
        tracing::debug!(path = %st.metadata.path, size = st.metadata.size, "populated file");
        Ok(())
    }

    pub async fn attr(&self) -> NodeAttr {
        let st = self.state.lock().await;
        NodeAttr {
            ino: inode(&st.metadata.id),
            size: st.metadata.size,
            is_dir: false,
        }
    }

    pub async fn path(&self) -> String {
        self.state.lock().await.metadata.path.clone()
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Fetch content and make this handle canonical for its path.
    pub async fn open(self: &Arc<Self>) -> Result<(), ApiError> {
        let mut st = self.state.lock().await;
        self.populate_locked(&mut st).await?;
        self.cache().insert_file(&st.metadata.path, self.clone());
        Ok(())
    }

    /// Copy out `data[offset..offset+size]`, short at EOF.
    pub async fn read(self: &Arc<Self>, offset: u64, size: u32) -> Result<Vec<u8>, ApiError> {
        let mut st = self.state.lock().await;
        self.populate_locked(&mut st).await?;
        self.cache().insert_file(&st.metadata.path, self.clone());

        let start = (offset as usize).min(st.data.len());
        let end = (offset as usize).saturating_add(size as usize).min(st.data.len());
        Ok(st.data[start..end].to_vec())
    }

    pub async fn read_all(self: &Arc<Self>) -> Result<Vec<u8>, ApiError> {
        let mut st = self.state.lock().await;
        self.populate_locked(&mut st).await?;
        self.cache().insert_file(&st.metadata.path, self.clone());
        Ok(st.data.clone())
    }

    /// Splice `buf` into the buffer at `offset`, zero-filling any gap past
    /// EOF, and mark the file dirty. Returns the number of bytes accepted.
    pub async fn write(&self, offset: u64, buf: &[u8]) -> usize {
        let mut st = self.state.lock().await;
        let offset = offset as usize;

        if offset > st.data.len() {
            st.data.resize(offset, 0);
        }
        let end = offset + buf.len();
        if end >= st.data.len() {
            st.data.truncate(offset);
            st.data.extend_from_slice(buf);
        } else {
            st.data[offset..end].copy_from_slice(buf);
        }

        st.metadata.size = st.data.len() as u64;
        st.dirty = true;
        tracing::debug!(path = %st.metadata.path, offset, len = buf.len(), "buffered write");
        buf.len()
    }

    /// Truncate or zero-extend the buffer to `size` and mark dirty.
    pub async fn set_len(&self, size: u64) {
        let mut st = self.state.lock().await;
        st.data.resize(size as usize, 0);
        st.metadata.size = size;
        st.dirty = true;
    }

    /// Writes are buffered until release; nothing to do here.
    pub async fn flush(&self) {}

    /// Upload the buffer if dirty, adopting the authoritative metadata the
    /// remote returns. The cache entry is re-keyed if the path normalised.
    pub async fn release(self: &Arc<Self>) -> Result<(), ApiError> {
        let mut st = self.state.lock().await;
        if !st.dirty {
            return Ok(());
        }

        let path = st.metadata.path.clone();
        let data = st.data.clone();
        tracing::info!(path = %path, size = data.len(), "uploading on release");
        let meta = retry(self.backoff, || self.client.upload(&path, data.clone())).await?;

        if meta.path != path {
            self.cache().rekey_file(&path, &meta.path, self.clone());
        }
        st.metadata = meta;
        st.dirty = false;
        Ok(())
    }

    /// Adopt the metadata returned for a freshly created (empty) file. The
    /// content is known without a download, so the handle is immediately
    /// loaded and clean.
    pub(crate) async fn adopt_created(&self, meta: FileMeta) {
        let mut st = self.state.lock().await;
        st.metadata = meta;
        st.data.clear();
        st.data_loaded = true;
        st.dirty = false;
    }

    /// Snapshot of the state, for assertions in tests.
    pub async fn state_snapshot(&self) -> (FileMeta, Vec<u8>, bool, bool) {
        let st = self.state.lock().await;
        (st.metadata.clone(), st.data.clone(), st.data_loaded, st.dirty)
    }

    /// Seed buffered content directly, bypassing the network. Test hook.
    #[doc(hidden)]
    pub async fn seed_data(&self, data: Vec<u8>, dirty: bool) {
        let mut st = self.state.lock().await;
        st.metadata.size = data.len() as u64;
        st.data = data;
        st.data_loaded = true;
        st.dirty = dirty;
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle").finish_non_exhaustive()
    }
}
