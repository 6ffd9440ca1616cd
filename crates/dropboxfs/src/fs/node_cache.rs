//! Node identity map.
//!
//! Two sharded maps keyed by remote path guarantee that repeated lookups of
//! the same path observe the same handle (and therefore the same buffered
//! state). Handles are constructed here but inserted lazily: `populate` on
//! the handle itself asserts cachedness once it holds real remote state.

use std::sync::Arc;

use dashmap::DashMap;

use crate::dropbox::{FileMeta, FolderMeta, RemoteClient};
use crate::fs::directory::DirectoryHandle;
use crate::fs::file::FileHandle;

pub struct NodeCache {
    client: Arc<dyn RemoteClient>,
    files: DashMap<String, Arc<FileHandle>>,
    dirs: DashMap<String, Arc<DirectoryHandle>>,
}

impl NodeCache {
    pub fn new(client: Arc<dyn RemoteClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            files: DashMap::new(),
            dirs: DashMap::new(),
        })
    }

    pub fn client(&self) -> Arc<dyn RemoteClient> {
        self.client.clone()
    }

    /// Return the cached handle for `meta.path`, or construct a fresh one
    /// with nothing loaded. The fresh handle is NOT inserted; it becomes
    /// canonical when its `populate` succeeds.
    pub fn get_or_create_file(self: &Arc<Self>, meta: FileMeta) -> Arc<FileHandle> {
        if let Some(existing) = self.files.get(&meta.path) {
            tracing::debug!(path = %meta.path, "returning cached file handle");
            return existing.clone();
        }
        tracing::debug!(path = %meta.path, "returning fresh file handle");
        self.new_file_handle(meta)
    }

    pub fn get_or_create_directory(self: &Arc<Self>, meta: FolderMeta) -> Arc<DirectoryHandle> {
        if let Some(existing) = self.dirs.get(&meta.path) {
            tracing::debug!(path = %meta.path, "returning cached directory handle");
            return existing.clone();
        }
        tracing::debug!(path = %meta.path, "returning fresh directory handle");
        self.new_directory_handle(meta)
    }

    /// Construct a detached file handle sharing this cache's client.
    pub fn new_file_handle(self: &Arc<Self>, meta: FileMeta) -> Arc<FileHandle> {
        FileHandle::new(meta, self.client.clone(), Arc::downgrade(self))
    }

    /// Construct a detached directory handle sharing this cache's client.
    pub fn new_directory_handle(self: &Arc<Self>, meta: FolderMeta) -> Arc<DirectoryHandle> {
        DirectoryHandle::new(meta, self.client.clone(), Arc::downgrade(self))
    }

    pub fn is_file_cached(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn is_directory_cached(&self, path: &str) -> bool {
        self.dirs.contains_key(path)
    }

    pub fn file(&self, path: &str) -> Option<Arc<FileHandle>> {
        self.files.get(path).map(|f| f.clone())
    }

    pub fn directory(&self, path: &str) -> Option<Arc<DirectoryHandle>> {
        self.dirs.get(path).map(|d| d.clone())
    }

    pub fn insert_file(&self, path: &str, handle: Arc<FileHandle>) {
        self.files.insert(path.to_string(), handle);
    }

    pub fn insert_directory(&self, path: &str, handle: Arc<DirectoryHandle>) {
        self.dirs.insert(path.to_string(), handle);
    }

    /// Move a cached file handle to a new key, e.g. after the remote
    /// normalised the path of an upload. No-op if the old key is absent.
    pub fn rekey_file(&self, old_path: &str, new_path: &str, handle: Arc<FileHandle>) {
        if self.files.remove(old_path).is_some() {
            self.files.insert(new_path.to_string(), handle);
        }
    }

    /// Drop `path` from both maps.
    pub fn remove(&self, path: &str) {
        self.files.remove(path);
        self.dirs.remove(path);
    }

    /// Drop the directory containing `path` so its next listing re-fetches.
    /// File handles under it are left alone.
    pub fn evict_parent(&self, path: &str) {
        let parent = parent_of(path);
        self.dirs.remove(parent);
        tracing::debug!(path, parent, "evicted parent directory");
    }

    pub fn cached_file_count(&self) -> usize {
        self.files.len()
    }

    pub fn cached_dir_count(&self) -> usize {
        self.dirs.len()
    }
}

impl std::fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCache")
            .field("files", &self.files.len())
            .field("dirs", &self.dirs.len())
            .finish()
    }
}

/// Directory prefix of a remote path. The root is the empty string, so both
/// `parent_of("/x")` and `parent_of("x")` are `""`.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "",
        Some(pos) => &path[..pos],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dropbox::FileMeta;

    fn file_meta(path: &str) -> FileMeta {
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        FileMeta {
            id: format!("id:{name}"),
            name,
            path: path.to_string(),
            size: 0,
        }
    }

    #[test]
    fn parent_of_edge_cases() {
        assert_eq!(parent_of("/x"), "");
        assert_eq!(parent_of("x"), "");
        assert_eq!(parent_of(""), "");
        assert_eq!(parent_of("/a/b"), "/a");
        assert_eq!(parent_of("/a/b/c"), "/a/b");
    }

    #[test]
    fn get_or_create_returns_same_handle_once_inserted() {
        let cache = NodeCache::new(crate::fs::test_support::null_client());

        let first = cache.get_or_create_file(file_meta("/a"));
        // Not yet canonical: a second call builds a fresh handle.
        let second = cache.get_or_create_file(file_meta("/a"));
        assert!(!Arc::ptr_eq(&first, &second));

        cache.insert_file("/a", first.clone());
        let third = cache.get_or_create_file(file_meta("/a"));
        assert!(Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn remove_clears_both_maps() {
        let cache = NodeCache::new(crate::fs::test_support::null_client());
        let file = cache.new_file_handle(file_meta("/a"));
        let dir = cache.new_directory_handle(crate::dropbox::FolderMeta {
            id: "id:a".into(),
            name: "a".into(),
            path: "/a".into(),
        });
        cache.insert_file("/a", file);
        cache.insert_directory("/a", dir);

        cache.remove("/a");
        assert!(!cache.is_file_cached("/a"));
        assert!(!cache.is_directory_cached("/a"));
    }

    #[test]
    fn evict_parent_only_touches_directory_map() {
        let cache = NodeCache::new(crate::fs::test_support::null_client());
        let dir = cache.new_directory_handle(crate::dropbox::FolderMeta {
            id: "id:a".into(),
            name: "a".into(),
            path: "/a".into(),
        });
        cache.insert_directory("/a", dir);
        let file = cache.new_file_handle(file_meta("/a/b"));
        cache.insert_file("/a/b", file);

        cache.evict_parent("/a/b");
        assert!(!cache.is_directory_cached("/a"));
        assert!(cache.is_file_cached("/a/b"));
    }
}
