//! Scripted remote client for exercising the node layer without a network.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use dropboxfs::dropbox::{
    ApiError, DeletedMeta, FileMeta, FolderMeta, ListPage, LongpollResult, Metadata, RemoteClient,
};

/// A remote whose answers are scripted up front and whose mutations are
/// recorded for assertions.
#[derive(Default)]
pub struct MockRemote {
    /// First listing page per path.
    pages: Mutex<HashMap<String, ListPage>>,
    /// Continuation pages per cursor.
    continue_pages: Mutex<HashMap<String, ListPage>>,
    /// Long-poll results, consumed front to back.
    longpolls: Mutex<VecDeque<Result<LongpollResult, ApiError>>>,
    latest_cursor: Mutex<Option<String>>,
    downloads: Mutex<HashMap<String, Vec<u8>>>,
    upload_results: Mutex<HashMap<String, FileMeta>>,
    move_results: Mutex<HashMap<String, Metadata>>,

    upload_log: Mutex<Vec<(String, Vec<u8>)>>,
    move_log: Mutex<Vec<(String, String)>>,
    delete_log: Mutex<Vec<String>>,
    download_log: Mutex<Vec<String>>,
}

impl MockRemote {
    pub fn set_page(&self, path: &str, page: ListPage) {
        self.pages.lock().unwrap().insert(path.to_string(), page);
    }

    pub fn set_continue(&self, cursor: &str, page: ListPage) {
        self.continue_pages
            .lock()
            .unwrap()
            .insert(cursor.to_string(), page);
    }

    pub fn push_longpoll(&self, result: Result<LongpollResult, ApiError>) {
        self.longpolls.lock().unwrap().push_back(result);
    }

    pub fn set_latest_cursor(&self, cursor: &str) {
        *self.latest_cursor.lock().unwrap() = Some(cursor.to_string());
    }

    pub fn set_download(&self, path: &str, data: &[u8]) {
        self.downloads
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
    }

    pub fn set_upload_result(&self, path: &str, meta: FileMeta) {
        self.upload_results
            .lock()
            .unwrap()
            .insert(path.to_string(), meta);
    }

    pub fn set_move_result(&self, to_path: &str, meta: Metadata) {
        self.move_results
            .lock()
            .unwrap()
            .insert(to_path.to_string(), meta);
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.upload_log.lock().unwrap().clone()
    }

    pub fn moves(&self) -> Vec<(String, String)> {
        self.move_log.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.delete_log.lock().unwrap().clone()
    }

    pub fn downloads_requested(&self) -> Vec<String> {
        self.download_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn list_folder(&self, path: &str) -> Result<ListPage, ApiError> {
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(empty_page))
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage, ApiError> {
        self.continue_pages
            .lock()
            .unwrap()
            .get(cursor)
            .cloned()
            .ok_or_else(|| ApiError::Protocol(format!("no scripted page for cursor {cursor}")))
    }

    async fn latest_cursor(&self, _path: &str, _recursive: bool) -> Result<String, ApiError> {
        Ok(self
            .latest_cursor
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "mock-cursor".to_string()))
    }

    async fn longpoll(&self, _cursor: &str, _timeout: Duration) -> Result<LongpollResult, ApiError> {
        self.longpolls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(LongpollResult {
                    changes: false,
                    backoff: None,
                })
            })
    }

    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<FileMeta, ApiError> {
        self.upload_log
            .lock()
            .unwrap()
            .push((path.to_string(), data.clone()));
        Ok(self
            .upload_results
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| FileMeta {
                id: format!("id:{}", leaf(path)),
                name: leaf(path).to_string(),
                path: path.to_string(),
                size: data.len() as u64,
            }))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        self.download_log.lock().unwrap().push(path.to_string());
        self.downloads
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(path.to_string()))
    }

    async fn move_entry(&self, from: &str, to: &str) -> Result<Metadata, ApiError> {
        self.move_log
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string()));
        Ok(self
            .move_results
            .lock()
            .unwrap()
            .get(to)
            .cloned()
            .unwrap_or_else(|| {
                Metadata::File(FileMeta {
                    id: format!("id:{}", leaf(to)),
                    name: leaf(to).to_string(),
                    path: to.to_string(),
                    size: 0,
                })
            }))
    }

    async fn delete(&self, path: &str) -> Result<Metadata, ApiError> {
        self.delete_log.lock().unwrap().push(path.to_string());
        Ok(Metadata::Deleted(DeletedMeta {
            name: leaf(path).to_string(),
            path: path.to_string(),
        }))
    }

    async fn create_folder(&self, path: &str) -> Result<FolderMeta, ApiError> {
        Ok(FolderMeta {
            id: format!("id:{}", leaf(path)),
            name: leaf(path).to_string(),
            path: path.to_string(),
        })
    }
}

fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn empty_page() -> ListPage {
    ListPage {
        entries: Vec::new(),
        cursor: "mock-end".to_string(),
        has_more: false,
    }
}

pub fn page(entries: Vec<Metadata>, cursor: &str, has_more: bool) -> ListPage {
    ListPage {
        entries,
        cursor: cursor.to_string(),
        has_more,
    }
}

pub fn file_entry(path: &str, id: &str, size: u64) -> Metadata {
    Metadata::File(file_meta(path, id, size))
}

pub fn folder_entry(path: &str, id: &str) -> Metadata {
    Metadata::Folder(folder_meta(path, id))
}

pub fn deleted_entry(path: &str) -> Metadata {
    Metadata::Deleted(DeletedMeta {
        name: leaf(path).to_string(),
        path: path.to_string(),
    })
}

pub fn file_meta(path: &str, id: &str, size: u64) -> FileMeta {
    FileMeta {
        id: id.to_string(),
        name: leaf(path).to_string(),
        path: path.to_string(),
        size,
    }
}

pub fn folder_meta(path: &str, id: &str) -> FolderMeta {
    FolderMeta {
        id: id.to_string(),
        name: leaf(path).to_string(),
        path: path.to_string(),
    }
}
