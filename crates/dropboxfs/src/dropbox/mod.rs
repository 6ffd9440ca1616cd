//! Remote client adapter for the Dropbox HTTP API.

mod client;
mod error;
mod longpoll;
mod types;

pub use client::{DropboxClient, RemoteClient};
pub use error::ApiError;
pub use longpoll::LongpollClient;
pub use types::{DeletedMeta, FileMeta, FolderMeta, ListPage, LongpollResult, Metadata};
