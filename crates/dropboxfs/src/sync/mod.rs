//! Change-notification loop.
//!
//! A background task long-polls the notify endpoint for an account-wide
//! cursor, drains the change feed when something happened, and folds each
//! entry into the node cache: fresh handles for changed entries, removals
//! for tombstones, and parent eviction so the next listing re-fetches.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::dropbox::{ApiError, Metadata, RemoteClient};
use crate::fs::NodeCache;

/// Server-side long-poll timeout. The service caps this at 480 s.
const LONGPOLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause between rounds when the poll reported no changes.
const IDLE_DELAY: Duration = Duration::from_secs(5);

/// Pause before retrying a failed poll or drain, same cursor.
const ERROR_DELAY: Duration = Duration::from_millis(250);

pub struct ChangeNotifier {
    client: Arc<dyn RemoteClient>,
    cache: Arc<NodeCache>,
    /// Guard against a second loop for the same path. Values are the most
    /// recently seen cursor, for introspection.
    pollers: DashMap<String, String>,
}

impl ChangeNotifier {
    pub fn new(client: Arc<dyn RemoteClient>, cache: Arc<NodeCache>) -> Arc<Self> {
        Arc::new(Self {
            client,
            cache,
            pollers: DashMap::new(),
        })
    }

    /// Acquire a cursor positioned at "now" for `path` (recursively) and
    /// spawn the polling loop. A second call for the same path is a no-op.
    pub async fn start(self: &Arc<Self>, path: &str) -> Result<(), ApiError> {
        if self.pollers.contains_key(path) {
            tracing::info!(path, "polling already running");
            return Ok(());
        }

        let cursor = self.client.latest_cursor(path, true).await?;
        self.pollers.insert(path.to_string(), cursor.clone());
        tracing::info!(path, cursor = %cursor_digest(&cursor), "starting change polling");

        let notifier = self.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            let mut cursor = cursor;
            loop {
                cursor = notifier.run_once(&path, cursor).await;
            }
        });
        Ok(())
    }

    /// The cursor the poller for `path` last committed, if one is running.
    pub fn cursor(&self, path: &str) -> Option<String> {
        self.pollers.get(path).map(|c| c.clone())
    }

    pub fn poller_paths(&self) -> Vec<String> {
        self.pollers.iter().map(|e| e.key().clone()).collect()
    }

    /// One iteration of the loop: long-poll, honour server backoff, drain
    /// the feed on changes, apply them, and return the cursor to continue
    /// from. Errors never advance the cursor.
    pub async fn run_once(&self, path: &str, cursor: String) -> String {
        let poll = match self.client.longpoll(&cursor, LONGPOLL_TIMEOUT).await {
            Ok(poll) => poll,
            Err(err) => {
                tracing::error!(path, error = %err, "longpoll failed");
                tokio::time::sleep(ERROR_DELAY).await;
                return cursor;
            }
        };

        if let Some(seconds) = poll.backoff {
            tracing::warn!(path, seconds, "server requested backoff");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }

        if !poll.changes {
            tokio::time::sleep(IDLE_DELAY).await;
            return cursor;
        }

        tracing::info!(path, "change detected");
        match self.client.drain_continue(&cursor).await {
            Ok((entries, new_cursor)) => {
                self.apply_changes(&entries).await;
                tracing::debug!(
                    path,
                    old = %cursor_digest(&cursor),
                    new = %cursor_digest(&new_cursor),
                    "advancing cursor"
                );
                self.pollers.insert(path.to_string(), new_cursor.clone());
                new_cursor
            }
            Err(err) => {
                tracing::error!(path, error = %err, "failed to fetch changes");
                tokio::time::sleep(ERROR_DELAY).await;
                cursor
            }
        }
    }

    /// Fold change entries into the cache. Changed files become fresh
    /// unloaded handles unless a dirty local buffer exists (local wins until
    /// flushed); changed folders become fresh unpopulated handles;
    /// tombstones drop both maps. Every entry evicts its parent listing.
    pub async fn apply_changes(&self, entries: &[Metadata]) {
        for entry in entries {
            match entry {
                Metadata::File(meta) => {
                    if let Some(existing) = self.cache.file(&meta.path) {
                        if existing.is_dirty().await {
                            tracing::debug!(path = %meta.path, "keeping dirty local buffer");
                            self.cache.evict_parent(&meta.path);
                            continue;
                        }
                    }
                    let handle = self.cache.new_file_handle(meta.clone());
                    self.cache.insert_file(&meta.path, handle);
                    self.cache.evict_parent(&meta.path);
                    tracing::debug!(path = %meta.path, "applied file change");
                }
                Metadata::Folder(meta) => {
                    let handle = self.cache.new_directory_handle(meta.clone());
                    self.cache.insert_directory(&meta.path, handle);
                    self.cache.evict_parent(&meta.path);
                    tracing::debug!(path = %meta.path, "applied folder change");
                }
                Metadata::Deleted(meta) => {
                    self.cache.remove(&meta.path);
                    self.cache.evict_parent(&meta.path);
                    tracing::debug!(path = %meta.path, "applied deletion");
                }
            }
        }
    }
}

/// Cursors carry account identity; log a short digest instead of the value.
fn cursor_digest(cursor: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in cursor.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("pollers", &self.pollers.len())
            .finish()
    }
}
