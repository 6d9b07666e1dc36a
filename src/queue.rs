//! Media queue engine.
//!
//! One process-wide FIFO of resolved requests and a single drain worker that
//! takes the head through fetch, validation, delivery and cleanup. The head
//! stays in the queue while it is processed and is removed exactly once,
//! after delivery, failure or skip. A failed item never stops the drain.

use crate::delivery::{Delivery, MediaUpload, StatusHandle};
use crate::error::BotError;
use crate::media::{MediaSource, SearchHit};
use crate::utils::format_duration;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bytes per megabyte, for display
const MB: f64 = 1024.0 * 1024.0;

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Sent to the last conversation when the queue runs dry
pub const QUEUE_FINISHED: &str = "✅ Queue finished! Use /play to add more.";

/// A resolved request waiting in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Unique, increasing id
    pub id: u64,
    /// Requesting user
    pub user_id: i64,
    /// Conversation the media is delivered to
    pub chat_id: i64,
    /// Original free-text query
    pub query: String,
    /// Resolved media locator
    pub locator: String,
    /// Display title
    pub title: String,
    /// Duration in seconds, when known
    pub duration_secs: Option<u32>,
    /// Uploader label
    pub uploader: String,
    /// Display name of the requester
    pub requested_by: String,
}

/// Who asked for what
#[derive(Debug, Clone)]
pub struct QueueRequest {
    /// Requesting user
    pub user_id: i64,
    /// Conversation to deliver to
    pub chat_id: i64,
    /// Free-text query
    pub query: String,
    /// Display name of the requester
    pub requested_by: String,
}

/// Ceilings enforced by the engine
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    /// Longest accepted duration
    pub max_duration_secs: u32,
    /// Largest deliverable file
    pub max_file_size_bytes: u64,
    /// Maximum pending items
    pub max_len: usize,
    /// Ceiling on one fetch
    pub fetch_timeout: Duration,
    /// Ceiling on one upload
    pub upload_timeout: Duration,
}

/// Result of a successful enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    /// The stored item
    pub item: QueueItem,
    /// 1-based position in the queue
    pub position: usize,
}

/// Read-only view of the queue
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// Leading items, head first
    pub items: Vec<QueueItem>,
    /// Total number of pending items
    pub total: usize,
    /// Id of the item the drain is working on
    pub active: Option<u64>,
}

impl QueueSnapshot {
    /// Items beyond the listed ones
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.items.len())
    }
}

/// Progress notifications from the drain worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// Processing of an item began
    Started(u64),
    /// Item delivered
    Delivered(u64),
    /// Item skipped or cleared before delivery
    Skipped(u64),
    /// Item failed; the reason is the text sent to the conversation
    Failed(u64, String),
    /// The queue became empty
    Drained,
}

enum Outcome {
    Delivered,
    Skipped,
    Failed(String),
}

struct Entry {
    item: QueueItem,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    next_id: u64,
    active: Option<u64>,
}

/// The media queue and its drain
pub struct MediaQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    source: Arc<dyn MediaSource>,
    delivery: Arc<dyn Delivery>,
    limits: QueueLimits,
    events: broadcast::Sender<QueueEvent>,
}

impl MediaQueue {
    /// Create the queue; the drain runs once [`MediaQueue::spawn_drain`] is called
    pub fn new(
        source: Arc<dyn MediaSource>,
        delivery: Arc<dyn Delivery>,
        limits: QueueLimits,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            source,
            delivery,
            limits,
            events,
        })
    }

    /// Start the single drain worker
    pub fn spawn_drain(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.drain().await })
    }

    /// Subscribe to drain progress
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Resolve `query` to its best match, enforcing the duration ceiling.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches, `ResourceLimit` when the match is too
    /// long, `External` when the search itself fails.
    pub async fn resolve(&self, query: &str) -> Result<SearchHit, BotError> {
        let hits = self
            .source
            .search(query, 1)
            .await
            .map_err(|e| BotError::External(anyhow::anyhow!(e)))?;
        let hit = hits
            .into_iter()
            .next()
            .ok_or_else(|| BotError::not_found(format!("No results found for \"{query}\"")))?;

        if hit
            .duration_secs
            .is_some_and(|d| d > self.limits.max_duration_secs)
        {
            return Err(BotError::resource_limit(format!(
                "Videos longer than {} minutes aren't supported ({} is {})",
                self.limits.max_duration_secs / 60,
                hit.title,
                format_duration(hit.duration_secs)
            )));
        }
        Ok(hit)
    }

    /// Append a resolved request at the tail and wake the drain if it was idle.
    ///
    /// # Errors
    ///
    /// `ResourceLimit` when the queue is full.
    pub async fn enqueue(&self, request: QueueRequest, hit: SearchHit) -> Result<Enqueued, BotError> {
        let mut state = self.state.lock().await;
        if state.entries.len() >= self.limits.max_len {
            return Err(BotError::resource_limit(format!(
                "The queue is full ({} tracks), try again later",
                self.limits.max_len
            )));
        }

        state.next_id += 1;
        let item = QueueItem {
            id: state.next_id,
            user_id: request.user_id,
            chat_id: request.chat_id,
            query: request.query,
            locator: hit.locator,
            title: hit.title,
            duration_secs: hit.duration_secs,
            uploader: hit.uploader,
            requested_by: request.requested_by,
        };
        let was_empty = state.entries.is_empty();
        state.entries.push_back(Entry {
            item: item.clone(),
            cancel: CancellationToken::new(),
        });
        let position = state.entries.len();
        drop(state);

        info!(
            item_id = item.id,
            chat_id = item.chat_id,
            user_id = item.user_id,
            title = %item.title,
            position,
            "Queued"
        );
        if was_empty {
            self.wake.notify_one();
        }
        Ok(Enqueued { item, position })
    }

    /// Up to `limit` items from the head, plus totals
    pub async fn snapshot(&self, limit: usize) -> QueueSnapshot {
        let state = self.state.lock().await;
        QueueSnapshot {
            items: state
                .entries
                .iter()
                .take(limit)
                .map(|e| e.item.clone())
                .collect(),
            total: state.entries.len(),
            active: state.active,
        }
    }

    /// Current head, if any
    pub async fn head(&self) -> Option<QueueItem> {
        self.state
            .lock()
            .await
            .entries
            .front()
            .map(|e| e.item.clone())
    }

    /// Number of pending items
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// `true` when nothing is pending
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cancel the head if it is still item `expected_id`.
    ///
    /// An in-flight fetch or upload is aborted; the drain removes the item
    /// without delivering it and moves on.
    pub async fn skip_head(&self, expected_id: u64) -> Option<QueueItem> {
        let state = self.state.lock().await;
        let head = state.entries.front()?;
        if head.item.id != expected_id {
            return None;
        }
        head.cancel.cancel();
        info!(item_id = expected_id, "Skip requested");
        Some(head.item.clone())
    }

    /// Discard every pending item without delivering or notifying; returns the count
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        for entry in &state.entries {
            entry.cancel.cancel();
        }
        let count = state.entries.len();
        state.entries.clear();
        info!(count, "Queue cleared");
        count
    }

    async fn next_head(&self) -> Option<(QueueItem, CancellationToken)> {
        let mut state = self.state.lock().await;
        let entry = state.entries.front()?;
        let next = (entry.item.clone(), entry.cancel.clone());
        state.active = Some(next.0.id);
        Some(next)
    }

    /// Remove item `id` if it is still the head; returns whether it was
    /// removed and how many items remain.
    async fn finish(&self, id: u64) -> (bool, usize) {
        let mut state = self.state.lock().await;
        state.active = None;
        let removed = state.entries.front().is_some_and(|e| e.item.id == id);
        if removed {
            state.entries.pop_front();
        }
        (removed, state.entries.len())
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn drain(self: Arc<Self>) {
        info!("Queue drain started");
        loop {
            let Some((item, cancel)) = self.next_head().await else {
                self.wake.notified().await;
                continue;
            };

            self.emit(QueueEvent::Started(item.id));
            info!(item_id = item.id, title = %item.title, "Processing");
            let outcome = self.process(&item, &cancel).await;
            let (removed, remaining) = self.finish(item.id).await;

            match outcome {
                Outcome::Delivered => {
                    info!(item_id = item.id, "Delivered");
                    self.emit(QueueEvent::Delivered(item.id));
                }
                Outcome::Skipped => {
                    info!(item_id = item.id, "Skipped");
                    self.emit(QueueEvent::Skipped(item.id));
                }
                Outcome::Failed(reason) => {
                    warn!(item_id = item.id, reason = %reason, "Item failed");
                    self.notify(item.chat_id, &reason).await;
                    self.emit(QueueEvent::Failed(item.id, reason));
                }
            }

            if remaining == 0 {
                if removed {
                    self.notify(item.chat_id, QUEUE_FINISHED).await;
                }
                self.emit(QueueEvent::Drained);
            }
        }
    }

    async fn notify(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.delivery.send_text(chat_id, text).await {
            warn!(chat_id, error = %e, "Failed to send queue notice");
        }
    }

    /// Fetch, validate and deliver one item inside a scoped temp directory
    async fn process(&self, item: &QueueItem, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Skipped;
        }

        let workdir = match tempfile::Builder::new().prefix("muskan-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "Failed to create temp dir");
                return Outcome::Failed(failure_text(item, "no temporary storage available"));
            }
        };

        let status = match self
            .delivery
            .send_status(
                item.chat_id,
                &format!("⬇️ Downloading: {}", item.title),
            )
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!(error = %e, "Status message not sent");
                None
            }
        };

        let outcome = self
            .fetch_and_deliver(item, cancel, workdir.path(), status)
            .await;

        if let Some(handle) = status {
            if let Err(e) = self.delivery.delete_status(handle).await {
                debug!(error = %e, "Status message not deleted");
            }
        }

        let path = workdir.path().to_path_buf();
        match tokio::task::spawn_blocking(move || workdir.close()).await {
            Ok(Ok(())) => debug!(path = %path.display(), "Temp dir released"),
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Temp dir cleanup failed"),
            Err(e) => warn!(path = %path.display(), error = %e, "Temp dir cleanup task failed"),
        }
        outcome
    }

    async fn fetch_and_deliver(
        &self,
        item: &QueueItem,
        cancel: &CancellationToken,
        workdir: &Path,
        status: Option<StatusHandle>,
    ) -> Outcome {
        let fetch = timeout(
            self.limits.fetch_timeout,
            self.source.fetch(&item.locator, workdir),
        );
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => return Outcome::Skipped,
            res = fetch => res,
        };
        let path = match fetched {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                warn!(item_id = item.id, error = %e, "Fetch failed");
                return Outcome::Failed(failure_text(item, e.reason()));
            }
            Err(_) => {
                warn!(
                    item_id = item.id,
                    timeout_secs = self.limits.fetch_timeout.as_secs(),
                    "Fetch timed out"
                );
                return Outcome::Failed(failure_text(item, "the download timed out"));
            }
        };

        if let Err(reason) = self.validate(&path).await {
            return Outcome::Failed(failure_text(item, &reason));
        }

        if let Some(handle) = status {
            let text = format!("⬆️ Uploading: {}", item.title);
            if let Err(e) = self.delivery.edit_status(handle, &text).await {
                debug!(error = %e, "Status message not updated");
            }
        }

        // A skip that landed while the fetch was finishing
        if cancel.is_cancelled() {
            return Outcome::Skipped;
        }

        let upload = MediaUpload {
            path,
            title: item.title.clone(),
            performer: item.uploader.clone(),
            duration_secs: item.duration_secs,
            caption: format!("🎧 Requested by {}", item.requested_by),
        };
        let send = timeout(
            self.limits.upload_timeout,
            self.delivery.send_media(item.chat_id, upload),
        );
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return Outcome::Skipped,
            res = send => res,
        };
        match sent {
            Ok(Ok(())) => Outcome::Delivered,
            Ok(Err(e)) => {
                warn!(item_id = item.id, error = %e, "Delivery failed");
                Outcome::Failed(failure_text(item, "the upload failed"))
            }
            Err(_) => {
                warn!(
                    item_id = item.id,
                    timeout_secs = self.limits.upload_timeout.as_secs(),
                    "Upload timed out"
                );
                Outcome::Failed(failure_text(item, "the upload timed out"))
            }
        }
    }

    async fn validate(&self, path: &Path) -> Result<(), String> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Err("the download produced no audio file".to_string()),
            Err(_) => return Err("the downloaded file is missing".to_string()),
        };
        if size > self.limits.max_file_size_bytes {
            return Err(format!(
                "file too large ({:.1} MB, max {:.0} MB)",
                size as f64 / MB,
                self.limits.max_file_size_bytes as f64 / MB
            ));
        }
        Ok(())
    }
}

fn failure_text(item: &QueueItem, reason: &str) -> String {
    format!("❌ Playback error for \"{}\": {reason}", item.title)
}
