//! In-memory collaborators for driving `BotCore` end to end.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use muskan_bot::config::Settings;
use muskan_bot::delivery::{Delivery, MediaUpload, StatusHandle};
use muskan_bot::groups::{GroupData, SettingsStore, StoreError};
use muskan_bot::media::{MediaError, MediaSource, SearchHit};
use muskan_bot::queue::QueueEvent;
use muskan_bot::service::{Actor, BotCore};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const ADMIN: i64 = 1000;
pub const GROUP: i64 = -100_500;

pub fn test_settings() -> Settings {
    Settings::with_credentials("test-token", ADMIN)
}

pub fn user(user_id: i64, chat_id: i64) -> Actor {
    Actor::new(user_id, chat_id, format!("user{user_id}"))
}

pub fn hit(title: &str, duration_secs: Option<u32>) -> SearchHit {
    SearchHit {
        locator: format!("https://media.test/{title}"),
        title: title.to_string(),
        duration_secs,
        uploader: "Test Uploader".to_string(),
        webpage_url: format!("https://media.test/{title}"),
    }
}

/// Search results keyed by query; fetch writes a file of the configured size
#[derive(Default)]
pub struct FakeSource {
    catalog: Mutex<HashMap<String, Vec<SearchHit>>>,
    sizes: Mutex<HashMap<String, usize>>,
    stuck: Mutex<HashSet<String>>,
    fetch_dirs: Mutex<Vec<PathBuf>>,
    searches: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `query` resolves to `hits`
    pub fn add(&self, query: &str, hits: Vec<SearchHit>) {
        if let Ok(mut catalog) = self.catalog.lock() {
            catalog.insert(query.to_string(), hits);
        }
    }

    /// `query` resolves to a single track named after it
    pub fn add_track(&self, query: &str, duration_secs: u32) {
        self.add(query, vec![hit(query, Some(duration_secs))]);
    }

    /// Fetching `title` produces `bytes` bytes
    pub fn set_size(&self, title: &str, bytes: usize) {
        if let Ok(mut sizes) = self.sizes.lock() {
            sizes.insert(hit(title, None).locator, bytes);
        }
    }

    /// Fetching `title` never completes
    pub fn block(&self, title: &str) {
        if let Ok(mut stuck) = self.stuck.lock() {
            stuck.insert(hit(title, None).locator);
        }
    }

    pub fn fetch_dirs(&self) -> Vec<PathBuf> {
        self.fetch_dirs.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn search_count(&self) -> usize {
        self.searches.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, MediaError> {
        if let Ok(mut searches) = self.searches.lock() {
            searches.push(query.to_string());
        }
        let hits = self
            .catalog
            .lock()
            .map(|c| c.get(query).cloned().unwrap_or_default())
            .unwrap_or_default();
        Ok(hits.into_iter().take(limit).collect())
    }

    async fn fetch(&self, locator: &str, dest: &Path) -> Result<PathBuf, MediaError> {
        if let Ok(mut dirs) = self.fetch_dirs.lock() {
            dirs.push(dest.to_path_buf());
        }
        let stuck = self
            .stuck
            .lock()
            .map(|s| s.contains(locator))
            .unwrap_or(false);
        if stuck {
            std::future::pending::<()>().await;
        }

        let size = self
            .sizes
            .lock()
            .map(|s| s.get(locator).copied().unwrap_or(1024))
            .unwrap_or(1024);
        let path = dest.join("track.mp3");
        tokio::fs::write(&path, vec![0u8; size]).await?;
        Ok(path)
    }
}

/// Everything the core sent, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(i64, String),
    Status(i64, String),
    Edit(i64, String),
    Delete(i64),
    Media(i64, String),
}

#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<Sent>>,
    failing_media: Mutex<HashSet<String>>,
    unreachable_chats: Mutex<HashSet<i64>>,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_media(&self, title: &str) {
        if let Ok(mut failing) = self.failing_media.lock() {
            failing.insert(title.to_string());
        }
    }

    pub fn unreachable(&self, chat_id: i64) {
        if let Ok(mut chats) = self.unreachable_chats.lock() {
            chats.insert(chat_id);
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Titles of delivered media, in delivery order
    pub fn media_titles(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Media(_, title) => Some(title),
                _ => None,
            })
            .collect()
    }

    /// Plain texts sent to `chat_id`
    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(chat, text) if chat == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent) {
        if let Ok(mut log) = self.sent.lock() {
            log.push(sent);
        }
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        let unreachable = self
            .unreachable_chats
            .lock()
            .map(|c| c.contains(&chat_id))
            .unwrap_or(false);
        if unreachable {
            bail!("chat {chat_id} unreachable");
        }
        self.record(Sent::Text(chat_id, text.to_string()));
        Ok(())
    }

    async fn send_status(&self, chat_id: i64, text: &str) -> Result<StatusHandle> {
        self.record(Sent::Status(chat_id, text.to_string()));
        Ok(StatusHandle {
            chat_id,
            message_id: 1,
        })
    }

    async fn edit_status(&self, handle: StatusHandle, text: &str) -> Result<()> {
        self.record(Sent::Edit(handle.chat_id, text.to_string()));
        Ok(())
    }

    async fn delete_status(&self, handle: StatusHandle) -> Result<()> {
        self.record(Sent::Delete(handle.chat_id));
        Ok(())
    }

    async fn send_media(&self, chat_id: i64, media: MediaUpload) -> Result<()> {
        let failing = self
            .failing_media
            .lock()
            .map(|f| f.contains(&media.title))
            .unwrap_or(false);
        if failing {
            bail!("upload rejected");
        }
        if !media.path.exists() {
            bail!("file vanished before upload");
        }
        self.record(Sent::Media(chat_id, media.title));
        Ok(())
    }
}

/// Settings store kept in memory; clones share the record
#[derive(Default, Clone)]
pub struct MemoryStore {
    data: Arc<Mutex<Option<GroupData>>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn saved(&self) -> Option<GroupData> {
        self.data.lock().ok().and_then(|d| d.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|s| *s).unwrap_or_default()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self) -> Result<Option<GroupData>, StoreError> {
        Ok(self.saved())
    }

    async fn save(&self, data: &GroupData) -> Result<(), StoreError> {
        if let Ok(mut stored) = self.data.lock() {
            *stored = Some(data.clone());
        }
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

pub struct Harness {
    pub core: BotCore,
    pub source: Arc<FakeSource>,
    pub delivery: Arc<RecordingDelivery>,
    pub store: MemoryStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let source = FakeSource::new();
        let delivery = RecordingDelivery::new();
        let store = MemoryStore::default();
        let core = BotCore::new(
            &settings,
            Box::new(store.clone()),
            source.clone(),
            delivery.clone(),
        );
        Self {
            core,
            source,
            delivery,
            store,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.core.queue().subscribe()
    }
}

/// Collect queue events until the queue reports it drained
pub async fn until_drained(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        match next {
            Ok(Ok(QueueEvent::Drained)) => return events,
            Ok(Ok(event)) => events.push(event),
            other => panic!("queue did not drain: {other:?}, seen {events:?}"),
        }
    }
}
