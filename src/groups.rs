//! Group configuration store.
//!
//! Holds per-conversation settings and welcome templates in memory and writes
//! the full record through a [`SettingsStore`] after every mutation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Errors that can occur while loading or saving group data
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-conversation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    /// Users allowed to change settings, owner first
    pub admins: Vec<i64>,
    /// Whether `/play` is accepted in this conversation
    pub music_enabled: bool,
    /// Whether new members are greeted
    pub welcome_enabled: bool,
}

impl GroupSettings {
    fn seeded(owner_id: i64) -> Self {
        Self {
            admins: vec![owner_id],
            music_enabled: true,
            welcome_enabled: false,
        }
    }
}

/// Toggleable group feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// `music_enabled`
    Music,
    /// `welcome_enabled`
    Welcome,
}

/// The persisted record: both maps, always written together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupData {
    /// Conversation id -> settings
    #[serde(default)]
    pub settings: HashMap<i64, GroupSettings>,
    /// Conversation id -> welcome template
    #[serde(default)]
    pub welcome: HashMap<i64, String>,
}

/// Result of [`GroupStore::setup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Settings were created
    Created,
    /// Settings already existed and were left untouched
    AlreadySetUp,
}

/// Durable backing for [`GroupData`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the stored record; `Ok(None)` when nothing was stored yet
    async fn load(&self) -> Result<Option<GroupData>, StoreError>;
    /// Replace the stored record
    async fn save(&self, data: &GroupData) -> Result<(), StoreError>;
}

/// JSON file implementation of [`SettingsStore`]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by the file at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn load(&self) -> Result<Option<GroupData>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, data: &GroupData) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(data)?;
        // Write-then-rename so a crash never leaves a truncated file behind
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory group settings with write-through persistence
pub struct GroupStore {
    data: RwLock<GroupData>,
    store: Box<dyn SettingsStore>,
    super_admin: i64,
}

impl GroupStore {
    /// Empty store; call [`GroupStore::load`] at boot
    pub fn new(store: Box<dyn SettingsStore>, super_admin: i64) -> Self {
        Self {
            data: RwLock::new(GroupData::default()),
            store,
            super_admin,
        }
    }

    /// Merge stored contents into memory; stored entries win on conflicts.
    ///
    /// A missing or unreadable record counts as "no settings yet".
    pub async fn load(&self) {
        let loaded = match self.store.load().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                info!("No stored group settings, starting empty");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Stored group settings unreadable, starting empty");
                return;
            }
        };

        let mut data = self.data.write().await;
        info!(
            groups = loaded.settings.len(),
            welcome_templates = loaded.welcome.len(),
            "Loaded group settings"
        );
        data.settings.extend(loaded.settings);
        data.welcome.extend(loaded.welcome);
    }

    /// Best effort: a failed write is logged, the in-memory change stays
    async fn persist(&self, data: &GroupData) {
        if let Err(e) = self.store.save(data).await {
            error!(error = %e, "Failed to persist group settings");
        }
    }

    /// Create settings for `chat_id` owned by `owner_id` unless they exist
    pub async fn setup(&self, chat_id: i64, owner_id: i64) -> SetupOutcome {
        let mut data = self.data.write().await;
        if data.settings.contains_key(&chat_id) {
            return SetupOutcome::AlreadySetUp;
        }
        data.settings
            .insert(chat_id, GroupSettings::seeded(owner_id));
        info!(chat_id, owner_id, "Group set up");
        self.persist(&data).await;
        SetupOutcome::Created
    }

    /// Flip `feature`; returns the new value, or `None` if the chat is not set up
    pub async fn toggle(&self, chat_id: i64, feature: Feature) -> Option<bool> {
        let mut data = self.data.write().await;
        let settings = data.settings.get_mut(&chat_id)?;
        let flag = match feature {
            Feature::Music => &mut settings.music_enabled,
            Feature::Welcome => &mut settings.welcome_enabled,
        };
        *flag = !*flag;
        let value = *flag;
        info!(chat_id, ?feature, value, "Group feature toggled");
        self.persist(&data).await;
        Some(value)
    }

    /// Store `template` and enable welcomes; `false` if the chat is not set up
    pub async fn set_welcome(&self, chat_id: i64, template: String) -> bool {
        let mut data = self.data.write().await;
        let Some(settings) = data.settings.get_mut(&chat_id) else {
            return false;
        };
        settings.welcome_enabled = true;
        data.welcome.insert(chat_id, template);
        info!(chat_id, "Welcome template stored");
        self.persist(&data).await;
        true
    }

    /// Super-admin or listed admin of `chat_id`
    pub async fn is_admin(&self, user_id: i64, chat_id: i64) -> bool {
        if user_id == self.super_admin {
            return true;
        }
        self.data
            .read()
            .await
            .settings
            .get(&chat_id)
            .is_some_and(|s| s.admins.contains(&user_id))
    }

    /// The global super-admin id
    #[must_use]
    pub const fn super_admin(&self) -> i64 {
        self.super_admin
    }

    /// Snapshot of a chat's settings
    pub async fn settings(&self, chat_id: i64) -> Option<GroupSettings> {
        self.data.read().await.settings.get(&chat_id).cloned()
    }

    /// `false` only when the chat is set up and music is switched off
    pub async fn music_allowed(&self, chat_id: i64) -> bool {
        self.data
            .read()
            .await
            .settings
            .get(&chat_id)
            .is_none_or(|s| s.music_enabled)
    }

    /// Template to greet with, if welcomes are enabled for `chat_id`
    pub async fn active_welcome(&self, chat_id: i64) -> Option<Option<String>> {
        let data = self.data.read().await;
        let settings = data.settings.get(&chat_id)?;
        if !settings.welcome_enabled {
            return None;
        }
        Some(data.welcome.get(&chat_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Store that records every saved snapshot
    #[derive(Default, Clone)]
    struct RecordingStore {
        saved: Arc<StdMutex<Vec<GroupData>>>,
    }

    #[async_trait]
    impl SettingsStore for RecordingStore {
        async fn load(&self) -> Result<Option<GroupData>, StoreError> {
            Ok(None)
        }

        async fn save(&self, data: &GroupData) -> Result<(), StoreError> {
            if let Ok(mut saved) = self.saved.lock() {
                saved.push(data.clone());
            }
            Ok(())
        }
    }

    fn store_with_recorder() -> (GroupStore, RecordingStore) {
        let recorder = RecordingStore::default();
        (GroupStore::new(Box::new(recorder.clone()), 1), recorder)
    }

    fn saves(recorder: &RecordingStore) -> usize {
        recorder.saved.lock().map(|s| s.len()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let (store, recorder) = store_with_recorder();

        assert_eq!(store.setup(-100, 10).await, SetupOutcome::Created);
        store.toggle(-100, Feature::Music).await;
        assert_eq!(store.setup(-100, 20).await, SetupOutcome::AlreadySetUp);

        let settings = store.settings(-100).await;
        assert_eq!(
            settings,
            Some(GroupSettings {
                admins: vec![10],
                music_enabled: false,
                welcome_enabled: false,
            })
        );
        // setup + toggle; the second setup did not persist
        assert_eq!(saves(&recorder), 2);
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_value() {
        let (store, _) = store_with_recorder();
        store.setup(-1, 10).await;

        assert_eq!(store.toggle(-1, Feature::Music).await, Some(false));
        assert_eq!(store.toggle(-1, Feature::Music).await, Some(true));
        assert_eq!(store.toggle(-1, Feature::Welcome).await, Some(true));
        assert_eq!(store.toggle(-2, Feature::Music).await, None);
    }

    #[tokio::test]
    async fn test_is_admin() {
        let (store, _) = store_with_recorder();
        store.setup(-1, 10).await;

        assert!(store.is_admin(10, -1).await);
        assert!(store.is_admin(1, -1).await, "super-admin is admin everywhere");
        assert!(store.is_admin(1, -999).await);
        assert!(!store.is_admin(11, -1).await);
        assert!(!store.is_admin(10, -2).await);
    }

    #[tokio::test]
    async fn test_music_allowed_defaults_on_for_unknown_chat() {
        let (store, _) = store_with_recorder();
        assert!(store.music_allowed(-5).await);

        store.setup(-5, 10).await;
        store.toggle(-5, Feature::Music).await;
        assert!(!store.music_allowed(-5).await);
    }

    #[tokio::test]
    async fn test_set_welcome_enables_and_persists_both_maps() {
        let (store, recorder) = store_with_recorder();
        assert!(!store.set_welcome(-1, "Hi {name}!".to_string()).await);

        store.setup(-1, 10).await;
        assert!(store.set_welcome(-1, "Hi {name}!".to_string()).await);
        assert_eq!(
            store.active_welcome(-1).await,
            Some(Some("Hi {name}!".to_string()))
        );

        let last = recorder
            .saved
            .lock()
            .ok()
            .and_then(|s| s.last().cloned())
            .unwrap_or_default();
        assert_eq!(last.welcome.get(&-1).map(String::as_str), Some("Hi {name}!"));
        assert!(last.settings.get(&-1).is_some_and(|s| s.welcome_enabled));
    }

    #[tokio::test]
    async fn test_load_merges_and_tolerates_errors() {
        let mut mock = MockSettingsStore::new();
        let mut data = GroupData::default();
        data.settings.insert(-7, GroupSettings::seeded(70));
        data.welcome.insert(-7, "Yo {name}".to_string());
        mock.expect_load().returning(move || Ok(Some(data.clone())));

        let store = GroupStore::new(Box::new(mock), 1);
        store.load().await;
        assert!(store.is_admin(70, -7).await);

        let mut broken = MockSettingsStore::new();
        broken.expect_load().returning(|| {
            Err(StoreError::Json(
                serde_json::from_str::<GroupData>("{").unwrap_err(),
            ))
        });
        let store = GroupStore::new(Box::new(broken), 1);
        store.load().await;
        assert!(store.settings(-7).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_change() {
        let mut mock = MockSettingsStore::new();
        mock.expect_save()
            .returning(|_| Err(StoreError::Io(std::io::Error::other("disk full"))));

        let store = GroupStore::new(Box::new(mock), 1);
        assert_eq!(store.setup(-1, 10).await, SetupOutcome::Created);
        assert!(store.settings(-1).await.is_some());
    }

    #[tokio::test]
    async fn test_json_file_store_roundtrip_and_corruption() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("group_data.json");
        let file_store = JsonFileStore::new(&path);
        assert!(file_store.load().await?.is_none());

        let mut data = GroupData::default();
        data.settings.insert(-42, GroupSettings::seeded(5));
        file_store.save(&data).await?;
        assert_eq!(file_store.load().await?, Some(data));

        std::fs::write(&path, "not json")?;
        assert!(file_store.load().await.is_err());
        Ok(())
    }
}
