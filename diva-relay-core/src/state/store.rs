//! Routing state persistence

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::utils::write_atomic;

/// Last active destination, persisted as `state/state.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingState {
    /// Platform name of the last active channel (e.g. "line")
    #[serde(default)]
    pub last_channel: String,
    /// Chat identifier on that platform
    #[serde(default)]
    pub last_chat_id: String,
    /// Time of the last write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RoutingState {
    /// `(channel, chat_id)` when both halves are recorded
    pub fn target(&self) -> Option<(String, String)> {
        if self.last_channel.is_empty() || self.last_chat_id.is_empty() {
            None
        } else {
            Some((self.last_channel.clone(), self.last_chat_id.clone()))
        }
    }
}

/// Locked accessor over the routing-state file.
///
/// All readers and writers in the process go through one instance; the
/// in-memory copy always mirrors the last successful write.
pub struct StateStore {
    path: PathBuf,
    state: Mutex<RoutingState>,
}

impl StateStore {
    /// Open the store under `<workspace>/state/state.json`
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self::with_path(workspace.as_ref().join("state").join("state.json"))
    }

    /// Open the store at an explicit file path
    pub fn with_path(path: PathBuf) -> Self {
        let state = load_state(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Path of the canonical state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the whole record
    pub fn get(&self) -> RoutingState {
        self.state.lock().clone()
    }

    pub fn last_channel(&self) -> String {
        self.state.lock().last_channel.clone()
    }

    pub fn last_chat_id(&self) -> String {
        self.state.lock().last_chat_id.clone()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.lock().timestamp
    }

    /// Recorded `(channel, chat_id)` pair, if complete
    pub fn last_target(&self) -> Option<(String, String)> {
        self.state.lock().target()
    }

    pub fn set_last_channel(&self, channel: &str) -> crate::Result<()> {
        self.update(|state| state.last_channel = channel.to_string())
    }

    pub fn set_last_chat_id(&self, chat_id: &str) -> crate::Result<()> {
        self.update(|state| state.last_chat_id = chat_id.to_string())
    }

    /// Record both halves of the destination in a single write
    pub fn record(&self, channel: &str, chat_id: &str) -> crate::Result<()> {
        self.update(|state| {
            state.last_channel = channel.to_string();
            state.last_chat_id = chat_id.to_string();
        })
    }

    fn update(&self, mutate: impl FnOnce(&mut RoutingState)) -> crate::Result<()> {
        let mut guard = self.state.lock();
        let mut next = guard.clone();
        mutate(&mut next);
        next.timestamp = Some(Utc::now());

        let content = serde_json::to_vec_pretty(&next)?;
        if let Err(e) = write_atomic(&self.path, &content) {
            error!(path = %self.path.display(), "Failed to persist routing state: {}", e);
            return Err(e.into());
        }

        *guard = next;
        Ok(())
    }
}

fn load_state(path: &Path) -> RoutingState {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No routing state yet");
            return RoutingState::default();
        }
        Err(e) => {
            warn!(path = %path.display(), "Failed to read routing state: {}", e);
            return RoutingState::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), "Failed to parse routing state: {}", e);
            RoutingState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::temp_path_for;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_empty_workspace_reads_zero_value() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path());

        assert_eq!(store.last_channel(), "");
        assert_eq!(store.last_chat_id(), "");
        assert!(store.timestamp().is_none());
        assert!(store.last_target().is_none());
    }

    #[test]
    fn test_set_last_channel_persists() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path());

        store.set_last_channel("test-channel").unwrap();
        assert_eq!(store.last_channel(), "test-channel");
        assert!(store.timestamp().is_some());
        assert!(temp_dir.path().join("state").join("state.json").exists());

        let reopened = StateStore::new(temp_dir.path());
        assert_eq!(reopened.last_channel(), "test-channel");
    }

    #[test]
    fn test_set_last_chat_id_persists() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path());

        store.set_last_chat_id("test-chat-id").unwrap();

        let reopened = StateStore::new(temp_dir.path());
        assert_eq!(reopened.last_chat_id(), "test-chat-id");
        assert!(reopened.timestamp().is_some());
    }

    #[test]
    fn test_round_trip_fields_are_identical() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path());
        store.record("line", "U4af4980629-é✓").unwrap();
        let written = store.get();

        let reopened = StateStore::new(temp_dir.path()).get();
        assert_eq!(reopened, written);
        assert_eq!(
            reopened.target(),
            Some(("line".to_string(), "U4af4980629-é✓".to_string()))
        );
    }

    #[test]
    fn test_interrupted_write_keeps_previous_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path());
        store.record("initial-channel", "chat-1").unwrap();

        // A crash after the temp stage leaves a half-written scratch file behind
        std::fs::write(temp_path_for(store.path()), "corrupted data").unwrap();

        let reopened = StateStore::new(temp_dir.path());
        assert_eq!(reopened.last_channel(), "initial-channel");
        assert_eq!(reopened.last_chat_id(), "chat-1");

        reopened.set_last_channel("new-channel").unwrap();
        assert_eq!(StateStore::new(temp_dir.path()).last_channel(), "new-channel");
        assert!(!temp_path_for(store.path()).exists());
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("state.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"last_channel":"telegram","last_chat_id":"42","timestamp":"2026-01-02T03:04:05Z","extra":{"x":1}}"#,
        )
        .unwrap();

        let store = StateStore::new(temp_dir.path());
        assert_eq!(
            store.last_target(),
            Some(("telegram".to_string(), "42".to_string()))
        );
    }

    #[test]
    fn test_corrupt_file_reads_zero_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("state.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let store = StateStore::new(temp_dir.path());
        assert_eq!(store.get(), RoutingState::default());
    }

    #[test]
    fn test_concurrent_writers_leave_valid_json() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(temp_dir.path()));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.record(&format!("channel-{}", i), &i.to_string()).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = std::fs::read_to_string(store.path()).unwrap();
        let on_disk: RoutingState = serde_json::from_str(&content).unwrap();
        assert_eq!(on_disk, store.get());
        assert!(on_disk.last_channel.starts_with("channel-"));
    }
}
