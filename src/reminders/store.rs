//! Whole-file JSON store of reminders keyed by owner.
//!
//! Every mutation is a load/mutate/save cycle run under one async mutex, so
//! concurrent ingestions for different owners cannot drop each other's
//! writes. Saves go through a temp file and a rename.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::StoredReminder;
use crate::error::{ReminderBotError, Result};

pub type StoreState = BTreeMap<String, Vec<StoredReminder>>;

pub struct ReminderStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ReminderStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the full collection. A missing file is an empty store; an
    /// unreadable or unparsable one is logged, moved aside and also treated
    /// as empty.
    pub async fn load(&self) -> StoreState {
        let _guard = self.write_lock.lock().await;
        self.load_unlocked().await
    }

    /// Overwrites the full collection.
    pub async fn save(&self, state: &StoreState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save_unlocked(state).await
    }

    /// Runs `f` against the current state and persists the result if it
    /// changed. The whole cycle holds the store lock.
    pub async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreState) -> T,
    {
        self.mutate_then(f, |_| {}).await
    }

    /// Like [`mutate`](Self::mutate), then calls `committed` with the result
    /// once the new state is on disk, still under the store lock. Timer
    /// bookkeeping that must agree with the stored records goes there, so no
    /// other mutation can run between the write and the timer change.
    /// `committed` is skipped when the save fails.
    pub async fn mutate_then<T, F, C>(&self, f: F, committed: C) -> Result<T>
    where
        F: FnOnce(&mut StoreState) -> T,
        C: FnOnce(&T),
    {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load_unlocked().await;
        let before = state.clone();
        let out = f(&mut state);
        if state != before {
            self.save_unlocked(&state).await?;
        }
        committed(&out);
        Ok(out)
    }

    /// Appends `record` for `owner_id`. Returns `false` without writing when
    /// an identical record is already stored for that owner.
    pub async fn append(&self, owner_id: &str, record: StoredReminder) -> Result<bool> {
        self.append_then(owner_id, record, || {}).await
    }

    /// Appends and, only if the record was new and saved, runs `on_appended`
    /// under the store lock.
    pub async fn append_then<C>(
        &self,
        owner_id: &str,
        record: StoredReminder,
        on_appended: C,
    ) -> Result<bool>
    where
        C: FnOnce(),
    {
        self.mutate_then(
            |state| {
                let records = state.entry(owner_id.to_string()).or_default();
                if records.contains(&record) {
                    return false;
                }
                records.push(record);
                true
            },
            |appended| {
                if *appended {
                    on_appended();
                }
            },
        )
        .await
    }

    pub async fn records(&self, owner_id: &str) -> Vec<StoredReminder> {
        self.load().await.remove(owner_id).unwrap_or_default()
    }

    /// Empties the owner's list and returns how many records it held.
    pub async fn clear_owner(&self, owner_id: &str) -> Result<usize> {
        self.clear_owner_then(owner_id, || {}).await
    }

    /// Empties the owner's list, then runs `on_cleared` under the store lock
    /// once the empty list is saved.
    pub async fn clear_owner_then<C>(&self, owner_id: &str, on_cleared: C) -> Result<usize>
    where
        C: FnOnce(),
    {
        self.mutate_then(
            |state| match state.get_mut(owner_id) {
                Some(records) => {
                    let removed = records.len();
                    records.clear();
                    removed
                }
                None => 0,
            },
            |_| on_cleared(),
        )
        .await
    }

    /// Removes the first record equal to `record`.
    pub async fn remove_record(&self, owner_id: &str, record: &StoredReminder) -> Result<bool> {
        self.mutate(|state| {
            let Some(records) = state.get_mut(owner_id) else {
                return false;
            };
            match records.iter().position(|existing| existing == record) {
                Some(index) => {
                    records.remove(index);
                    true
                }
                None => false,
            }
        })
        .await
    }

    /// Swaps `old` for `new` in place. Returns `false` when `old` is no
    /// longer stored, e.g. because the owner cleared their list meanwhile.
    pub async fn replace_record(
        &self,
        owner_id: &str,
        old: &StoredReminder,
        new: StoredReminder,
    ) -> Result<bool> {
        self.replace_record_then(owner_id, old, new, || {}).await
    }

    /// Replaces and, only if `old` was still there and the swap was saved,
    /// runs `on_replaced` under the store lock.
    pub async fn replace_record_then<C>(
        &self,
        owner_id: &str,
        old: &StoredReminder,
        new: StoredReminder,
        on_replaced: C,
    ) -> Result<bool>
    where
        C: FnOnce(),
    {
        self.mutate_then(
            |state| {
                let Some(records) = state.get_mut(owner_id) else {
                    return false;
                };
                match records.iter().position(|existing| existing == old) {
                    Some(index) => {
                        records[index] = new;
                        true
                    }
                    None => false,
                }
            },
            |replaced| {
                if *replaced {
                    on_replaced();
                }
            },
        )
        .await
    }

    async fn load_unlocked(&self) -> StoreState {
        let path = self.path.clone();
        let loaded = tokio::task::spawn_blocking(move || read_state_sync(&path)).await;
        match loaded {
            Ok(state) => state,
            Err(err) => {
                error!(error = %err, "reminder store load task failed");
                StoreState::new()
            }
        }
    }

    async fn save_unlocked(&self, state: &StoreState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ReminderBotError::Serialization(e.to_string()))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_state_sync(&path, &json))
            .await
            .map_err(|e| ReminderBotError::Runtime(e.to_string()))??;
        debug!(path = %self.path.display(), "reminder store saved");
        Ok(())
    }
}

fn read_state_sync(path: &Path) -> StoreState {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return StoreState::new(),
        Err(err) => {
            error!(path = %path.display(), error = %err, "cannot read reminder store, starting empty");
            return StoreState::new();
        }
    };

    if raw.trim().is_empty() {
        return StoreState::new();
    }

    match serde_json::from_str::<StoreState>(&raw) {
        Ok(state) => state,
        Err(err) => {
            let quarantine = sibling_with_suffix(path, ".corrupt");
            error!(
                path = %path.display(),
                quarantine = %quarantine.display(),
                error = %err,
                "reminder store is corrupt, starting empty"
            );
            if let Err(err) = std::fs::rename(path, &quarantine) {
                warn!(error = %err, "cannot move corrupt reminder store aside");
            }
            StoreState::new()
        }
    }
}

fn write_state_sync(path: &Path, json: &str) -> Result<()> {
    let tmp_path = sibling_with_suffix(path, ".tmp");
    std::fs::write(&tmp_path, json).map_err(|e| {
        ReminderBotError::Storage(format!("cannot write {}: {e}", tmp_path.display()))
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        ReminderBotError::Storage(format!("cannot replace {}: {e}", path.display()))
    })
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ReminderBotError::Storage(e.to_string()))?;
        }
    }
    Ok(())
}
