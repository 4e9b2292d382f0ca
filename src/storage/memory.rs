//! In-Memory Object Store
//!
//! Bildet einen Objekt-Speicher mit aufsteigenden Indizes nach; absteigende
//! Listen entstehen durch umgekehrte Iteration im Adapter.

use super::adapter::StorageAdapter;
use super::error::StorageError;
use super::models::{
    now_millis, CallHistory, CallRecordUpdate, NewCallRecord, NewRecording, Page, Recording,
    StorageStats, UserSettings, UserSettingsUpdate,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// Index-Schlüssel: (Zeit in ms, Einfüge-Reihenfolge, ID)
type IndexKey = (i64, u64, String);

#[derive(Default)]
struct Store {
    open: bool,
    seq: u64,
    calls: HashMap<String, (CallHistory, IndexKey)>,
    calls_by_start: BTreeSet<IndexKey>,
    recordings: HashMap<String, (Recording, IndexKey)>,
    recordings_by_created: BTreeSet<IndexKey>,
    settings: Option<UserSettings>,
}

impl Store {
    fn next_key(&mut self, ms: i64, id: &str) -> IndexKey {
        self.seq += 1;
        (ms, self.seq, id.to_string())
    }

    fn remove_recording(&mut self, id: &str) -> bool {
        match self.recordings.remove(id) {
            Some((_, key)) => {
                self.recordings_by_created.remove(&key);
                true
            }
            None => false,
        }
    }
}

pub struct MemoryStorage {
    store: Mutex<Store>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
        }
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut Store) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut store = self.store.lock();
        if !store.open {
            return Err(StorageError::Closed);
        }
        f(&mut *store)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn page_of<'a, T: Clone + 'a>(
    index: impl DoubleEndedIterator<Item = &'a IndexKey>,
    lookup: impl Fn(&str) -> Option<&'a T>,
    page: Page,
) -> Vec<T> {
    index
        .rev()
        .skip(page.offset)
        .take(page.limit)
        .filter_map(|(_, _, id)| lookup(id.as_str()).cloned())
        .collect()
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.store.lock().open = true;
        tracing::debug!("Memory storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.store.lock().open = false;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save_call_record(&self, record: NewCallRecord) -> Result<CallHistory, StorageError> {
        self.with_store(|store| {
            let id = uuid::Uuid::new_v4().to_string();
            let call = CallHistory::from_new(id.clone(), record, now_millis());
            let key = store.next_key(call.start_time.timestamp_millis(), &id);

            store.calls_by_start.insert(key.clone());
            store.calls.insert(id, (call.clone(), key));
            Ok(call)
        })
    }

    async fn get_call_record(&self, id: &str) -> Result<Option<CallHistory>, StorageError> {
        self.with_store(|store| Ok(store.calls.get(id).map(|(c, _)| c.clone())))
    }

    async fn get_call_history(&self, page: Page) -> Result<Vec<CallHistory>, StorageError> {
        self.with_store(|store| {
            Ok(page_of(
                store.calls_by_start.iter(),
                |id| store.calls.get(id).map(|(c, _)| c),
                page,
            ))
        })
    }

    async fn update_call_record(
        &self,
        id: &str,
        update: CallRecordUpdate,
    ) -> Result<CallHistory, StorageError> {
        self.with_store(|store| {
            let (call, _) = store
                .calls
                .get_mut(id)
                .ok_or_else(|| StorageError::NotFound(format!("call {}", id)))?;
            call.apply(update);
            Ok(call.clone())
        })
    }

    async fn delete_call_record(&self, id: &str) -> Result<bool, StorageError> {
        self.with_store(|store| {
            let Some((_, key)) = store.calls.remove(id) else {
                return Ok(false);
            };
            store.calls_by_start.remove(&key);

            let linked: Vec<String> = store
                .recordings
                .values()
                .filter(|(r, _)| r.call_history_id.as_deref() == Some(id))
                .map(|(r, _)| r.id.clone())
                .collect();
            for recording_id in linked {
                store.remove_recording(&recording_id);
            }
            Ok(true)
        })
    }

    async fn get_user_settings(&self) -> Result<UserSettings, StorageError> {
        self.with_store(|store| {
            Ok(store
                .settings
                .get_or_insert_with(|| UserSettings::defaults(now_millis()))
                .clone())
        })
    }

    async fn update_user_settings(
        &self,
        update: UserSettingsUpdate,
    ) -> Result<UserSettings, StorageError> {
        self.with_store(|store| {
            let now = now_millis();
            let settings = store
                .settings
                .get_or_insert_with(|| UserSettings::defaults(now));
            settings.apply(update, now);
            Ok(settings.clone())
        })
    }

    async fn save_recording(&self, recording: NewRecording) -> Result<Recording, StorageError> {
        self.with_store(|store| {
            if let Some(call_id) = &recording.call_history_id {
                if !store.calls.contains_key(call_id) {
                    return Err(StorageError::InvalidReference(call_id.clone()));
                }
            }

            let id = uuid::Uuid::new_v4().to_string();
            let recording = Recording::from_new(id.clone(), recording, now_millis());
            let key = store.next_key(recording.created_at.timestamp_millis(), &id);

            store.recordings_by_created.insert(key.clone());
            store.recordings.insert(id, (recording.clone(), key));
            Ok(recording)
        })
    }

    async fn get_recording(&self, id: &str) -> Result<Option<Recording>, StorageError> {
        self.with_store(|store| Ok(store.recordings.get(id).map(|(r, _)| r.clone())))
    }

    async fn get_recordings(&self, page: Page) -> Result<Vec<Recording>, StorageError> {
        self.with_store(|store| {
            Ok(page_of(
                store.recordings_by_created.iter(),
                |id| store.recordings.get(id).map(|(r, _)| r),
                page,
            ))
        })
    }

    async fn get_recordings_by_call(
        &self,
        call_history_id: &str,
    ) -> Result<Vec<Recording>, StorageError> {
        self.with_store(|store| {
            Ok(store
                .recordings_by_created
                .iter()
                .rev()
                .filter_map(|(_, _, id)| store.recordings.get(id))
                .filter(|(r, _)| r.call_history_id.as_deref() == Some(call_history_id))
                .map(|(r, _)| r.clone())
                .collect())
        })
    }

    async fn delete_recording(&self, id: &str) -> Result<bool, StorageError> {
        self.with_store(|store| Ok(store.remove_recording(id)))
    }

    async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        self.with_store(|store| {
            let mut stats = StorageStats::default();
            for (call, _) in store.calls.values() {
                stats.count_call(call);
            }
            for (recording, _) in store.recordings.values() {
                stats.count_recording(recording);
            }
            Ok(stats)
        })
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.with_store(|store| {
            let open = store.open;
            *store = Store {
                open,
                ..Store::default()
            };
            Ok(())
        })
    }
}
