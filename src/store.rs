//! Preset store
//!
//! Owner-side state: the catalogue, the selection cursor and the background
//! workers for save and load. Workers never touch owner state; they deposit
//! into the [`ResultMailbox`] and report through a channel, and the owner
//! picks both up in [`PresetStore::tick`].
//!
//! Save and load run on worker threads. List, delete, clear and rename block
//! the caller.

use chrono::Local;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::constants::store;
use crate::cursor::{CycleCommand, SelectionCursor};
use crate::error::{Operation, SyncError};
use crate::mailbox::{CatalogueSnapshot, LoadedPreset, ResultMailbox};
use crate::remote::{DeleteReport, PresetRecord, RemotePresets, SaveOutcome};

/// Completion report of a background operation
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Saved { name: String, outcome: SaveOutcome },
    Loaded { name: String },
    Failed { operation: Operation, name: String, error: SyncError },
}

/// Proof that the caller means to wipe every preset.
/// Only obtainable through [`ClearConfirmation::confirmed`].
#[derive(Debug)]
pub struct ClearConfirmation {
    _private: (),
}

impl ClearConfirmation {
    pub fn confirmed() -> Self {
        Self { _private: () }
    }
}

/// At most one operation of a family in flight
#[derive(Debug, Clone, Default)]
struct BusyFlag(Arc<AtomicBool>);

/// Clears its flag when dropped, on every exit path of a worker
struct BusyGuard(Arc<AtomicBool>);

impl BusyFlag {
    fn acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(Arc::clone(&self.0)))
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// `scene_YYYYMMDD_HHMMSS` in local time
pub fn timestamp_name() -> String {
    Local::now().format(store::TIMESTAMP_NAME_FORMAT).to_string()
}

/// Refresh the catalogue from a worker thread
fn refresh_into(remote: &RemotePresets, mailbox: &ResultMailbox, generation: &AtomicU64) {
    let generation = generation.load(Ordering::Acquire);
    match remote.fetch_catalogue() {
        Ok(records) => mailbox.deposit_catalogue(CatalogueSnapshot { generation, records }),
        Err(e) => warn!(error = %e, "Catalogue refresh after save failed"),
    }
}

pub struct PresetStore {
    remote: RemotePresets,
    catalogue: Vec<PresetRecord>,
    cursor: SelectionCursor,
    mailbox: Arc<ResultMailbox>,
    /// Bumped when the owner starts a synchronous refresh. A worker snapshot
    /// whose fetch started before `applied_generation` is stale.
    generation: Arc<AtomicU64>,
    applied_generation: u64,
    events_tx: Sender<StoreEvent>,
    events_rx: Receiver<StoreEvent>,
    saving: BusyFlag,
    loading: BusyFlag,
    workers: Vec<JoinHandle<()>>,
    loaded: Option<LoadedPreset>,
    auto_load: bool,
}

impl PresetStore {
    pub fn new(remote: RemotePresets, auto_load: bool) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            remote,
            catalogue: Vec::new(),
            cursor: SelectionCursor::new(),
            mailbox: Arc::new(ResultMailbox::new()),
            generation: Arc::new(AtomicU64::new(0)),
            applied_generation: 0,
            events_tx,
            events_rx,
            saving: BusyFlag::default(),
            loading: BusyFlag::default(),
            workers: Vec::new(),
            loaded: None,
            auto_load,
        }
    }

    pub fn catalogue(&self) -> &[PresetRecord] {
        &self.catalogue
    }

    pub fn cursor(&self) -> &SelectionCursor {
        &self.cursor
    }

    pub fn selected(&self) -> Option<&PresetRecord> {
        self.cursor.index().and_then(|i| self.catalogue.get(i))
    }

    pub fn selected_name(&self) -> Option<&str> {
        self.selected().map(|record| record.name.as_str())
    }

    pub fn auto_load(&self) -> bool {
        self.auto_load
    }

    pub fn set_auto_load(&mut self, enabled: bool) {
        self.auto_load = enabled;
    }

    pub fn is_saving(&self) -> bool {
        self.saving.is_set()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_set()
    }

    /// Workers running or results not yet picked up
    pub fn has_pending_work(&self) -> bool {
        !self.workers.is_empty() || self.mailbox.is_pending()
    }

    /// Fetch the catalogue on the calling thread
    pub fn refresh(&mut self) -> Result<usize, SyncError> {
        let generation = self.begin_refresh();
        let records = self.remote.fetch_catalogue()?;
        self.applied_generation = generation;
        self.apply_catalogue(records);
        Ok(self.catalogue.len())
    }

    fn begin_refresh(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn apply_snapshot(&mut self, snapshot: CatalogueSnapshot) {
        if snapshot.generation < self.applied_generation {
            debug!(
                generation = snapshot.generation,
                applied = self.applied_generation,
                "Dropped stale catalogue"
            );
            return;
        }
        self.applied_generation = snapshot.generation;
        self.apply_catalogue(snapshot.records);
    }

    fn apply_catalogue(&mut self, records: Vec<PresetRecord>) {
        self.catalogue = records;
        if self.cursor.rebound(self.catalogue.len()) {
            debug!(index = self.cursor.index_or_negative(), "Selection re-clamped");
        }
    }

    fn spawn_worker(&mut self, job: impl FnOnce() + Send + 'static) {
        self.workers.push(thread::spawn(job));
    }

    /// Upsert `name` in the background. Refreshes the catalogue when done.
    pub fn save(&mut self, name: &str, payload: Value) -> Result<(), SyncError> {
        let guard = self.saving.acquire().ok_or(SyncError::Busy(Operation::Save))?;
        let remote = self.remote.clone();
        let mailbox = Arc::clone(&self.mailbox);
        let generation = Arc::clone(&self.generation);
        let events = self.events_tx.clone();
        let name = name.to_string();

        info!(name = %name, "Saving preset");
        self.spawn_worker(move || {
            let _guard = guard;
            let event = match remote.save(&name, &payload) {
                Ok(outcome) => {
                    info!(name = %name, outcome = ?outcome, "Preset saved");
                    refresh_into(&remote, &mailbox, &generation);
                    StoreEvent::Saved { name, outcome }
                }
                Err(error) => {
                    error!(name = %name, error = %error, "Failed to save preset");
                    StoreEvent::Failed {
                        operation: Operation::Save,
                        name,
                        error,
                    }
                }
            };
            events.send(event).ok();
        });
        Ok(())
    }

    /// Overwrite the selected preset
    pub fn save_selected(&mut self, payload: Value) -> Result<(), SyncError> {
        let name = self.selected_name().ok_or(SyncError::NoSelection)?.to_string();
        self.save(&name, payload)
    }

    /// Insert under a fresh name derived from `base` in the background.
    /// A blank base gets a timestamp name.
    pub fn save_unique(&mut self, base: &str, payload: Value) -> Result<(), SyncError> {
        let guard = self.saving.acquire().ok_or(SyncError::Busy(Operation::Save))?;
        let remote = self.remote.clone();
        let mailbox = Arc::clone(&self.mailbox);
        let generation = Arc::clone(&self.generation);
        let events = self.events_tx.clone();
        let base = match base.trim() {
            "" => timestamp_name(),
            trimmed => trimmed.to_string(),
        };

        info!(base = %base, "Saving new preset");
        self.spawn_worker(move || {
            let _guard = guard;
            let event = match remote.insert_unique(&base, &payload) {
                Ok(name) => {
                    refresh_into(&remote, &mailbox, &generation);
                    StoreEvent::Saved {
                        name,
                        outcome: SaveOutcome::Inserted,
                    }
                }
                Err(error) => {
                    error!(base = %base, error = %error, "Failed to save new preset");
                    StoreEvent::Failed {
                        operation: Operation::Save,
                        name: base,
                        error,
                    }
                }
            };
            events.send(event).ok();
        });
        Ok(())
    }

    /// Fetch the payload of `name` in the background
    pub fn load(&mut self, name: &str) -> Result<(), SyncError> {
        let guard = self.loading.acquire().ok_or(SyncError::Busy(Operation::Load))?;
        let remote = self.remote.clone();
        let mailbox = Arc::clone(&self.mailbox);
        let events = self.events_tx.clone();
        let name = name.to_string();

        debug!(name = %name, "Loading preset");
        self.spawn_worker(move || {
            let _guard = guard;
            let event = match remote.fetch_payload(&name) {
                Ok(payload) => {
                    mailbox.deposit_loaded(LoadedPreset {
                        name: name.clone(),
                        payload,
                    });
                    StoreEvent::Loaded { name }
                }
                Err(error) => {
                    error!(name = %name, error = %error, "Failed to load preset");
                    StoreEvent::Failed {
                        operation: Operation::Load,
                        name,
                        error,
                    }
                }
            };
            events.send(event).ok();
        });
        Ok(())
    }

    pub fn load_selected(&mut self) -> Result<(), SyncError> {
        let name = self.selected_name().ok_or(SyncError::NoSelection)?.to_string();
        self.load(&name)
    }

    /// Fetch a payload on the calling thread
    pub fn load_now(&self, name: &str) -> Result<LoadedPreset, SyncError> {
        let payload = self.remote.fetch_payload(name)?;
        Ok(LoadedPreset {
            name: name.to_string(),
            payload,
        })
    }

    pub fn delete(&mut self, name: &str) -> Result<DeleteReport, SyncError> {
        info!(name = %name, "Deleting preset");
        let result = self.remote.delete_by_name(name);
        self.finish_with_refresh(result)
    }

    pub fn delete_selected(&mut self) -> Result<DeleteReport, SyncError> {
        let name = self.selected_name().ok_or(SyncError::NoSelection)?.to_string();
        self.delete(&name)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), SyncError> {
        let result = self.remote.rename(old, new);
        self.finish_with_refresh(result)
    }

    /// Delete every preset of the owner. On full success the catalogue is
    /// emptied locally; otherwise it is refreshed to show what survived.
    pub fn clear_all(&mut self, _confirmation: ClearConfirmation) -> Result<DeleteReport, SyncError> {
        warn!(owner_id = %self.remote.owner_id(), "Clearing all presets");
        match self.remote.delete_all() {
            Ok(report) => {
                info!(deleted = report.deleted, "All presets cleared");
                self.applied_generation = self.begin_refresh();
                self.apply_catalogue(Vec::new());
                Ok(report)
            }
            Err(e) => {
                if let Err(refresh_error) = self.refresh() {
                    warn!(error = %refresh_error, "Refresh after failed clear failed");
                }
                Err(e)
            }
        }
    }

    /// Refresh after a mutation. The mutation's own error wins.
    fn finish_with_refresh<T>(&mut self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        let refreshed = self.refresh();
        let value = result?;
        refreshed?;
        Ok(value)
    }

    pub fn select_next(&mut self) -> Option<&str> {
        self.cycle(CycleCommand::Forward)
    }

    pub fn select_previous(&mut self) -> Option<&str> {
        self.cycle(CycleCommand::Backward)
    }

    pub fn cycle(&mut self, command: CycleCommand) -> Option<&str> {
        if self.cursor.cycle(command) {
            self.selection_changed();
        }
        self.selected_name()
    }

    /// Jump to `index`, wrapping out-of-range values
    pub fn select(&mut self, index: isize) -> Option<&str> {
        if self.cursor.select(index) {
            self.selection_changed();
        }
        self.selected_name()
    }

    /// Move the selection and make sure its payload is on the way.
    /// Starts a load unless auto-load already did.
    pub fn browse(&mut self, command: CycleCommand) -> Result<String, SyncError> {
        let auto_loaded = self.cursor.cycle(command) && self.selection_changed();
        let name = self.selected_name().ok_or(SyncError::NoSelection)?.to_string();
        if !auto_loaded {
            self.load(&name)?;
        }
        Ok(name)
    }

    /// Returns true if an auto-load was started
    fn selection_changed(&mut self) -> bool {
        let Some(name) = self.selected_name().map(str::to_string) else {
            return false;
        };
        debug!(name = %name, index = self.cursor.index_or_negative(), "Selection changed");
        if !self.auto_load {
            return false;
        }
        match self.load(&name) {
            Ok(()) => true,
            Err(e) => {
                warn!(name = %name, error = %e, "Auto-load skipped");
                false
            }
        }
    }

    /// Pick up worker results. Call once per frame or loop iteration.
    pub fn tick(&mut self) -> Vec<StoreEvent> {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.workers.drain(..).partition(|handle| handle.is_finished());
        self.workers = running;
        for handle in finished {
            if handle.join().is_err() {
                error!("Preset worker panicked");
            }
        }

        if let Some(snapshot) = self.mailbox.take_catalogue() {
            self.apply_snapshot(snapshot);
        }
        if let Some(loaded) = self.mailbox.take_loaded() {
            debug!(name = %loaded.name, "Loaded preset ready");
            self.loaded = Some(loaded);
        }
        self.events_rx.try_iter().collect()
    }

    /// Block until every worker finished, then tick
    pub fn flush(&mut self) -> Vec<StoreEvent> {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Preset worker panicked");
            }
        }
        self.tick()
    }

    /// Most recent loaded payload, if not yet taken
    pub fn loaded(&self) -> Option<&LoadedPreset> {
        self.loaded.as_ref()
    }

    pub fn take_loaded(&mut self) -> Option<LoadedPreset> {
        self.loaded.take()
    }
}
