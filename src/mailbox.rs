//! Single-slot handoff from worker threads to the owner thread
//!
//! A worker deposits its result; the owner takes it on its next tick.
//! A second deposit before the owner takes the first replaces it.

use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::remote::PresetRecord;

/// Payload fetched by a background load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPreset {
    pub name: String,
    pub payload: Value,
}

/// Catalogue fetched by a worker, stamped with the refresh generation
/// current when its fetch started
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogueSnapshot {
    pub generation: u64,
    pub records: Vec<PresetRecord>,
}

/// One value or nothing, guarded by a mutex
#[derive(Debug)]
pub struct Slot<T> {
    value: Mutex<Option<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`. Returns true if an unconsumed value was replaced.
    pub fn deposit(&self, value: T) -> bool {
        // A worker panicking mid-deposit leaves at worst a stale value
        let mut slot = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        slot.replace(value).is_some()
    }

    /// Take the pending value, leaving the slot empty
    pub fn take(&self) -> Option<T> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_pending(&self) -> bool {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Everything the owner can receive from workers
#[derive(Debug, Default)]
pub struct ResultMailbox {
    catalogue: Slot<CatalogueSnapshot>,
    loaded: Slot<LoadedPreset>,
}

impl ResultMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit_catalogue(&self, snapshot: CatalogueSnapshot) {
        if self.catalogue.deposit(snapshot) {
            debug!("Replaced an unconsumed catalogue");
        }
    }

    pub fn deposit_loaded(&self, loaded: LoadedPreset) {
        if self.loaded.deposit(loaded) {
            debug!("Replaced an unconsumed loaded preset");
        }
    }

    pub fn take_catalogue(&self) -> Option<CatalogueSnapshot> {
        self.catalogue.take()
    }

    pub fn take_loaded(&self) -> Option<LoadedPreset> {
        self.loaded.take()
    }

    pub fn is_pending(&self) -> bool {
        self.catalogue.is_pending() || self.loaded.is_pending()
    }
}
