//! Preset sync
//!
//! Client for storing named JSON presets in a hosted Postgres REST service.
//! A [`PresetClient`] authenticates, keeps the owner's catalogue with a
//! cyclic selection, and runs saves and loads on background threads whose
//! results are picked up with [`PresetClient::tick`].

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod error;
pub mod mailbox;
pub mod remote;
pub mod rest;
pub mod session;
pub mod store;

pub use client::PresetClient;
pub use config::{AuthStrategy, Configuration, DeleteStrategy};
pub use cursor::{CycleCommand, SelectionCursor};
pub use error::{AuthError, Operation, SyncError};
pub use mailbox::LoadedPreset;
pub use remote::{DeleteReport, PresetRecord, SaveOutcome};
pub use session::{Session, SessionEvent};
pub use store::{ClearConfirmation, StoreEvent};
