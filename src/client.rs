//! Client facade
//!
//! Ties the session manager to a preset store. A store exists only while a
//! session is authenticated; every store operation before that fails with
//! [`SyncError::NotConnected`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Configuration;
use crate::cursor::CycleCommand;
use crate::error::SyncError;
use crate::mailbox::LoadedPreset;
use crate::remote::{DeleteReport, PresetRecord, RemotePresets};
use crate::rest::{Transport, UreqTransport};
use crate::session::{SessionEvent, SessionManager};
use crate::store::{ClearConfirmation, PresetStore, StoreEvent};

pub struct PresetClient {
    sessions: SessionManager,
    store: Option<PresetStore>,
}

impl PresetClient {
    /// Client talking HTTP with the configured timeout
    pub fn new(config: Configuration) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self::with_transport(config, Arc::new(UreqTransport::new(timeout)))
    }

    pub fn with_transport(config: Configuration, transport: Arc<dyn Transport>) -> Self {
        Self {
            sessions: SessionManager::new(config, transport),
            store: None,
        }
    }

    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        self.sessions.subscribe()
    }

    pub fn configuration(&self) -> &Configuration {
        self.sessions.configuration()
    }

    /// Authenticate once and load the catalogue.
    ///
    /// An invalid configuration fails before any network call. If
    /// authentication succeeds but the first listing fails, the client stays
    /// connected and the listing error is returned.
    pub fn connect(&mut self) -> Result<(), SyncError> {
        self.sessions.configuration().validate()?;
        self.store = None;
        self.sessions.setup()?;
        self.attach()
    }

    /// Discard the session and authenticate again
    pub fn reconnect(&mut self) -> Result<(), SyncError> {
        if let Some(store) = self.store.as_mut() {
            // Let in-flight work land before the store goes away
            store.flush();
        }
        self.store = None;
        self.sessions.configuration().validate()?;
        self.sessions.reconnect()?;
        self.attach()
    }

    fn attach(&mut self) -> Result<(), SyncError> {
        let executor = self.sessions.executor().ok_or(SyncError::NotConnected)?;
        let config = self.sessions.configuration();
        let remote = RemotePresets::new(
            executor,
            self.sessions.session().owner_id.clone(),
            config.table.clone(),
            config.delete_strategy,
        );
        let mut store = PresetStore::new(remote, config.auto_load);
        let listed = store.refresh();
        self.store = Some(store);

        match listed {
            Ok(count) => {
                info!(count, "Connected");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Connected, but listing presets failed");
                Err(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sessions.is_authenticated() && self.store.is_some()
    }

    pub fn status(&self) -> &'static str {
        if self.is_connected() { "CONNECTED" } else { "DISCONNECTED" }
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.is_connected()
            .then(|| self.sessions.session().owner_id.as_str())
    }

    pub fn store(&self) -> Result<&PresetStore, SyncError> {
        self.store.as_ref().ok_or(SyncError::NotConnected)
    }

    pub fn store_mut(&mut self) -> Result<&mut PresetStore, SyncError> {
        self.store.as_mut().ok_or(SyncError::NotConnected)
    }

    /// Cached catalogue; empty while disconnected
    pub fn catalogue(&self) -> &[PresetRecord] {
        self.store.as_ref().map(PresetStore::catalogue).unwrap_or_default()
    }

    /// Refetch the catalogue on the calling thread
    pub fn list(&mut self) -> Result<&[PresetRecord], SyncError> {
        let store = self.store_mut()?;
        store.refresh()?;
        Ok(store.catalogue())
    }

    pub fn save(&mut self, name: &str, payload: Value) -> Result<(), SyncError> {
        self.store_mut()?.save(name, payload)
    }

    /// Serialize `value` to JSON and save it under `name`
    pub fn save_serialized<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), SyncError> {
        let payload = serde_json::to_value(value)?;
        self.save(name, payload)
    }

    pub fn save_selected(&mut self, payload: Value) -> Result<(), SyncError> {
        self.store_mut()?.save_selected(payload)
    }

    pub fn save_unique(&mut self, base: &str, payload: Value) -> Result<(), SyncError> {
        self.store_mut()?.save_unique(base, payload)
    }

    pub fn load(&mut self, name: &str) -> Result<(), SyncError> {
        self.store_mut()?.load(name)
    }

    pub fn load_selected(&mut self) -> Result<(), SyncError> {
        self.store_mut()?.load_selected()
    }

    pub fn load_now(&self, name: &str) -> Result<LoadedPreset, SyncError> {
        self.store()?.load_now(name)
    }

    pub fn take_loaded(&mut self) -> Option<LoadedPreset> {
        self.store.as_mut()?.take_loaded()
    }

    /// Take the loaded payload and deserialize it
    pub fn take_loaded_as<T: DeserializeOwned>(&mut self) -> Option<Result<(String, T), SyncError>> {
        let LoadedPreset { name, payload } = self.take_loaded()?;
        Some(
            serde_json::from_value(payload)
                .map(|value| (name, value))
                .map_err(SyncError::from),
        )
    }

    pub fn delete(&mut self, name: &str) -> Result<DeleteReport, SyncError> {
        self.store_mut()?.delete(name)
    }

    pub fn delete_selected(&mut self) -> Result<DeleteReport, SyncError> {
        self.store_mut()?.delete_selected()
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), SyncError> {
        self.store_mut()?.rename(old, new)
    }

    pub fn clear_all(&mut self, confirmation: ClearConfirmation) -> Result<DeleteReport, SyncError> {
        self.store_mut()?.clear_all(confirmation)
    }

    pub fn select_next(&mut self) -> Option<&str> {
        self.store.as_mut()?.select_next()
    }

    pub fn select_previous(&mut self) -> Option<&str> {
        self.store.as_mut()?.select_previous()
    }

    pub fn cycle(&mut self, command: CycleCommand) -> Option<&str> {
        self.store.as_mut()?.cycle(command)
    }

    /// Step the selection and start loading it. See [`PresetStore::browse`].
    pub fn browse(&mut self, command: CycleCommand) -> Result<String, SyncError> {
        self.store_mut()?.browse(command)
    }

    pub fn select(&mut self, index: isize) -> Option<&str> {
        self.store.as_mut()?.select(index)
    }

    pub fn selected_name(&self) -> Option<&str> {
        self.store.as_ref()?.selected_name()
    }

    /// -1 while nothing is selected
    pub fn selected_index(&self) -> isize {
        self.store
            .as_ref()
            .map_or(-1, |store| store.cursor().index_or_negative())
    }

    /// Takes effect on the next selection change
    pub fn set_auto_load(&mut self, enabled: bool) {
        self.sessions.configuration_mut().auto_load = enabled;
        if let Some(store) = self.store.as_mut() {
            store.set_auto_load(enabled);
        }
    }

    pub fn tick(&mut self) -> Vec<StoreEvent> {
        self.store.as_mut().map(PresetStore::tick).unwrap_or_default()
    }

    pub fn flush(&mut self) -> Vec<StoreEvent> {
        self.store.as_mut().map(PresetStore::flush).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthStrategy;
    use crate::error::AuthError;
    use crate::rest::InMemoryBackend;
    use serde::Deserialize;
    use serde_json::json;

    fn static_config() -> Configuration {
        Configuration {
            service_base_url: "http://backend.local".to_string(),
            static_api_key: "anon".to_string(),
            owner_id: "owner-1".to_string(),
            ..Configuration::default()
        }
    }

    fn credentials_config(password: &str) -> Configuration {
        Configuration {
            auth_strategy: AuthStrategy::Credentials,
            owner_id: String::new(),
            email: "me@example.com".to_string(),
            password: password.to_string(),
            ..static_config()
        }
    }

    fn backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new("anon");
        backend.register_user("me@example.com", "pw", "user-42");
        backend
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Scene {
        brightness: f32,
        layers: Vec<String>,
    }

    #[test]
    fn test_static_connect_lists_without_auth_call() {
        let backend = backend();
        backend.seed("presets", "owner-1", "a", json!({}));
        let mut client = PresetClient::with_transport(static_config(), Arc::new(backend.clone()));

        client.connect().unwrap();
        assert!(client.is_connected());
        assert_eq!(client.status(), "CONNECTED");
        assert_eq!(client.selected_name(), Some("a"));

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.contains("/rest/v1/presets"));
    }

    #[test]
    fn test_invalid_configuration_never_touches_network() {
        let backend = backend();
        let config = Configuration {
            owner_id: String::new(),
            ..static_config()
        };
        let mut client = PresetClient::with_transport(config, Arc::new(backend.clone()));

        let err = client.connect().unwrap_err();
        assert!(matches!(err, SyncError::ConfigurationInvalid(_)));
        assert_eq!(backend.request_count(), 0);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_rejected_credentials_leave_client_disconnected() {
        let backend = backend();
        let mut client = PresetClient::with_transport(credentials_config("nope"), Arc::new(backend));
        let events = client.subscribe();

        let err = client.connect().unwrap_err();
        assert!(matches!(
            err,
            SyncError::AuthenticationFailed(AuthError::Rejected { status: 400, .. })
        ));
        assert!(!client.is_connected());
        assert_eq!(client.status(), "DISCONNECTED");
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Failed { .. }));
        assert_eq!(client.save("x", json!({})), Err(SyncError::NotConnected));
        assert_eq!(client.selected_index(), -1);
    }

    #[test]
    fn test_credentials_flow_scopes_to_assigned_owner() {
        let backend = backend();
        backend.seed("presets", "user-42", "mine", json!({}));
        backend.seed("presets", "owner-1", "theirs", json!({}));
        let mut client = PresetClient::with_transport(credentials_config("pw"), Arc::new(backend));

        client.connect().unwrap();
        assert_eq!(client.owner_id(), Some("user-42"));
        let names: Vec<_> = client.catalogue().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["mine"]);
    }

    #[test]
    fn test_typed_payload_round_trip() {
        let backend = backend();
        let mut client = PresetClient::with_transport(static_config(), Arc::new(backend));
        client.connect().unwrap();

        let scene = Scene {
            brightness: 0.75,
            layers: vec!["sky".to_string(), "fog".to_string()],
        };
        client.save_serialized("night", &scene).unwrap();
        client.flush();

        client.load("night").unwrap();
        client.flush();
        let (name, loaded) = client.take_loaded_as::<Scene>().unwrap().unwrap();
        assert_eq!(name, "night");
        assert_eq!(loaded, scene);
    }

    #[test]
    fn test_expired_token_surfaces_as_http_error() {
        let backend = backend();
        let mut client =
            PresetClient::with_transport(credentials_config("pw"), Arc::new(backend.clone()));
        client.connect().unwrap();

        backend.revoke_tokens();
        let err = client.list().unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 401, .. }));
        assert!(client.is_connected());

        client.reconnect().unwrap();
        assert!(client.list().is_ok());
    }

    #[test]
    fn test_clear_all_through_client() {
        let backend = backend();
        backend.seed("presets", "owner-1", "a", json!({}));
        let mut client = PresetClient::with_transport(static_config(), Arc::new(backend));
        client.connect().unwrap();

        client.clear_all(ClearConfirmation::confirmed()).unwrap();
        assert!(client.catalogue().is_empty());
        assert_eq!(client.selected_index(), -1);
        assert_eq!(client.select_next(), None);
    }
}
