//! Owner-scoped preset operations against the presets table
//!
//! Every call here is blocking and may run on any thread; [`RemotePresets`]
//! is cheap to clone and shares one executor.

use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DeleteStrategy;
use crate::constants::{columns, store};
use crate::error::SyncError;
use crate::rest::{HttpOutcome, Method, Prefer, Query, RestExecutor};

/// One row of the catalogue. `payload` is absent in listings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PresetRecord {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(rename = "preset_name")]
    pub name: String,
    #[serde(rename = "preset_data", default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Ids arrive as numbers or uuid strings depending on the table
fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// Name existed; its payload was overwritten
    Updated,
}

/// How many rows a delete touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteReport {
    pub deleted: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct RemotePresets {
    executor: Arc<RestExecutor>,
    owner_id: String,
    table: String,
    delete_strategy: DeleteStrategy,
}

impl RemotePresets {
    pub fn new(
        executor: RestExecutor,
        owner_id: impl Into<String>,
        table: impl Into<String>,
        delete_strategy: DeleteStrategy,
    ) -> Self {
        Self {
            executor: Arc::new(executor),
            owner_id: owner_id.into(),
            table: table.into(),
            delete_strategy,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn owned(&self) -> Query {
        Query::new().eq(columns::OWNER, &self.owner_id)
    }

    fn call(&self, method: Method, query: &Query, body: Option<&Value>, prefer: Prefer) -> HttpOutcome {
        let path = RestExecutor::table_path(&self.table, query);
        self.executor.execute_with(method, &path, body, prefer)
    }

    /// Names and timestamps of every preset, oldest first
    pub fn fetch_catalogue(&self) -> Result<Vec<PresetRecord>, SyncError> {
        let query = self
            .owned()
            .select(&[columns::ID, columns::NAME, columns::CREATED_AT, columns::UPDATED_AT])
            .order_asc(columns::CREATED_AT);
        let outcome = self.call(Method::Get, &query, None, Prefer::Representation);
        if !outcome.ok {
            return Err(SyncError::from_outcome(&outcome, ""));
        }

        // One bad row fails the whole listing
        let records: Vec<PresetRecord> = outcome.json()?;
        debug!(count = records.len(), "Fetched catalogue");
        Ok(records)
    }

    /// Insert a new row; a taken name yields [`SyncError::Conflict`]
    pub fn insert(&self, name: &str, payload: &Value) -> Result<(), SyncError> {
        let body = json!({
            (columns::OWNER): self.owner_id,
            (columns::NAME): name,
            (columns::PAYLOAD): payload,
        });
        let outcome = self.call(Method::Post, &Query::new(), Some(&body), Prefer::Representation);
        if outcome.ok {
            Ok(())
        } else {
            Err(SyncError::from_outcome(&outcome, name))
        }
    }

    /// Overwrite the payload of an existing row
    pub fn update(&self, name: &str, payload: &Value) -> Result<(), SyncError> {
        let body = json!({ (columns::PAYLOAD): payload });
        let query = self.owned().eq(columns::NAME, name);
        let outcome = self.call(Method::Patch, &query, Some(&body), Prefer::Representation);
        if !outcome.ok {
            return Err(SyncError::from_outcome(&outcome, name));
        }
        // An empty representation means the row vanished in between
        match outcome.json::<Vec<Value>>() {
            Ok(rows) if rows.is_empty() => Err(SyncError::NotFound(name.to_string())),
            _ => Ok(()),
        }
    }

    /// Insert, or overwrite on a uniqueness conflict
    pub fn save(&self, name: &str, payload: &Value) -> Result<SaveOutcome, SyncError> {
        match self.insert(name, payload) {
            Ok(()) => Ok(SaveOutcome::Inserted),
            Err(e) if e.is_conflict() => {
                debug!(name = %name, "Name taken, updating existing preset");
                self.update(name, payload).map(|()| SaveOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }

    /// Insert under `base`, then `base_1`, `base_2`, ... until a name is free.
    /// Returns the name actually used.
    pub fn insert_unique(&self, base: &str, payload: &Value) -> Result<String, SyncError> {
        for attempt in 0..store::MAX_UNIQUE_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                base.to_string()
            } else {
                format!("{base}_{attempt}")
            };
            match self.insert(&candidate, payload) {
                Ok(()) => {
                    info!(name = %candidate, attempts = attempt + 1, "Saved preset under unique name");
                    return Ok(candidate);
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(SyncError::UniqueNameExhausted {
            base: base.to_string(),
            attempts: store::MAX_UNIQUE_NAME_ATTEMPTS,
        })
    }

    /// Payload of the preset called `name`
    pub fn fetch_payload(&self, name: &str) -> Result<Value, SyncError> {
        let query = self
            .owned()
            .eq(columns::NAME, name)
            .select(&[columns::PAYLOAD]);
        let outcome = self.call(Method::Get, &query, None, Prefer::Representation);
        if !outcome.ok {
            return Err(SyncError::from_outcome(&outcome, name));
        }

        let mut rows: Vec<Value> = outcome.json()?;
        if rows.is_empty() {
            return Err(SyncError::NotFound(name.to_string()));
        }
        match rows.swap_remove(0) {
            Value::Object(mut row) => row
                .remove(columns::PAYLOAD)
                .ok_or_else(|| SyncError::Parse(format!("row for '{name}' has no {}", columns::PAYLOAD))),
            other => Err(SyncError::Parse(format!("unexpected row: {other}"))),
        }
    }

    pub fn delete_by_name(&self, name: &str) -> Result<DeleteReport, SyncError> {
        self.delete_matching(self.owned().eq(columns::NAME, name))
    }

    /// Remove every preset of this owner
    pub fn delete_all(&self) -> Result<DeleteReport, SyncError> {
        self.delete_matching(self.owned())
    }

    /// Save `new` with the payload of `old`, then delete `old`
    pub fn rename(&self, old: &str, new: &str) -> Result<(), SyncError> {
        if old == new {
            return Ok(());
        }
        let payload = self.fetch_payload(old)?;
        self.save(new, &payload)?;
        self.delete_by_name(old)?;
        info!(from = %old, to = %new, "Renamed preset");
        Ok(())
    }

    fn delete_matching(&self, filter: Query) -> Result<DeleteReport, SyncError> {
        if self.delete_strategy == DeleteStrategy::ById {
            return self.delete_each(filter);
        }

        let query = filter.clone().select(&[columns::ID]);
        let outcome = self.call(Method::Delete, &query, None, Prefer::Representation);
        if outcome.ok {
            let deleted = outcome.json::<Vec<Value>>().map(|rows| rows.len()).unwrap_or(0);
            debug!(deleted, "Filtered delete succeeded");
            return Ok(DeleteReport {
                deleted,
                total: deleted,
            });
        }
        if matches!(outcome.status, 405 | 501) {
            warn!(status = outcome.status, "Filtered delete refused, deleting by id");
            return self.delete_each(filter);
        }
        Err(SyncError::from_outcome(&outcome, ""))
    }

    /// Select matching ids, then delete one row at a time
    fn delete_each(&self, filter: Query) -> Result<DeleteReport, SyncError> {
        let query = filter.select(&[columns::ID]);
        let outcome = self.call(Method::Get, &query, None, Prefer::Representation);
        if !outcome.ok {
            return Err(SyncError::from_outcome(&outcome, ""));
        }

        let ids: Vec<String> = outcome
            .json::<Vec<Value>>()?
            .iter()
            .filter_map(|row| match row.get(columns::ID)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();

        let total = ids.len();
        let mut deleted = 0;
        let mut last_error = None;
        for id in &ids {
            let query = self.owned().eq(columns::ID, id);
            let outcome = self.call(Method::Delete, &query, None, Prefer::Minimal);
            if outcome.ok {
                deleted += 1;
            } else {
                warn!(id = %id, status = outcome.status, "Failed to delete preset");
                last_error = Some(SyncError::from_outcome(&outcome, ""));
            }
        }

        match last_error {
            None => Ok(DeleteReport { deleted, total }),
            Some(e) if deleted == 0 => Err(e),
            Some(_) => Err(SyncError::PartialFailure { deleted, total }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::rest::InMemoryBackend;
    use crate::session::Session;

    fn remote_with(backend: &InMemoryBackend, strategy: DeleteStrategy) -> RemotePresets {
        let config = Configuration {
            service_base_url: "http://backend.local".to_string(),
            static_api_key: "anon".to_string(),
            owner_id: "owner-1".to_string(),
            ..Configuration::default()
        };
        let session = Session {
            authenticated: true,
            owner_id: "owner-1".to_string(),
            bearer_token: "anon".to_string(),
        };
        let executor = RestExecutor::new(Arc::new(backend.clone()), &config, &session);
        RemotePresets::new(executor, "owner-1", "presets", strategy)
    }

    fn names(remote: &RemotePresets) -> Vec<String> {
        remote
            .fetch_catalogue()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    #[test]
    fn test_save_twice_keeps_one_row_with_second_payload() {
        let backend = InMemoryBackend::new("anon");
        let remote = remote_with(&backend, DeleteStrategy::Filtered);

        assert_eq!(remote.save("scene", &json!({ "v": 1 })).unwrap(), SaveOutcome::Inserted);
        assert_eq!(remote.save("scene", &json!({ "v": 2 })).unwrap(), SaveOutcome::Updated);

        assert_eq!(names(&remote), vec!["scene"]);
        assert_eq!(remote.fetch_payload("scene").unwrap(), json!({ "v": 2 }));
    }

    #[test]
    fn test_insert_unique_appends_suffixes() {
        let backend = InMemoryBackend::new("anon");
        let remote = remote_with(&backend, DeleteStrategy::Filtered);
        remote.insert("scene", &json!({})).unwrap();

        assert_eq!(remote.insert_unique("scene", &json!({})).unwrap(), "scene_1");
        assert_eq!(remote.insert_unique("scene", &json!({})).unwrap(), "scene_2");
        assert_eq!(remote.insert_unique("scene", &json!({})).unwrap(), "scene_3");
        assert_eq!(names(&remote), vec!["scene", "scene_1", "scene_2", "scene_3"]);
    }

    #[test]
    fn test_insert_unique_gives_up_after_budget() {
        let backend = InMemoryBackend::new("anon");
        backend.seed("presets", "owner-1", "s", json!({}));
        for i in 1..store::MAX_UNIQUE_NAME_ATTEMPTS {
            backend.seed("presets", "owner-1", &format!("s_{i}"), json!({}));
        }
        let remote = remote_with(&backend, DeleteStrategy::Filtered);
        let before = backend.request_count();

        let err = remote.insert_unique("s", &json!({})).unwrap_err();
        assert_eq!(
            err,
            SyncError::UniqueNameExhausted {
                base: "s".to_string(),
                attempts: 100
            }
        );
        assert_eq!(backend.request_count() - before, 100);
    }

    #[test]
    fn test_insert_unique_stops_on_other_errors() {
        let backend = InMemoryBackend::new("anon");
        let remote = remote_with(&backend, DeleteStrategy::Filtered);
        backend.set_offline(true);
        let err = remote.insert_unique("scene", &json!({})).unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(backend.request_count(), 1);
    }

    #[test]
    fn test_catalogue_is_owner_scoped_and_ordered() {
        let backend = InMemoryBackend::new("anon");
        backend.seed("presets", "owner-1", "b", json!({}));
        backend.seed("presets", "someone-else", "x", json!({}));
        backend.seed("presets", "owner-1", "a", json!({}));
        let remote = remote_with(&backend, DeleteStrategy::Filtered);

        let records = remote.fetch_catalogue().unwrap();
        assert_eq!(records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(records.iter().all(|r| r.payload.is_none()));
        assert!(!records[0].created_at.is_empty());
    }

    #[test]
    fn test_payload_round_trip() {
        let backend = InMemoryBackend::new("anon");
        let remote = remote_with(&backend, DeleteStrategy::Filtered);
        let payload = json!({ "color": [1.0, 0.5, 0.25], "label": "dusk", "nested": { "on": true } });
        remote.save("dusk", &payload).unwrap();
        assert_eq!(remote.fetch_payload("dusk").unwrap(), payload);
    }

    #[test]
    fn test_fetch_missing_payload() {
        let backend = InMemoryBackend::new("anon");
        let remote = remote_with(&backend, DeleteStrategy::Filtered);
        assert_eq!(
            remote.fetch_payload("nope").unwrap_err(),
            SyncError::NotFound("nope".to_string())
        );
    }

    #[test]
    fn test_filtered_delete_counts_rows() {
        let backend = InMemoryBackend::new("anon");
        backend.seed("presets", "owner-1", "a", json!({}));
        backend.seed("presets", "owner-1", "b", json!({}));
        backend.seed("presets", "other", "c", json!({}));
        let remote = remote_with(&backend, DeleteStrategy::Filtered);

        let report = remote.delete_all().unwrap();
        assert_eq!(report, DeleteReport { deleted: 2, total: 2 });
        assert_eq!(backend.rows("presets").len(), 1);
    }

    #[test]
    fn test_refused_filtered_delete_falls_back_to_ids() {
        let backend = InMemoryBackend::new("anon");
        backend.seed("presets", "owner-1", "a", json!({}));
        backend.seed("presets", "owner-1", "b", json!({}));
        backend.reject_filtered_deletes(true);
        let remote = remote_with(&backend, DeleteStrategy::Filtered);

        let report = remote.delete_all().unwrap();
        assert_eq!(report, DeleteReport { deleted: 2, total: 2 });
        assert!(backend.rows("presets").is_empty());
    }

    #[test]
    fn test_partial_failure_reported() {
        let backend = InMemoryBackend::new("anon");
        backend.seed("presets", "owner-1", "a", json!({}));
        let locked = backend.seed("presets", "owner-1", "b", json!({}));
        backend.seed("presets", "owner-1", "c", json!({}));
        backend.fail_delete_of(locked);
        let remote = remote_with(&backend, DeleteStrategy::ById);

        let err = remote.delete_all().unwrap_err();
        assert_eq!(err, SyncError::PartialFailure { deleted: 2, total: 3 });
        assert_eq!(names(&remote), vec!["b"]);
    }

    #[test]
    fn test_rename_moves_payload() {
        let backend = InMemoryBackend::new("anon");
        let remote = remote_with(&backend, DeleteStrategy::Filtered);
        remote.save("old", &json!({ "k": 7 })).unwrap();

        remote.rename("old", "new").unwrap();
        assert_eq!(names(&remote), vec!["new"]);
        assert_eq!(remote.fetch_payload("new").unwrap(), json!({ "k": 7 }));
    }

    #[test]
    fn test_one_malformed_row_fails_the_listing() {
        struct Listing;
        impl crate::rest::Transport for Listing {
            fn send(&self, _request: &crate::rest::HttpRequest) -> HttpOutcome {
                let rows = json!([
                    { "id": 1, "preset_name": "a" },
                    { "id": 2 },
                ]);
                HttpOutcome::new(200, rows.to_string())
            }
        }
        let config = Configuration {
            service_base_url: "http://backend.local".to_string(),
            static_api_key: "anon".to_string(),
            owner_id: "owner-1".to_string(),
            ..Configuration::default()
        };
        let executor = RestExecutor::new(Arc::new(Listing), &config, &Session::default());
        let remote = RemotePresets::new(executor, "owner-1", "presets", DeleteStrategy::Filtered);

        assert!(matches!(remote.fetch_catalogue(), Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_record_accepts_string_ids() {
        let record: PresetRecord = serde_json::from_value(json!({
            "id": "6f1c",
            "preset_name": "a",
        }))
        .unwrap();
        assert_eq!(record.id, "6f1c");
        assert_eq!(record.payload, None);
    }
}
