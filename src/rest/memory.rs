//! In-process backend speaking the same REST dialect as the remote service
//!
//! Supports `eq.` filters, `order`, `select`, a unique (owner, name) constraint,
//! method-override PATCH, filtered DELETE and the password-grant token endpoint.
//! Cloning yields another handle to the same storage.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use url::Url;

use super::{HttpOutcome, HttpRequest, Method, Transport};
use crate::constants::{columns, endpoints, headers};

#[derive(Debug, Clone)]
struct Row {
    seq: u64,
    fields: Map<String, Value>,
}

#[derive(Debug, Default)]
struct State {
    api_key: String,
    /// email -> (password, user id)
    users: HashMap<String, (String, String)>,
    issued_tokens: HashSet<String>,
    tables: HashMap<String, Vec<Row>>,
    next_id: u64,
    offline: bool,
    reject_filtered_delete: bool,
    failing_ids: HashSet<String>,
    requests: Vec<HttpRequest>,
}

#[derive(Debug, Default)]
struct Params {
    filters: Vec<(String, String)>,
    order: Option<(String, bool)>,
    select: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<State>>,
}

impl InMemoryBackend {
    /// Backend accepting `api_key` on every call
    pub fn new(api_key: &str) -> Self {
        let backend = Self::default();
        backend.state().api_key = api_key.to_string();
        backend
    }

    fn state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Account accepted by the password grant
    pub fn register_user(&self, email: &str, password: &str, user_id: &str) {
        self.state().users.insert(
            email.to_string(),
            (password.to_string(), user_id.to_string()),
        );
    }

    /// Insert a row directly, bypassing auth. Returns its id.
    pub fn seed(&self, table: &str, owner: &str, name: &str, payload: Value) -> u64 {
        let mut state = self.state();
        let mut fields = Map::new();
        fields.insert(columns::OWNER.to_string(), json!(owner));
        fields.insert(columns::NAME.to_string(), json!(name));
        fields.insert(columns::PAYLOAD.to_string(), payload);
        let row = state.new_row(fields);
        let id = row.seq;
        state.tables.entry(table.to_string()).or_default().push(row);
        id
    }

    /// Snapshot of a table in insertion order
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state()
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|r| Value::Object(r.fields.clone())).collect())
            .unwrap_or_default()
    }

    /// Every call fails as if the host were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Answer 405 to DELETEs that do not target a single id
    pub fn reject_filtered_deletes(&self, reject: bool) {
        self.state().reject_filtered_delete = reject;
    }

    /// Answer 500 to any DELETE touching this row
    pub fn fail_delete_of(&self, id: u64) {
        self.state().failing_ids.insert(id.to_string());
    }

    /// Invalidate every token issued so far
    pub fn revoke_tokens(&self) {
        self.state().issued_tokens.clear();
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }
}

impl Transport for InMemoryBackend {
    fn send(&self, request: &HttpRequest) -> HttpOutcome {
        let mut state = self.state();
        state.requests.push(request.clone());

        if state.offline {
            return HttpOutcome::transport_failure("Connection error: backend offline");
        }
        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(e) => return HttpOutcome::transport_failure(format!("Connection error: {e}")),
        };

        if url.path() == endpoints::AUTH_TOKEN {
            return state.password_grant(&url, request);
        }
        let table = url
            .path()
            .strip_prefix(endpoints::REST_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|table| !table.is_empty() && !table.contains('/'))
            .map(str::to_string);

        match table {
            Some(table) => state.table_call(&table, &url, request),
            None => error(404, "not found"),
        }
    }
}

impl State {
    fn new_row(&mut self, fields: Map<String, Value>) -> Row {
        self.next_id += 1;
        let now = timestamp();
        let mut fields = fields;
        fields.insert(columns::ID.to_string(), json!(self.next_id));
        fields.insert(columns::CREATED_AT.to_string(), json!(now));
        fields.insert(columns::UPDATED_AT.to_string(), json!(now));
        Row {
            seq: self.next_id,
            fields,
        }
    }

    fn password_grant(&mut self, url: &Url, request: &HttpRequest) -> HttpOutcome {
        if request.method != Method::Post {
            return error(405, "method not allowed");
        }
        let grant_ok = url
            .query_pairs()
            .any(|(k, v)| k == "grant_type" && v == endpoints::PASSWORD_GRANT);
        if !grant_ok {
            return error(400, "unsupported_grant_type");
        }
        if request.header_value(headers::API_KEY) != Some(self.api_key.as_str()) {
            return error(401, "Invalid API key");
        }

        let body: Value = match request.body.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(body)) => body,
            _ => return error(400, "invalid request body"),
        };
        let email = body.get("email").and_then(Value::as_str).unwrap_or_default();
        let password = body.get("password").and_then(Value::as_str).unwrap_or_default();

        let user_id = match self.users.get(email) {
            Some((expected, user_id)) if expected == password => user_id.clone(),
            _ => {
                let body = json!({
                    "error": "invalid_grant",
                    "error_description": "Invalid login credentials",
                });
                return HttpOutcome::new(400, body.to_string());
            }
        };

        let token = format!("token-{}-{}", user_id, self.issued_tokens.len() + 1);
        self.issued_tokens.insert(token.clone());
        let body = json!({
            "access_token": token,
            "token_type": "bearer",
            "expires_in": 3600,
            "user": { "id": user_id, "email": email },
        });
        HttpOutcome::new(200, body.to_string())
    }

    fn authorized(&self, request: &HttpRequest) -> Result<(), HttpOutcome> {
        if request.header_value(headers::API_KEY) != Some(self.api_key.as_str()) {
            return Err(error(401, "Invalid API key"));
        }
        let bearer = request
            .header_value(headers::AUTHORIZATION)
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default();
        if bearer == self.api_key || self.issued_tokens.contains(bearer) {
            Ok(())
        } else {
            Err(error(401, "JWT expired"))
        }
    }

    fn table_call(&mut self, table: &str, url: &Url, request: &HttpRequest) -> HttpOutcome {
        if let Err(denied) = self.authorized(request) {
            return denied;
        }
        let params = match parse_params(url) {
            Ok(params) => params,
            Err(outcome) => return outcome,
        };
        let representation =
            request.header_value(headers::PREFER) == Some(headers::RETURN_REPRESENTATION);
        let overridden = request
            .header_value(headers::METHOD_OVERRIDE)
            .is_some_and(|m| m.eq_ignore_ascii_case("PATCH"));

        match request.method {
            Method::Get => self.select(table, &params),
            Method::Post if overridden => self.update(table, &params, request, representation),
            Method::Patch => self.update(table, &params, request, representation),
            Method::Post => self.insert(table, request, representation),
            Method::Delete => self.delete(table, &params, representation),
        }
    }

    fn select(&self, table: &str, params: &Params) -> HttpOutcome {
        let mut rows: Vec<&Row> = self
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches(r, &params.filters)).collect())
            .unwrap_or_default();

        if let Some((column, ascending)) = &params.order {
            rows.sort_by(|a, b| {
                let ord = compare(a.fields.get(column), b.fields.get(column)).then(a.seq.cmp(&b.seq));
                if *ascending { ord } else { ord.reverse() }
            });
        }

        let projected: Vec<Value> = rows.iter().map(|r| project(r, params.select.as_deref())).collect();
        HttpOutcome::new(200, Value::Array(projected).to_string())
    }

    fn insert(&mut self, table: &str, request: &HttpRequest, representation: bool) -> HttpOutcome {
        let body: Value = match request.body.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(body)) => body,
            _ => return error(400, "invalid request body"),
        };
        let objects = match body {
            Value::Object(object) => vec![object],
            Value::Array(items) => {
                let mut objects = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(object) => objects.push(object),
                        _ => return error(400, "expected an object"),
                    }
                }
                objects
            }
            _ => return error(400, "expected an object"),
        };

        let existing = self.tables.get(table).map(Vec::as_slice).unwrap_or_default();
        let mut keys: HashSet<(String, String)> = existing.iter().filter_map(|r| unique_key(&r.fields)).collect();
        for object in &objects {
            if let Some(key) = unique_key(object) {
                if !keys.insert(key.clone()) {
                    return conflict(table, &key);
                }
            }
        }

        let mut inserted = Vec::with_capacity(objects.len());
        for object in objects {
            let row = self.new_row(object);
            inserted.push(Value::Object(row.fields.clone()));
            self.tables.entry(table.to_string()).or_default().push(row);
        }

        if representation {
            HttpOutcome::new(201, Value::Array(inserted).to_string())
        } else {
            HttpOutcome::new(201, String::new())
        }
    }

    fn update(&mut self, table: &str, params: &Params, request: &HttpRequest, representation: bool) -> HttpOutcome {
        let changes = match request.body.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(Value::Object(changes))) => changes,
            _ => return error(400, "invalid request body"),
        };
        let rows = self.tables.entry(table.to_string()).or_default();

        // Apply on a copy so a constraint violation leaves the table untouched
        let mut updated_rows = rows.clone();
        let now = timestamp();
        let mut updated = Vec::new();
        for row in updated_rows.iter_mut().filter(|r| matches(r, &params.filters)) {
            for (key, value) in &changes {
                if key != columns::ID {
                    row.fields.insert(key.clone(), value.clone());
                }
            }
            row.fields.insert(columns::UPDATED_AT.to_string(), json!(now));
            updated.push(Value::Object(row.fields.clone()));
        }

        let mut keys = HashSet::new();
        for key in updated_rows.iter().filter_map(|r| unique_key(&r.fields)) {
            if !keys.insert(key.clone()) {
                return conflict(table, &key);
            }
        }
        *rows = updated_rows;

        if representation {
            HttpOutcome::new(200, Value::Array(updated).to_string())
        } else {
            HttpOutcome::new(204, String::new())
        }
    }

    fn delete(&mut self, table: &str, params: &Params, representation: bool) -> HttpOutcome {
        if params.filters.is_empty() {
            return error(400, "DELETE requires a WHERE clause");
        }
        let targets_single_id = params.filters.iter().any(|(column, _)| column == columns::ID);
        if self.reject_filtered_delete && !targets_single_id {
            return error(405, "filtered delete not permitted");
        }

        let rows = self.tables.entry(table.to_string()).or_default();
        let locked = rows.iter().any(|r| {
            matches(r, &params.filters)
                && r.fields
                    .get(columns::ID)
                    .is_some_and(|id| self.failing_ids.contains(&id.to_string()))
        });
        if locked {
            return error(500, "row is locked");
        }

        let (removed, kept): (Vec<Row>, Vec<Row>) =
            rows.drain(..).partition(|r| matches(r, &params.filters));
        *rows = kept;

        if representation {
            let removed: Vec<Value> = removed
                .iter()
                .map(|r| project(r, params.select.as_deref()))
                .collect();
            HttpOutcome::new(200, Value::Array(removed).to_string())
        } else {
            HttpOutcome::new(204, String::new())
        }
    }
}

fn parse_params(url: &Url) -> Result<Params, HttpOutcome> {
    let mut params = Params::default();
    for (key, value) in url.query_pairs() {
        match &*key {
            "select" => {
                params.select = Some(value.split(',').map(|c| c.trim().to_string()).collect());
            }
            "order" => {
                let (column, direction) = value.split_once('.').unwrap_or((&*value, "asc"));
                params.order = Some((column.to_string(), direction != "desc"));
            }
            column => match value.strip_prefix("eq.") {
                Some(expected) => params.filters.push((column.to_string(), expected.to_string())),
                None => return Err(error(400, &format!("unsupported operator in {column}={value}"))),
            },
        }
    }
    Ok(params)
}

fn matches(row: &Row, filters: &[(String, String)]) -> bool {
    filters.iter().all(|(column, expected)| {
        match row.fields.get(column) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Number(n)) => n.to_string() == *expected,
            Some(Value::Bool(b)) => b.to_string() == *expected,
            _ => false,
        }
    })
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn project(row: &Row, select: Option<&[String]>) -> Value {
    match select {
        Some(columns) if !columns.iter().any(|c| c == "*") => {
            let fields = columns
                .iter()
                .filter_map(|c| row.fields.get(c).map(|v| (c.clone(), v.clone())))
                .collect();
            Value::Object(fields)
        }
        _ => Value::Object(row.fields.clone()),
    }
}

fn unique_key(fields: &Map<String, Value>) -> Option<(String, String)> {
    let owner = fields.get(columns::OWNER)?.as_str()?;
    let name = fields.get(columns::NAME)?.as_str()?;
    Some((owner.to_string(), name.to_string()))
}

fn conflict(table: &str, (owner, name): &(String, String)) -> HttpOutcome {
    let body = json!({
        "code": "23505",
        "details": format!("Key (user_id, preset_name)=({owner}, {name}) already exists."),
        "hint": null,
        "message": format!("duplicate key value violates unique constraint \"{table}_user_id_preset_name_key\""),
    });
    HttpOutcome::new(409, body.to_string())
}

fn error(status: u16, message: &str) -> HttpOutcome {
    HttpOutcome::new(status, json!({ "message": message }).to_string())
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
