//! Application-wide constants
//!
//! Wire paths, header names, column names and limits used by the session
//! manager, the REST executor and the preset store.

/// Remote service endpoints (relative to the configured base URL)
pub mod endpoints {
    /// Prefix for every table endpoint
    pub const REST_PREFIX: &str = "/rest/v1";

    /// Password-grant token endpoint
    pub const AUTH_TOKEN: &str = "/auth/v1/token";

    /// Grant type query value for email/password login
    pub const PASSWORD_GRANT: &str = "password";
}

/// HTTP header names and fixed values
pub mod headers {
    pub const API_KEY: &str = "apikey";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const PREFER: &str = "Prefer";

    /// Forces PATCH semantics on a POST-shaped request
    pub const METHOD_OVERRIDE: &str = "X-HTTP-Method-Override";

    pub const JSON: &str = "application/json";
    pub const RETURN_REPRESENTATION: &str = "return=representation";
    pub const RETURN_MINIMAL: &str = "return=minimal";
}

/// Column names of the presets table
pub mod columns {
    pub const ID: &str = "id";
    pub const OWNER: &str = "user_id";
    pub const NAME: &str = "preset_name";
    pub const PAYLOAD: &str = "preset_data";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

/// Preset store behaviour
pub mod store {
    /// Default table name when the credential file does not name one
    pub const DEFAULT_TABLE: &str = "presets";

    /// Total insert attempts for a generated unique name (base, base_1 .. base_99)
    pub const MAX_UNIQUE_NAME_ATTEMPTS: usize = 100;

    /// strftime pattern for names generated when no base name is given
    pub const TIMESTAMP_NAME_FORMAT: &str = "scene_%Y%m%d_%H%M%S";

    /// Body marker used by the backend for unique-constraint violations
    pub const DUPLICATE_MARKER: &str = "duplicate";

    /// Postgres error code for unique_violation
    pub const UNIQUE_VIOLATION_CODE: &str = "23505";
}

/// Network defaults
pub mod http {
    /// Global per-request timeout in seconds
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

    /// Status code the executor reports when no HTTP response was received
    pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

    /// Status code signalling a uniqueness conflict
    pub const CONFLICT: u16 = 409;
}

/// Credential file locations
pub mod config {
    /// Directory under the user config dir
    pub const APP_DIR: &str = "preset-sync";

    /// Credential file name
    pub const FILENAME: &str = "credentials.txt";
}
