//! Credential file loader
//!
//! Reads newline-delimited `key=value` pairs into a [`Configuration`].
//! Lines starting with `#` and lines without `=` are skipped.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{AuthStrategy, Configuration, DeleteStrategy};
use crate::constants::config;

/// Environment variables that replace file values when set
const ENV_OVERRIDES: [(&str, Field); 5] = [
    ("SUPABASE_URL", Field::BaseUrl),
    ("SUPABASE_ANON_KEY", Field::ApiKey),
    ("SUPABASE_USER_ID", Field::OwnerId),
    ("SUPABASE_EMAIL", Field::Email),
    ("SUPABASE_PASSWORD", Field::Password),
];

#[derive(Debug, Clone, Copy)]
enum Field {
    BaseUrl,
    ApiKey,
    OwnerId,
    Email,
    Password,
}

/// `<config_dir>/preset-sync/credentials.txt`, or `./credentials.txt`
pub fn default_path() -> PathBuf {
    match dirs::config_dir() {
        Some(mut path) => {
            path.push(config::APP_DIR);
            path.push(config::FILENAME);
            path
        }
        None => PathBuf::from(config::FILENAME),
    }
}

/// Load a credential file and apply environment overrides
pub fn load(path: &Path) -> Result<Configuration> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read credentials from {}", path.display()))?;

    let mut configuration = parse(&contents);
    apply_overrides(&mut configuration, |key| std::env::var(key).ok());

    info!(
        path = %path.display(),
        strategy = ?configuration.auth_strategy,
        base_url = %configuration.service_base_url,
        "Loaded credentials"
    );
    Ok(configuration)
}

/// Parse credential file contents. Never fails; validity is checked separately
/// with [`Configuration::validate`].
pub fn parse(contents: &str) -> Configuration {
    let mut configuration = Configuration::default();
    let mut explicit_mode = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "project_url" | "supabase_url" => set_base_url(&mut configuration, value),
            "api_key" | "supabase_anon_key" => configuration.static_api_key = value,
            "user_id" => configuration.owner_id = value,
            "email" => configuration.email = value,
            "password" => configuration.password = value,
            "auth_mode" => explicit_mode = parse_auth_mode(&value),
            "table" if !value.is_empty() => configuration.table = value,
            "delete_strategy" => match value.to_ascii_lowercase().as_str() {
                "by_id" => configuration.delete_strategy = DeleteStrategy::ById,
                "filtered" => configuration.delete_strategy = DeleteStrategy::Filtered,
                other => warn!(value = %other, "Unknown delete_strategy, keeping default"),
            },
            "timeout_secs" => match value.parse() {
                Ok(secs) => configuration.timeout_secs = secs,
                Err(_) => warn!(value = %value, "Invalid timeout_secs, keeping default"),
            },
            "auto_load" => configuration.auto_load = parse_bool(&value),
            _ => {}
        }
    }

    configuration.auth_strategy = explicit_mode.unwrap_or_else(|| infer_strategy(&configuration));
    configuration
}

/// Apply `SUPABASE_*` overrides from `lookup`
pub fn apply_overrides(configuration: &mut Configuration, lookup: impl Fn(&str) -> Option<String>) {
    let mut changed = false;
    for (var, field) in ENV_OVERRIDES {
        let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let value = value.trim().to_string();
        match field {
            Field::BaseUrl => set_base_url(configuration, value),
            Field::ApiKey => configuration.static_api_key = value,
            Field::OwnerId => configuration.owner_id = value,
            Field::Email => configuration.email = value,
            Field::Password => configuration.password = value,
        }
        changed = true;
    }

    // Overrides may complete a different strategy than the file did
    if changed && configuration.validate().is_err() {
        configuration.auth_strategy = infer_strategy(configuration);
    }
}

fn set_base_url(configuration: &mut Configuration, value: String) {
    configuration.service_base_url = value.trim_end_matches('/').to_string();
}

fn parse_auth_mode(value: &str) -> Option<AuthStrategy> {
    match value.to_ascii_uppercase().as_str() {
        "ANON_KEY" | "API_KEY" | "STATIC" | "STATIC_KEY" => Some(AuthStrategy::StaticKey),
        "EMAIL_PASSWORD" | "CREDENTIALS" => Some(AuthStrategy::Credentials),
        other => {
            warn!(auth_mode = %other, "Unknown auth_mode, inferring from fields");
            None
        }
    }
}

/// email+password wins over api_key+user_id
fn infer_strategy(configuration: &Configuration) -> AuthStrategy {
    if !configuration.email.is_empty() && !configuration.password.is_empty() {
        AuthStrategy::Credentials
    } else {
        AuthStrategy::StaticKey
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_parse_static_key_file() {
        let config = parse(
            "# comment\n\
             project_url = https://demo.supabase.co/\n\
             api_key=anon\n\
             user_id = owner-1\n",
        );
        assert_eq!(config.service_base_url, "https://demo.supabase.co");
        assert_eq!(config.static_api_key, "anon");
        assert_eq!(config.owner_id, "owner-1");
        assert_eq!(config.auth_strategy, AuthStrategy::StaticKey);
        assert!(config.is_valid());
    }

    #[test]
    fn test_parse_uppercase_keys_infer_credentials() {
        let config = parse(
            "SUPABASE_URL=https://demo.supabase.co\n\
             SUPABASE_ANON_KEY=anon\n\
             EMAIL=me@example.com\n\
             PASSWORD=a=b=c\n",
        );
        assert_eq!(config.auth_strategy, AuthStrategy::Credentials);
        // Only the first '=' splits
        assert_eq!(config.password, "a=b=c");
        assert!(config.needs_authentication());
    }

    #[test]
    fn test_explicit_auth_mode_wins() {
        let config = parse(
            "project_url=https://x\napi_key=k\nuser_id=u\nemail=e\npassword=p\nauth_mode=ANON_KEY\n",
        );
        assert_eq!(config.auth_strategy, AuthStrategy::StaticKey);
    }

    #[test]
    fn test_unknown_auth_mode_falls_back_to_inference() {
        let config = parse("email=e\npassword=p\nauth_mode=magic\n");
        assert_eq!(config.auth_strategy, AuthStrategy::Credentials);
    }

    #[test]
    fn test_supplemented_keys() {
        let config = parse(
            "table=scenes\ndelete_strategy=by_id\ntimeout_secs=3\nauto_load=yes\nlonely_line\n",
        );
        assert_eq!(config.table, "scenes");
        assert_eq!(config.delete_strategy, DeleteStrategy::ById);
        assert_eq!(config.timeout_secs, 3);
        assert!(config.auto_load);
    }

    #[test]
    fn test_env_overrides_replace_file_values() {
        let mut config = parse("project_url=https://file\napi_key=file-key\nuser_id=u\n");
        let env = HashMap::from([
            ("SUPABASE_URL", "https://env/"),
            ("SUPABASE_ANON_KEY", "env-key"),
        ]);
        apply_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.service_base_url, "https://env");
        assert_eq!(config.static_api_key, "env-key");
        assert_eq!(config.owner_id, "u");
    }

    #[test]
    fn test_env_overrides_can_complete_credentials() {
        let mut config = parse("project_url=https://x\napi_key=k\n");
        let env = HashMap::from([("SUPABASE_EMAIL", "e"), ("SUPABASE_PASSWORD", "p")]);
        apply_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.auth_strategy, AuthStrategy::Credentials);
        assert!(config.is_valid());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "project_url=https://demo\napi_key=k\nuser_id=u").unwrap();
        let config = load(file.path()).unwrap();
        assert_eq!(config.owner_id, "u");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = load(&dir.path().join("nope.txt"));
        assert!(result.is_err());
    }
}
