use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classifier::{default_categories, CategoryRule};
use crate::knowledge::MatchPolicy;

pub const CONFIG_ENV: &str = "TRIAGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "configs/triage.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config does not match schema: {0}")]
    Schema(String),
    #[error("invalid {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Pipeline settings: which knowledge set to consult and how to tag input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct TriageSettings {
    /// Service whose knowledge entries answer incoming errors.
    pub default_service: String,
    /// Tie-break used when several key phrases match.
    pub match_policy: MatchPolicy,
    /// Ordered category table; the first category with a matching keyword wins.
    pub categories: Vec<CategoryRule>,
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            default_service: "AEPS".into(),
            match_policy: MatchPolicy::default(),
            categories: default_categories(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSettings {
    pub bind: String,
    pub port: u16,
    /// Origins allowed to call the API from a browser; empty disables CORS headers.
    pub cors_origins: Vec<String>,
    pub concurrency_limit: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8095,
            cors_origins: Vec::new(),
            concurrency_limit: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// Directory holding `triage.sqlite`.
    pub state_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            state_dir: "state".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    pub cookie_name: String,
    /// Loop-guard fingerprints idle longer than this are forgotten.
    pub idle_ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "triage_session".into(),
            idle_ttl_secs: 3600,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct IdentitySettings {
    /// Header carrying the authenticated numeric user id, set by the fronting app.
    pub user_header: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            user_header: "x-triage-user".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct LimitSettings {
    pub max_input_chars: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_input_chars: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct AdminSettings {
    /// Token required in `x-triage-admin` for admin routes; unset leaves them open on loopback.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub triage: TriageSettings,
    pub http: HttpSettings,
    pub storage: StorageSettings,
    pub session: SessionSettings,
    pub identity: IdentitySettings,
    pub limits: LimitSettings,
    pub admin: AdminSettings,
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema_value = config_schema_json();
    validator_for(&schema_value).expect("valid schema")
});

/// JSON schema describing the configuration file.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(&schema).expect("schema json")
}

impl Config {
    /// Parse and schema-check a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: toml::Value = toml::from_str(content)?;
        let json_value = serde_json::to_value(&raw)?;
        let validation_errors: Vec<_> = CONFIG_SCHEMA
            .iter_errors(&json_value)
            .map(|e| e.to_string())
            .collect();
        if !validation_errors.is_empty() {
            return Err(ConfigError::Schema(validation_errors.join(", ")));
        }
        Ok(toml::from_str(content)?)
    }

    /// Apply `TRIAGE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(bind) = non_empty("TRIAGE_BIND") {
            self.http.bind = bind;
        }
        if let Some(raw) = non_empty("TRIAGE_PORT") {
            self.http.port = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "TRIAGE_PORT",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = non_empty("TRIAGE_HTTP_MAX_CONC") {
            self.http.concurrency_limit =
                raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: "TRIAGE_HTTP_MAX_CONC",
                    value: raw.clone(),
                })?;
        }
        if let Some(dir) = non_empty("TRIAGE_STATE_DIR") {
            self.storage.state_dir = dir;
        }
        if let Some(service) = non_empty("TRIAGE_DEFAULT_SERVICE") {
            self.triage.default_service = service.trim().to_string();
        }
        if let Some(token) = non_empty("TRIAGE_ADMIN_TOKEN") {
            self.admin.token = Some(token);
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Config::from_toml_str(&content)
}

/// Config file named by `TRIAGE_CONFIG`, else `configs/triage.toml` when present.
pub fn discover_config_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        if !explicit.trim().is_empty() {
            return Some(PathBuf::from(explicit));
        }
    }
    let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
    fallback.exists().then_some(fallback)
}

/// Discovered file (or defaults) with environment overrides applied.
pub fn load_effective_config() -> Result<(Config, Option<PathBuf>), ConfigError> {
    let path = discover_config_path();
    let mut cfg = match &path {
        Some(p) => load_config(p)?,
        None => Config::default(),
    };
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    Ok((cfg, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.triage.default_service, "AEPS");
        assert_eq!(cfg.triage.categories.len(), 6);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [triage]
            default_service = "PAN"
            match_policy = "longest_phrase"

            [[triage.categories]]
            name = "GST"
            keywords = ["gstin", "gst return"]

            [http]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.triage.default_service, "PAN");
        assert_eq!(cfg.triage.match_policy, MatchPolicy::LongestPhrase);
        assert_eq!(cfg.triage.categories.len(), 1);
        assert_eq!(cfg.http.port, 9000);
        assert_eq!(cfg.http.bind, "127.0.0.1");
    }

    #[test]
    fn schema_rejects_wrong_types_and_unknown_keys() {
        let err = Config::from_toml_str("[http]\nport = \"eighty\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)), "{err}");
        let err = Config::from_toml_str("[sesion]\ncookie_name = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)), "{err}");
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let vars: HashMap<&str, &str> = [
            ("TRIAGE_PORT", "8181"),
            ("TRIAGE_DEFAULT_SERVICE", " IRCTC "),
            ("TRIAGE_STATE_DIR", "/tmp/triage"),
            ("TRIAGE_BIND", ""),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.http.port, 8181);
        assert_eq!(cfg.http.bind, "127.0.0.1");
        assert_eq!(cfg.triage.default_service, "IRCTC");
        assert_eq!(cfg.storage.state_dir, "/tmp/triage");

        let err = Config::default()
            .apply_overrides(|k| (k == "TRIAGE_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "TRIAGE_PORT", .. }));
    }

    #[test]
    fn load_config_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.toml");
        std::fs::write(&path, "[storage]\nstate_dir = \"data\"\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.storage.state_dir, "data");
        assert!(matches!(
            load_config(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let cfg = Config::from_toml_str(include_str!("../../../configs/triage.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }
}
