//! Provider-level configuration
//!
//! Every option can be given in the host's provider block; keys that are
//! absent (or null, or empty strings) fall back to a `CF_*` environment
//! variable, then to the built-in default.

pub mod error;

pub use error::*;

use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

/// OAuth client the platform CLI uses for user grants.
pub const DEFAULT_OAUTH_CLIENT: &str = "cf";

const DEFAULT_QUOTA_NAME: &str = "default";
const DEFAULT_APP_LOGS_MAX: i64 = 30;
const DEFAULT_JOB_POLL_TIMEOUT_SECS: u64 = 30 * 60;

/// How many recent log lines to attach to app start failures and the
/// app-logs data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLogsMax {
    /// `0`: no tail at all.
    Disabled,
    /// Keep the last `n` lines.
    Last(usize),
    /// Negative values: everything the log cache still holds.
    All,
}

impl AppLogsMax {
    pub fn from_i64(value: i64) -> Self {
        match value {
            0 => AppLogsMax::Disabled,
            n if n < 0 => AppLogsMax::All,
            n => AppLogsMax::Last(n as usize),
        }
    }

    /// Apply the limit to an oldest-first list of lines.
    pub fn apply<T>(&self, mut lines: Vec<T>) -> Vec<T> {
        match self {
            AppLogsMax::Disabled => Vec::new(),
            AppLogsMax::All => lines,
            AppLogsMax::Last(n) => {
                if lines.len() > *n {
                    lines.drain(..lines.len() - n);
                }
                lines
            }
        }
    }
}

/// Credential source used to obtain the cloud controller token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { username: String, password: String },
    ClientCredentials { client_id: String, client_secret: String },
    SsoPasscode { passcode: String },
}

/// OAuth client id/secret pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub id: String,
    pub secret: String,
}

/// Resolved provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub sso_passcode: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub uaa_client_id: Option<String>,
    pub uaa_client_secret: Option<String>,
    pub skip_ssl_validation: bool,
    pub ca_cert: Option<String>,
    pub default_quota_name: String,
    pub app_logs_max: AppLogsMax,
    pub purge_when_deleted: bool,
    pub store_tokens_path: Option<PathBuf>,
    pub force_broker_not_fail_when_catalog_not_accessible: bool,
    pub job_poll_timeout: Duration,
}

impl ProviderConfig {
    /// Build the configuration from the host's provider block.
    pub fn from_value(value: &Value) -> Result<Self> {
        let empty = Map::new();
        let obj = match value {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(ConfigError::NotAnObject),
        };
        let src = Source { obj };

        let api_url = src
            .string("api_url", "CF_API_URL")
            .ok_or(ConfigError::MissingApiUrl)?
            .trim_end_matches('/')
            .to_string();
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(ConfigError::InvalidApiUrl(api_url));
        }

        let config = Self {
            api_url,
            user: src.string("user", "CF_USER"),
            password: src.string("password", "CF_PASSWORD"),
            sso_passcode: src.string("sso_passcode", "CF_SSO_PASSCODE"),
            client_id: src.string_any(&["client_id", "cf_client_id"], "CF_CLIENT_ID"),
            client_secret: src.string_any(&["client_secret", "cf_client_secret"], "CF_CLIENT_SECRET"),
            uaa_client_id: src.string("uaa_client_id", "CF_UAA_CLIENT_ID"),
            uaa_client_secret: src.string("uaa_client_secret", "CF_UAA_CLIENT_SECRET"),
            skip_ssl_validation: src
                .bool("skip_ssl_validation", "CF_SKIP_SSL_VALIDATION")?
                .unwrap_or(false),
            ca_cert: src.string("ca_cert", "CF_CA_CERT"),
            default_quota_name: src
                .string("default_quota_name", "CF_DEFAULT_QUOTA_NAME")
                .unwrap_or_else(|| DEFAULT_QUOTA_NAME.to_string()),
            app_logs_max: AppLogsMax::from_i64(
                src.int("app_logs_max", "CF_APP_LOGS_MAX")?
                    .unwrap_or(DEFAULT_APP_LOGS_MAX),
            ),
            purge_when_deleted: src
                .bool("purge_when_deleted", "CF_PURGE_WHEN_DELETE")?
                .unwrap_or(false),
            store_tokens_path: src
                .string("store_tokens_path", "CF_STORE_TOKENS_PATH")
                .map(|p| expand_home(&p)),
            force_broker_not_fail_when_catalog_not_accessible: src
                .bool(
                    "force_broker_not_fail_when_catalog_not_accessible",
                    "CF_FORCE_BROKER_NOT_FAIL_CATALOG",
                )?
                .unwrap_or(false),
            job_poll_timeout: Duration::from_secs(
                src.int("job_poll_timeout_secs", "CF_JOB_POLL_TIMEOUT")?
                    .map(|secs| secs.max(1) as u64)
                    .unwrap_or(DEFAULT_JOB_POLL_TIMEOUT_SECS),
            ),
        };

        config.credentials()?;
        Ok(config)
    }

    /// Pick the credential source.
    ///
    /// An SSO passcode wins over everything else, then a user/password pair,
    /// then client credentials.
    pub fn credentials(&self) -> Result<Credentials> {
        if let Some(passcode) = &self.sso_passcode {
            return Ok(Credentials::SsoPasscode {
                passcode: passcode.clone(),
            });
        }
        if let Some(user) = &self.user {
            let password = self.password.clone().ok_or(ConfigError::MissingPassword)?;
            return Ok(Credentials::Password {
                username: user.clone(),
                password,
            });
        }
        if let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) {
            return Ok(Credentials::ClientCredentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
            });
        }
        Err(ConfigError::MissingCredentials)
    }

    /// OAuth client presented to the identity service for the main token.
    pub fn oauth_client(&self) -> OAuthClient {
        match self.credentials() {
            Ok(Credentials::ClientCredentials {
                client_id,
                client_secret,
            }) => OAuthClient {
                id: client_id,
                secret: client_secret,
            },
            _ => OAuthClient {
                id: self
                    .client_id
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OAUTH_CLIENT.to_string()),
                secret: self.client_secret.clone().unwrap_or_default(),
            },
        }
    }

    /// Separate identity-service client for user administration, if configured.
    pub fn uaa_admin_client(&self) -> Option<OAuthClient> {
        self.uaa_client_id.as_ref().map(|id| OAuthClient {
            id: id.clone(),
            secret: self.uaa_client_secret.clone().unwrap_or_default(),
        })
    }
}

struct Source<'a> {
    obj: &'a Map<String, Value>,
}

impl Source<'_> {
    fn raw(&self, key: &str, env: &str) -> Option<Value> {
        self.raw_any(&[key], env)
    }

    /// First set key among `keys`, in order, then the env var.
    fn raw_any(&self, keys: &[&str], env: &str) -> Option<Value> {
        for key in keys {
            match self.obj.get(*key) {
                Some(Value::Null) | None => {}
                Some(Value::String(s)) if s.is_empty() => {}
                Some(v) => return Some(v.clone()),
            }
        }
        std::env::var(env)
            .ok()
            .filter(|v| !v.is_empty())
            .map(Value::String)
    }

    fn string(&self, key: &str, env: &str) -> Option<String> {
        self.string_any(&[key], env)
    }

    fn string_any(&self, keys: &[&str], env: &str) -> Option<String> {
        match self.raw_any(keys, env)? {
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    fn bool(&self, key: &str, env: &str) -> Result<Option<bool>> {
        match self.raw(key, env) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::String(s)) => parse_bool(&s).map(Some).ok_or(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got {:?}", s),
            }),
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got {}", other),
            }),
        }
    }

    fn int(&self, key: &str, env: &str) -> Result<Option<i64>> {
        match self.raw(key, env) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected an integer, got {}", n),
            }),
            Some(Value::String(s)) => {
                s.trim()
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    })
            }
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected an integer, got {}", other),
            }),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~/` against the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}
