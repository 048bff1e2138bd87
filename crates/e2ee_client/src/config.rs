//! Client configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use e2ee_crypto::kdf::{DEFAULT_PBKDF2_ITERATIONS, MAX_PBKDF2_ITERATIONS};

use crate::error::E2eeError;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "webchat";
pub const APP_NAME: &str = "e2ee";

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_DEVICE_ID: &str = "web-1";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Key directory base URL, without trailing slash.
    pub api_url: String,
    /// Bearer token for the key directory.
    pub access_token: Option<String>,
    /// Authenticated user id; required for session-key derivation.
    pub user_id: Option<String>,
    pub device_id: String,
    /// PBKDF2 iterations for newly written records. Existing records keep theirs.
    pub kdf_iterations: u32,
    pub db_path: PathBuf,
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            access_token: None,
            user_id: None,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            kdf_iterations: DEFAULT_PBKDF2_ITERATIONS,
            db_path: default_db_path(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Build from `E2EE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, E2eeError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, E2eeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let kdf_iterations = match non_empty("E2EE_KDF_ITERATIONS") {
            Some(raw) => match parse_positive(&raw, "E2EE_KDF_ITERATIONS")? {
                n if n > MAX_PBKDF2_ITERATIONS => {
                    return Err(E2eeError::InvalidArgument(format!(
                        "E2EE_KDF_ITERATIONS must be at most {MAX_PBKDF2_ITERATIONS}"
                    )))
                }
                n => n,
            },
            None => defaults.kdf_iterations,
        };
        let http_timeout = match non_empty("E2EE_HTTP_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(u64::from(parse_positive(&raw, "E2EE_HTTP_TIMEOUT_SECS")?)),
            None => defaults.http_timeout,
        };

        Ok(Self {
            api_url: non_empty("E2EE_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            access_token: non_empty("E2EE_ACCESS_TOKEN"),
            user_id: non_empty("E2EE_USER_ID").map(|u| u.trim().to_string()),
            device_id: non_empty("E2EE_DEVICE_ID")
                .map(|d| d.trim().to_string())
                .unwrap_or(defaults.device_id),
            kdf_iterations,
            db_path: non_empty("E2EE_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            http_timeout,
        })
    }

    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// `<platform data dir>/e2ee.db`, or `./e2ee.db` when no home directory exists.
pub fn default_db_path() -> PathBuf {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.data_dir().join("e2ee.db"))
        .unwrap_or_else(|| PathBuf::from("e2ee.db"))
}

fn parse_positive(raw: &str, name: &str) -> Result<u32, E2eeError> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(E2eeError::InvalidArgument(format!("{name} must be a positive integer, got '{raw}'"))),
    }
}
