use crate::services::session::Credentials;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Desktop browser user agent; the upstream image CDN rejects non-browser agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub common: core_config::Config,
    pub credentials: Credentials,
    pub session: SessionConfig,
    pub retry: RetryConfig,
    pub fetch: FetchConfig,
    pub storage: StorageConfig,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub backend: BackendKind,
    /// Base URL of the sidecar hosting the browser-automation client.
    pub bridge_url: String,
    pub init_timeout: Duration,
    /// Upper bound for a single submission; elapsing costs one attempt.
    pub submit_timeout: Duration,
    pub auto_refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Bridge,
    Mock,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bridge" => Ok(BackendKind::Bridge),
            "mock" => Ok(BackendKind::Mock),
            _ => Err(format!("Invalid backend: {}", s)),
        }
    }
}

/// Settings for following artifact URLs.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_redirects: 50,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Where uploaded files are staged for the duration of one request.
    pub staging_dir: PathBuf,
    /// Where `/generate-image` persists its output.
    pub images_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl GatewayConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source; `load` uses the process env.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = EnvSource {
            lookup: &lookup,
            is_prod: lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()) == "prod",
        };

        let credentials = Credentials::new(
            vars.get("GEMINI_PSID", None)?,
            vars.get("GEMINI_PSIDTS", None)?,
        );
        credentials
            .validate()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let max_attempts: u32 = vars.parse("GATEWAY_MAX_ATTEMPTS", "3")?;
        let backoff_ms: u64 = vars.parse("GATEWAY_RETRY_BACKOFF_MS", "0")?;
        let max_backoff_ms: u64 = vars.parse("GATEWAY_RETRY_MAX_BACKOFF_MS", "10000")?;
        let retry = RetryConfig {
            initial_backoff: Duration::from_millis(backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            add_jitter: backoff_ms > 0,
            ..RetryConfig::immediate(max_attempts)
        };

        let default_staging = env::temp_dir()
            .join("gemini-gateway")
            .to_string_lossy()
            .into_owned();

        Ok(GatewayConfig {
            common,
            credentials,
            session: SessionConfig {
                backend: vars.parse("GATEWAY_BACKEND", "bridge")?,
                bridge_url: vars.get("GATEWAY_BRIDGE_URL", Some("http://127.0.0.1:8765"))?,
                init_timeout: Duration::from_secs(vars.parse("GATEWAY_INIT_TIMEOUT_SECS", "30")?),
                submit_timeout: Duration::from_secs(
                    vars.parse("GATEWAY_SUBMIT_TIMEOUT_SECS", "300")?,
                ),
                auto_refresh: vars.parse("GATEWAY_AUTO_REFRESH", "true")?,
            },
            retry,
            fetch: FetchConfig {
                timeout: Duration::from_secs(vars.parse("GATEWAY_FETCH_TIMEOUT_SECS", "120")?),
                max_redirects: vars.parse("GATEWAY_FETCH_MAX_REDIRECTS", "50")?,
                user_agent: vars.get("GATEWAY_FETCH_USER_AGENT", Some(DEFAULT_USER_AGENT))?,
            },
            storage: StorageConfig {
                staging_dir: PathBuf::from(
                    vars.get("GATEWAY_STAGING_DIR", Some(default_staging.as_str()))?,
                ),
                images_dir: PathBuf::from(
                    vars.get("GATEWAY_IMAGES_DIR", Some("generated_images"))?,
                ),
                max_upload_bytes: vars.parse(
                    "GATEWAY_MAX_UPLOAD_BYTES",
                    &DEFAULT_MAX_UPLOAD_BYTES.to_string(),
                )?,
            },
            otlp_endpoint: lookup("OTLP_ENDPOINT").filter(|s| !s.trim().is_empty()),
        })
    }
}

struct EnvSource<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
    is_prod: bool,
}

impl EnvSource<'_> {
    fn get(&self, key: &str, default: Option<&str>) -> Result<String, AppError> {
        match (self.lookup)(key) {
            Some(val) => Ok(val),
            None => {
                if self.is_prod {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required in production but not set",
                        key
                    )))
                } else if let Some(def) = default {
                    Ok(def.to_string())
                } else {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required but not set",
                        key
                    )))
                }
            }
        }
    }

    fn parse<T>(&self, key: &str, default: &str) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.get(key, Some(default))?;
        raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e))
        })
    }
}
