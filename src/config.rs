//! Configuration loading with env-var overrides.
//!
//! Two inputs, resolved once at startup into an immutable [`Config`]:
//!
//! - **Credentials** — `VITE_SUPABASE_URL` and `VITE_SUPABASE_ANON_KEY`, read
//!   from the process environment only (a `.env` file is loaded into the
//!   environment by `main` first). Both are required; an absent or empty value
//!   fails the run before anything touches the network.
//! - **Settings** — `config/default.toml` relative to the current working
//!   directory (or `SITE_BOOTSTRAP_CONFIG`). A missing file means built-in
//!   defaults. `SITE_BOOTSTRAP_LOG_LEVEL` and `SITE_BOOTSTRAP_SNAPSHOT`
//!   override the matching keys.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{error::AppError, logger};

pub const URL_VAR: &str = "VITE_SUPABASE_URL";
pub const ANON_KEY_VAR: &str = "VITE_SUPABASE_ANON_KEY";

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Remote endpoint and access credential.
#[derive(Clone)]
pub struct Credentials {
    /// Project base URL, without a trailing slash.
    pub url: String,
    pub anon_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("anon_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Resolve both credentials through `lookup`. The URL is checked first so
    /// the error names the first missing variable.
    pub fn resolve<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = required(&lookup, URL_VAR)?;
        let anon_key = required(&lookup, ANON_KEY_VAR)?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    pub fn from_env() -> Result<Self, AppError> {
        Self::resolve(|name| env::var(name).ok())
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(AppError::ConfigurationMissing(name)),
    }
}

/// Bounded retry applied to resource creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total insert attempts, including the first. Always at least 1.
    pub attempts: u32,
    /// Fixed pause between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay: Duration::from_millis(default_delay_ms()),
        }
    }
}

/// Where the VAPID keypair lives. `id` is written into the row's `id`
/// column, which must be the table's primary key (or carry a unique
/// constraint) so a second insert fails instead of adding a row.
#[derive(Debug, Clone)]
pub struct VapidConfig {
    pub table: String,
    pub id: String,
}

/// Where the singleton settings row lives, and what a fresh row holds.
#[derive(Debug, Clone)]
pub struct SettingsConfig {
    pub table: String,
    pub id: String,
    /// `whatsapp_link` written into a newly created row. Never applied to an
    /// existing row.
    pub whatsapp_link: String,
}

/// Fully-resolved tool settings. Credentials are kept separate because they
/// are required and never come from TOML.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Local configuration snapshot path (already expanded, no `~`).
    pub snapshot_path: PathBuf,
    pub retry: RetryPolicy,
    /// Per-request HTTP timeout; `None` keeps the transport default.
    pub remote_timeout: Option<Duration>,
    pub vapid: VapidConfig,
    pub settings: SettingsConfig,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    bootstrap: RawBootstrap,
    #[serde(default)]
    retry: RawRetry,
    #[serde(default)]
    remote: RawRemote,
    #[serde(default)]
    vapid: RawVapid,
    #[serde(default)]
    settings: RawSettings,
}

#[derive(Deserialize)]
struct RawBootstrap {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_snapshot_path")]
    snapshot_path: String,
}

impl Default for RawBootstrap {
    fn default() -> Self {
        Self { log_level: default_log_level(), snapshot_path: default_snapshot_path() }
    }
}

#[derive(Deserialize)]
struct RawRetry {
    #[serde(default = "default_attempts")]
    attempts: u32,
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
}

impl Default for RawRetry {
    fn default() -> Self {
        Self { attempts: default_attempts(), delay_ms: default_delay_ms() }
    }
}

#[derive(Deserialize, Default)]
struct RawRemote {
    timeout_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct RawVapid {
    #[serde(default = "default_vapid_table")]
    table: String,
    #[serde(default = "default_singleton_id")]
    id: String,
}

impl Default for RawVapid {
    fn default() -> Self {
        Self { table: default_vapid_table(), id: default_singleton_id() }
    }
}

#[derive(Deserialize)]
struct RawSettings {
    #[serde(default = "default_settings_table")]
    table: String,
    #[serde(default = "default_singleton_id")]
    id: String,
    #[serde(default)]
    whatsapp_link: String,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            table: default_settings_table(),
            id: default_singleton_id(),
            whatsapp_link: String::new(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_snapshot_path() -> String { ".env".to_string() }
fn default_attempts() -> u32 { 3 }
fn default_delay_ms() -> u64 { 1000 }
fn default_vapid_table() -> String { "vapid_keys".to_string() }
fn default_settings_table() -> String { "settings".to_string() }
fn default_singleton_id() -> String { "1".to_string() }

/// Load config from `config/default.toml` (or `SITE_BOOTSTRAP_CONFIG`), then
/// apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let path = env::var("SITE_BOOTSTRAP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let log_level_override = env::var("SITE_BOOTSTRAP_LOG_LEVEL").ok();
    let snapshot_override = env::var("SITE_BOOTSTRAP_SNAPSHOT").ok();
    load_from(
        &expand_home(&path),
        log_level_override.as_deref(),
        snapshot_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    log_level_override: Option<&str>,
    snapshot_override: Option<&str>,
) -> Result<Config, AppError> {
    let parsed: RawConfig = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?
    } else {
        RawConfig::default()
    };

    let b = parsed.bootstrap;
    let log_level = log_level_override.unwrap_or(&b.log_level).to_string();
    logger::parse_level(&log_level).map_err(|e| AppError::Config(e.to_string()))?;

    let snapshot_path = expand_home(snapshot_override.unwrap_or(&b.snapshot_path));

    if parsed.retry.attempts == 0 {
        return Err(AppError::Config("retry.attempts must be at least 1".into()));
    }
    if parsed.vapid.id.trim().is_empty() {
        return Err(AppError::Config("vapid.id must not be empty".into()));
    }
    if parsed.settings.id.trim().is_empty() {
        return Err(AppError::Config("settings.id must not be empty".into()));
    }

    Ok(Config {
        log_level,
        snapshot_path,
        retry: RetryPolicy {
            attempts: parsed.retry.attempts,
            delay: Duration::from_millis(parsed.retry.delay_ms),
        },
        remote_timeout: parsed.remote.timeout_seconds.map(Duration::from_secs),
        vapid: VapidConfig { table: parsed.vapid.table, id: parsed.vapid.id },
        settings: SettingsConfig {
            table: parsed.settings.table,
            id: parsed.settings.id,
            whatsapp_link: parsed.settings.whatsapp_link,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
impl Config {
    /// Defaults with the snapshot under `dir` and no retry delay.
    pub fn test_default(dir: &Path) -> Self {
        Self {
            log_level: "info".into(),
            snapshot_path: dir.join(".env"),
            retry: RetryPolicy { attempts: 3, delay: Duration::ZERO },
            remote_timeout: None,
            vapid: VapidConfig { table: default_vapid_table(), id: default_singleton_id() },
            settings: SettingsConfig {
                table: default_settings_table(),
                id: default_singleton_id(),
                whatsapp_link: String::new(),
            },
        }
    }
}
