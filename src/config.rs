use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, WizardError};
use crate::steps::Options;

// Constants
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_TEMPLATE_ID: &str = "1vaW7egSNhsLoWVvG2VpqnUwdd_shiZ6fq0kpaj3vNbk";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds
pub const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4";
pub const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";

/// Where rows and files actually go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Google Sheets and Drive REST APIs
    Google,
    /// In-process workbooks, for local runs
    Memory,
}

/// Server configuration, read once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub backend: Backend,
    /// OAuth bearer token for the Google APIs
    pub access_token: Option<String>,
    /// Drive id of the master spreadsheet copied for every client
    pub template_id: String,
    pub options: Options,
    /// Upper bound for every outbound request
    pub timeout: Duration,
    pub session_ttl: Duration,
    pub sheets_url: String,
    pub drive_url: String,
    pub upload_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            backend: Backend::Memory,
            access_token: None,
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
            options: Options::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            session_ttl: Duration::from_secs(SESSION_DURATION),
            sheets_url: SHEETS_API_URL.to_string(),
            drive_url: DRIVE_API_URL.to_string(),
            upload_url: DRIVE_UPLOAD_URL.to_string(),
        }
    }
}

impl Config {
    /// Reads the `FLOURISH_*` and `GOOGLE_ACCESS_TOKEN` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    ///
    /// The backend defaults to Google when an access token is present and to
    /// memory otherwise.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        let bind = get("FLOURISH_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        config.bind_addr = bind
            .trim()
            .parse()
            .map_err(|_| WizardError::Config(format!("invalid FLOURISH_BIND_ADDR '{}'", bind)))?;

        config.access_token = get("GOOGLE_ACCESS_TOKEN");
        config.backend = match get("FLOURISH_BACKEND").as_deref().map(str::trim) {
            Some("google") => Backend::Google,
            Some("memory") => Backend::Memory,
            Some(other) => {
                return Err(WizardError::Config(format!(
                    "FLOURISH_BACKEND must be 'google' or 'memory', got '{}'",
                    other
                )));
            }
            None if config.access_token.is_some() => Backend::Google,
            None => Backend::Memory,
        };
        if config.backend == Backend::Google && config.access_token.is_none() {
            return Err(WizardError::Config(
                "GOOGLE_ACCESS_TOKEN is required for the google backend".to_string(),
            ));
        }

        if let Some(id) = get("FLOURISH_TEMPLATE_ID") {
            config.template_id = id.trim().to_string();
        }
        if let Some(list) = get("FLOURISH_ACCOUNT_MANAGERS") {
            config.options.account_managers = split_list(&list);
        }
        if let Some(list) = get("FLOURISH_GEOS") {
            config.options.geos = split_list(&list);
        }
        if let Some(flag) = get("FLOURISH_FIELD_RESTRICTIONS") {
            config.options.field_restrictions = parse_flag(&flag).ok_or_else(|| {
                WizardError::Config(format!("invalid FLOURISH_FIELD_RESTRICTIONS '{}'", flag))
            })?;
        }
        if let Some(secs) = get("FLOURISH_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| WizardError::Config(format!("invalid FLOURISH_TIMEOUT_SECS '{}'", secs)))?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(url) = get("FLOURISH_SHEETS_URL") {
            config.sheets_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = get("FLOURISH_DRIVE_URL") {
            config.drive_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = get("FLOURISH_UPLOAD_URL") {
            config.upload_url = url.trim_end_matches('/').to_string();
        }

        Ok(config)
    }
}

/// Comma separated list, sorted and without blanks or duplicates
fn split_list(raw: &str) -> Vec<String> {
    let mut items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    items.sort();
    items.dedup();
    items
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
