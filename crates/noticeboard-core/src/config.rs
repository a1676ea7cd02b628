//! Board configuration
//!
//! Where the board keeps its data, which hosted document it syncs with, and
//! the timings of the sync machinery. Layers, lowest first: built-in
//! defaults, the TOML config file, `NOTICEBOARD_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "NOTICEBOARD";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the local document store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the hosted JSON service, e.g. `https://api.jsonbin.io/v3/b/`
    #[serde(default)]
    pub remote_base_url: Option<String>,

    /// Identifier of the document appended to the base URL
    #[serde(default)]
    pub document_id: Option<String>,

    /// Value sent in the `Authorization` header on writes
    #[serde(default)]
    pub api_token: Option<String>,

    /// Whether cloud sync is enabled
    #[serde(default)]
    pub sync_enabled: bool,

    /// Shared passphrase that unlocks the admin session
    #[serde(default)]
    pub admin_passphrase: Option<String>,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Delay before the status line switches to developer info after a sync
    #[serde(default = "default_status_developer_info_secs")]
    pub status_developer_info_secs: u64,

    /// Further delay before the status line switches to the last-updated view
    #[serde(default = "default_status_last_updated_secs")]
    pub status_last_updated_secs: u64,

    /// First retry delay for queued writes
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,

    /// Upper bound for the retry delay
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,

    /// Attempts before a queued write is moved to the failed log
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// How long a deferred response submission waits before polling the form lock again
    #[serde(default = "default_form_lock_poll_millis")]
    pub form_lock_poll_millis: u64,

    /// Compare-and-swap rounds for a response append before giving up
    #[serde(default = "default_cas_max_attempts")]
    pub cas_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            remote_base_url: None,
            document_id: None,
            api_token: None,
            sync_enabled: false,
            admin_passphrase: None,
            request_timeout_secs: default_request_timeout_secs(),
            status_developer_info_secs: default_status_developer_info_secs(),
            status_last_updated_secs: default_status_last_updated_secs(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            form_lock_poll_millis: default_form_lock_poll_millis(),
            cas_max_attempts: default_cas_max_attempts(),
        }
    }
}

impl Config {
    /// Defaults, overlaid by the config file, overlaid by `NOTICEBOARD_*`
    /// variables. The file is `~/.config/noticeboard/config.toml` unless
    /// `NOTICEBOARD_CONFIG` points elsewhere.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Like [`Config::load`] with an explicit file; a missing file means defaults
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("Config file {:?} is not valid TOML", path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read config file {:?}", path))
            }
        };

        config.apply_env_overrides();
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Cannot create data directory {:?}", config.data_dir))?;
        Ok(config)
    }

    /// Parse TOML text and apply env overrides, without touching the disk
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(toml_content).context("Invalid config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Configuration rooted at a given data directory, everything else default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Overlay `NOTICEBOARD_*` variables; an empty value clears an optional field
    fn apply_env_overrides(&mut self) {
        let var = |name: &str| std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok();

        if let Some(val) = var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        let optional_fields: [(&str, &mut Option<String>); 4] = [
            ("REMOTE_URL", &mut self.remote_base_url),
            ("DOCUMENT_ID", &mut self.document_id),
            ("API_TOKEN", &mut self.api_token),
            ("ADMIN_PASSPHRASE", &mut self.admin_passphrase),
        ];
        for (name, field) in optional_fields {
            if let Some(val) = var(name) {
                *field = Some(val).filter(|v| !v.is_empty());
            }
        }

        if let Some(val) = var("SYNC_ENABLED") {
            self.sync_enabled = matches!(val.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }
    }

    /// Write the config file, replacing it atomically
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create config directory {:?}", dir))?;

        let text = toml::to_string_pretty(self).context("Cannot encode config as TOML")?;
        let staged = path.with_extension("toml.tmp");
        std::fs::write(&staged, text)
            .with_context(|| format!("Cannot write config file {:?}", staged))?;
        std::fs::rename(&staged, &path)
            .with_context(|| format!("Cannot replace config file {:?}", path))?;
        Ok(())
    }

    /// `NOTICEBOARD_CONFIG`, else `<config dir>/noticeboard/config.toml`
    pub fn config_file_path() -> PathBuf {
        match std::env::var_os(format!("{}_CONFIG", ENV_PREFIX)) {
            Some(path) => PathBuf::from(path),
            None => dirs::config_dir()
                .unwrap_or_default()
                .join("noticeboard/config.toml"),
        }
    }

    /// Full URL of the remote document, if the remote is configured
    pub fn document_url(&self) -> Option<String> {
        match (&self.remote_base_url, &self.document_id) {
            (Some(base), Some(id)) => Some(format!("{}{}", base, id)),
            _ => None,
        }
    }

    /// Whether enough is configured to talk to the remote
    pub fn remote_configured(&self) -> bool {
        self.sync_enabled && self.document_url().is_some()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn status_developer_info_delay(&self) -> Duration {
        Duration::from_secs(self.status_developer_info_secs)
    }

    pub fn status_last_updated_delay(&self) -> Duration {
        Duration::from_secs(self.status_last_updated_secs)
    }

    pub fn form_lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.form_lock_poll_millis)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_default().join("noticeboard")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_status_developer_info_secs() -> u64 {
    3
}

fn default_status_last_updated_secs() -> u64 {
    5
}

fn default_retry_base_delay_secs() -> u64 {
    30
}

fn default_retry_max_delay_secs() -> u64 {
    300
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_form_lock_poll_millis() -> u64 {
    500
}

fn default_cas_max_attempts() -> u32 {
    3
}
