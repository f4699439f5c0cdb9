use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::capture::chrome::DriverSettings;
use crate::capture::retry::RetryPolicy;
use crate::error::{ConfigError, Result};
use crate::session::StoreSettings;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ApiLensConfig {
    pub browser: BrowserSection,
    pub retry: RetrySection,
    pub session: SessionSection,
}

impl Default for ApiLensConfig {
    fn default() -> Self {
        Self {
            browser: BrowserSection::default(),
            retry: RetrySection::default(),
            session: SessionSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub navigation_timeout_seconds: u64,
    pub capture_window_seconds: u64,
    pub wait_after_load_ms: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            navigation_timeout_seconds: 30,
            capture_window_seconds: 20,
            wait_after_load_ms: 2_000,
        }
    }
}

impl BrowserSection {
    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            executable_path: self.executable_path.clone(),
            headless: self.headless,
            navigation_timeout: Duration::from_secs(self.navigation_timeout_seconds),
            wait_after_load: Duration::from_millis(self.wait_after_load_ms),
        }
    }

    pub fn capture_window(&self) -> Duration {
        Duration::from_secs(self.capture_window_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub ttl_ms: u64,
    pub max_sessions: usize,
    pub cleanup_interval_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_ms: crate::session::SESSION_TTL_MS,
            max_sessions: crate::session::MAX_SESSIONS,
            cleanup_interval_ms: crate::session::CLEANUP_INTERVAL_MS,
        }
    }
}

impl SessionSection {
    pub fn settings(&self) -> StoreSettings {
        StoreSettings {
            ttl: Duration::from_millis(self.ttl_ms),
            max_sessions: self.max_sessions,
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

pub fn load_apilens_config<P: AsRef<Path>>(path: P) -> Result<ApiLensConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
