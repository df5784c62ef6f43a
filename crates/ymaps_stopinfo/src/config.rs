//! Stop-info client configuration

use serde::{Deserialize, Serialize};

/// Configuration for the stop-info client.
///
/// Fixed at client construction; every client holds its own copy and
/// never mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopInfoConfig {
    /// URL of the maps landing page used to bootstrap a session
    #[serde(default = "default_init_url")]
    pub init_url: String,

    /// Path of the stop-info resource on the resolved API host
    #[serde(default = "default_resource_path")]
    pub resource_path: String,

    /// User-Agent sent on every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Response language
    #[serde(default = "default_lang")]
    pub lang: String,

    /// Locale for the prognosis payload
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Masstransit request mode
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_init_url() -> String {
    "https://maps.yandex.ru".to_string()
}

fn default_resource_path() -> String {
    "maps/api/masstransit/getStopInfo".to_string()
}

fn default_user_agent() -> String {
    // The upstream only answers sessions that look like a browser.
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string()
}

fn default_lang() -> String {
    "ru".to_string()
}

fn default_locale() -> String {
    "ru_RU".to_string()
}

fn default_mode() -> String {
    "prognosis".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

impl Default for StopInfoConfig {
    fn default() -> Self {
        Self {
            init_url: default_init_url(),
            resource_path: default_resource_path(),
            user_agent: default_user_agent(),
            lang: default_lang(),
            locale: default_locale(),
            mode: default_mode(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl StopInfoConfig {
    /// Create a configuration suitable for testing
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            timeout_secs: 5,
            ..Self::default()
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.init_url.starts_with("http://") && !self.init_url.starts_with("https://") {
            return Err("init_url must be an http(s) URL".to_string());
        }

        if self.resource_path.is_empty() || self.resource_path.starts_with('/') {
            return Err("resource_path must be a non-empty relative path".to_string());
        }

        if self.user_agent.is_empty() {
            return Err("user_agent must not be empty".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}
