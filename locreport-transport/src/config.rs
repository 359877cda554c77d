use std::time::Duration;

use locreport_logic::ConfigError;

pub const BASE_URL_VAR: &str = "API_BASE_URL";
pub const API_KEY_VAR: &str = "API_KEY";

/// Values baked in at build time, used when the variable isn't set at runtime
const BUILD_BASE_URL: Option<&str> = option_env!("API_BASE_URL");
const BUILD_API_KEY: Option<&str> = option_env!("API_KEY");

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where and how locations are delivered. Resolve once at startup and hand to
/// [crate::HttpDeliveryClient::new]; missing values only become errors when a delivery is
/// attempted.
pub struct DeliveryConfig {
    base_url: Option<String>,
    api_key: Option<String>,
    pub request_timeout: Duration,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl DeliveryConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: non_empty(Some(base_url.into())),
            api_key: non_empty(Some(api_key.into())),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Read [BASE_URL_VAR] and [API_KEY_VAR] from the environment
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = non_empty(lookup(BASE_URL_VAR))
            .or_else(|| non_empty(BUILD_BASE_URL.map(String::from)));
        let api_key =
            non_empty(lookup(API_KEY_VAR)).or_else(|| non_empty(BUILD_API_KEY.map(String::from)));

        Self {
            base_url,
            api_key,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// `{API_BASE_URL}/location`
    pub fn location_url(&self) -> Result<String, ConfigError> {
        let base = self.base_url.as_deref().ok_or(ConfigError::MissingBaseUrl)?;
        Ok(format!("{}/location", base.trim_end_matches('/')))
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    pub fn is_complete(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }
}
