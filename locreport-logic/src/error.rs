use std::time::Duration;

use thiserror::Error;

use crate::settings::PositionMode;

#[derive(Debug, Clone, Error, PartialEq)]
/// The platform couldn't produce a usable location, the user may retry
pub enum PositionError {
    /// No fix available (signal loss, platform error)
    #[error("location unavailable: {0}")]
    Unavailable(String),
    /// Location services are turned off on the device
    #[error("location services are disabled")]
    ServiceDisabled,
    /// The platform never answered within the bounded wait
    #[error("timed out after {}s waiting for a location fix", .0.as_secs())]
    Timeout(Duration),
    /// The platform handed back coordinates that aren't numbers
    #[error("invalid fix ({latitude}, {longitude})")]
    InvalidFix { latitude: f64, longitude: f64 },
    /// [crate::PositionSource::start_watch] was called while a watch is still running
    #[error("a location watch is already active")]
    WatchActive,
    /// Permission was never granted, so the platform is not asked at all
    #[error("location permission denied")]
    PermissionDenied,
    /// Watching was requested from a reporter configured for another mode
    #[error("location watching is not available in {0:?} mode")]
    WrongMode(PositionMode),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
/// Process-wide delivery configuration is missing or unusable
pub enum ConfigError {
    #[error("API_BASE_URL is not configured")]
    MissingBaseUrl,
    #[error("API_KEY is not configured")]
    MissingApiKey,
    #[error("API_BASE_URL is not a valid URL: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The request never got a response (unreachable, DNS, connection reset, timeout)
    #[error("could not reach the location server: {0}")]
    Network(String),
    /// The server answered, but not with a successful, parseable acknowledgment
    #[error("location server error: {message}")]
    Protocol {
        /// HTTP status, if a response was received at all
        status: Option<u16>,
        message: String,
    },
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl DeliveryError {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}
