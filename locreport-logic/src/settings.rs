use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::platform::{PositionOptions, WatchOptions};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// How positions are acquired, fixed for the lifetime of a [crate::Reporter]
pub enum PositionMode {
    /// One fix per user trigger
    SingleFetch,
    /// Subscribe to platform updates and deliver each one that passes the [WatchSettings] filter
    Continuous,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Filter and platform hints for continuous mode
pub struct WatchSettings {
    /// Minimum displacement from the last emitted fix
    pub min_distance_meters: f64,
    /// Minimum time since the last emitted fix, measured on platform timestamps
    pub min_interval_ms: u64,
    /// Fastest rate the platform is asked to report at
    pub fastest_interval_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            min_distance_meters: 10.0,
            min_interval_ms: 5000,
            fastest_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReporterConfig {
    pub mode: PositionMode,
    /// Start watching as soon as permission is granted. Only meaningful in
    /// [PositionMode::Continuous], single fetches always wait for a trigger.
    pub auto_start_on_grant: bool,
    /// Bounded wait for a single fix
    pub fetch_timeout_ms: u64,
    pub position: PositionOptions,
    pub watch: WatchSettings,
}

impl ReporterConfig {
    /// Continuous tracking that starts right after permission is granted
    pub fn continuous() -> Self {
        Self {
            mode: PositionMode::Continuous,
            auto_start_on_grant: true,
            ..Default::default()
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            position: self.position,
            distance_filter_meters: self.watch.min_distance_meters,
            interval_ms: self.watch.min_interval_ms,
            fastest_interval_ms: self.watch.fastest_interval_ms,
        }
    }

    pub fn should_auto_start(&self) -> bool {
        self.mode == PositionMode::Continuous && self.auto_start_on_grant
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            mode: PositionMode::SingleFetch,
            auto_start_on_grant: false,
            fetch_timeout_ms: 15000,
            position: PositionOptions::default(),
            watch: WatchSettings::default(),
        }
    }
}
