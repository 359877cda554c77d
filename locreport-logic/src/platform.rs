use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{error::PositionError, record::Position};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// Outcome of asking the platform for foreground location authorization
pub enum PermissionStatus {
    Granted,
    Denied,
    /// Blocked by something the user can't change from the prompt (parental controls, MDM,
    /// or the platform failing to answer at all)
    Restricted,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    /// Milliseconds the platform itself may spend on a fix
    pub timeout_ms: u64,
    /// Maximum age in milliseconds of a cached fix the platform may return
    pub maximum_age_ms: u64,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout_ms: 10000,
            maximum_age_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Hints passed to the platform when starting a watch. The platform may or may not honor them,
/// [crate::WatchFilter] is what actually decides which fixes get through.
pub struct WatchOptions {
    pub position: PositionOptions,
    pub distance_filter_meters: f64,
    pub interval_ms: u64,
    pub fastest_interval_ms: u64,
}

/// Platform-side identifier of a running watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchId(pub u64);

pub type PlatformUpdate = Result<Position, PositionError>;

/// Where a platform pushes fixes (or errors) for a running watch
pub type WatchSink = mpsc::UnboundedSender<PlatformUpdate>;

/// The host platform's permission and location API. Only [crate::PositionSource] and
/// [crate::PermissionGate] call into this.
pub trait LocationPlatform: Send + Sync + 'static {
    /// Show the foreground location permission prompt (or return the remembered answer)
    fn request_foreground_authorization(
        &self,
    ) -> impl Future<Output = Result<PermissionStatus, anyhow::Error>> + Send;
    /// Get a single fix
    fn get_current_position(
        &self,
        options: PositionOptions,
    ) -> impl Future<Output = Result<Position, PositionError>> + Send;
    /// Start pushing fixes into `sink` until [LocationPlatform::clear_watch] is called with the
    /// returned id. Dropping the sink's receiver is also allowed to end the watch.
    fn watch_position(
        &self,
        options: WatchOptions,
        sink: WatchSink,
    ) -> Result<WatchId, PositionError>;
    /// Stop a watch, unknown or already cleared ids are ignored
    fn clear_watch(&self, id: WatchId);
}
