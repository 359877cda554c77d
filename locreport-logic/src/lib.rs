mod delivery;
mod error;
mod permission;
mod platform;
mod position;
mod record;
mod reporter;
mod session;
mod settings;

pub use delivery::{AckStatus, DeliveryAcknowledgment, LocationDelivery, LocationPayload};
pub use error::{ConfigError, DeliveryError, PositionError};
pub use permission::PermissionGate;
pub use platform::{
    LocationPlatform, PermissionStatus, PlatformUpdate, PositionOptions, WatchId, WatchOptions,
    WatchSink,
};
pub use position::{PositionSource, WatchFilter, WatchHandle};
pub use record::{Coordinates, LocationRecord, Position, distance_meters};
pub use reporter::{Reporter, StateUpdateSender, TriggerOutcome};
pub use session::{DeliveryOutcome, SessionEvent, SessionState};
pub use settings::{PositionMode, ReporterConfig, WatchSettings};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
