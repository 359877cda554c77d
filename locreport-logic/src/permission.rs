use std::sync::Arc;

use log::{info, warn};
use tokio::sync::OnceCell;

use crate::platform::{LocationPlatform, PermissionStatus};

/// Asks the platform for foreground location access once and remembers the answer
pub struct PermissionGate<P: LocationPlatform> {
    platform: Arc<P>,
    status: OnceCell<PermissionStatus>,
}

impl<P: LocationPlatform> PermissionGate<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self {
            platform,
            status: OnceCell::new(),
        }
    }

    /// Prompt on the first call, every later (or concurrent) call gets the same result.
    /// Platform failures resolve to [PermissionStatus::Restricted].
    pub async fn request(&self) -> PermissionStatus {
        *self
            .status
            .get_or_init(|| async {
                match self.platform.request_foreground_authorization().await {
                    Ok(status) => {
                        info!("Location permission: {status:?}");
                        status
                    }
                    Err(why) => {
                        warn!("Failed to request location permission: {why:?}");
                        PermissionStatus::Restricted
                    }
                }
            })
            .await
    }

    /// The recorded outcome, `None` until [PermissionGate::request] has resolved
    pub fn status(&self) -> Option<PermissionStatus> {
        self.status.get().copied()
    }
}
