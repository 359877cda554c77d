use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    delivery::{AckStatus, DeliveryAcknowledgment},
    error::{DeliveryError, PositionError},
    platform::PermissionStatus,
    record::LocationRecord,
};

pub const PERMISSION_DENIED_MESSAGE: &str = "Location permission denied";

#[derive(Debug)]
/// How a delivery request ended
pub enum DeliveryOutcome {
    Acknowledged(DeliveryAcknowledgment),
    Failed(DeliveryError),
    /// The request ended before anything was sent (no position could be gotten)
    Abandoned,
}

#[derive(Debug)]
/// Everything that may change a [SessionState]
pub enum SessionEvent {
    PermissionResolved(PermissionStatus),
    /// A trigger was accepted, a delivery request is now outstanding
    DeliveryStarted,
    PositionResolved(Result<LocationRecord, PositionError>),
    DeliveryResolved(DeliveryOutcome),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// What the presentation layer shows. Starts empty, only changed through [SessionState::apply].
pub struct SessionState {
    pub permission: Option<PermissionStatus>,
    pub last_known_location: Option<LocationRecord>,
    pub last_error: Option<String>,
    /// True from the moment a trigger is accepted until its delivery request resolves
    pub sending: bool,
    pub last_acknowledgment: Option<DeliveryAcknowledgment>,
}

impl SessionState {
    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PermissionResolved(status) => {
                self.permission = Some(status);
                if !status.is_granted() {
                    self.last_error = Some(PERMISSION_DENIED_MESSAGE.to_string());
                }
            }
            SessionEvent::DeliveryStarted => {
                self.sending = true;
                self.last_error = None;
            }
            SessionEvent::PositionResolved(Ok(record)) => {
                self.last_known_location = Some(record);
            }
            SessionEvent::PositionResolved(Err(why)) => {
                self.last_error = Some(format!("Error getting location: {why}"));
            }
            SessionEvent::DeliveryResolved(outcome) => {
                self.sending = false;
                match outcome {
                    DeliveryOutcome::Acknowledged(ack) => {
                        self.last_error = None;
                        self.last_acknowledgment = Some(ack);
                    }
                    DeliveryOutcome::Failed(why) => {
                        self.last_error = Some(failure_message(&why));
                        self.last_acknowledgment = None;
                    }
                    DeliveryOutcome::Abandoned => {}
                }
            }
        }
    }

    /// Plain text rendering for a presentation layer
    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(err) = &self.last_error {
            let _ = writeln!(out, "Error: {err}");
        }

        match &self.last_known_location {
            Some(loc) => {
                let _ = writeln!(out, "Latitude: {}", loc.latitude);
                let _ = writeln!(out, "Longitude: {}", loc.longitude);
                let _ = writeln!(out, "Accuracy: {}m", loc.accuracy);
                let _ = writeln!(out, "Last Updated: {}", format_timestamp(loc.timestamp));
            }
            None if self.sending => out.push_str("Getting location...\n"),
            None if self.last_error.is_none() => out.push_str("No location yet\n"),
            None => {}
        }

        if self.sending {
            out.push_str("Sending location...\n");
        }

        if let Some(ack) = &self.last_acknowledgment {
            match ack.status {
                AckStatus::Ok => {
                    let _ = writeln!(out, "{}", ack.display_text());
                }
                AckStatus::Error => {
                    let _ = writeln!(out, "Server rejected location: {}", ack.display_text());
                }
            }
        }

        out
    }
}

fn failure_message(err: &DeliveryError) -> String {
    match err {
        DeliveryError::Network(_) => "Failed to send location: network unavailable".to_string(),
        DeliveryError::Protocol { message, .. } => format!("Failed to send location: {message}"),
        DeliveryError::Configuration(why) => format!("Location reporting is not set up: {why}"),
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}
