use serde::{Deserialize, Serialize};

use crate::{error::DeliveryError, record::LocationRecord};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// The backend's answer to a delivered location
pub struct DeliveryAcknowledgment {
    pub status: AckStatus,
    pub message: String,
    /// Id the server stored the location under, only ever set when `status` is ok
    #[serde(rename = "locationId", default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

impl DeliveryAcknowledgment {
    pub fn ok(message: impl Into<String>, record_id: Option<String>) -> Self {
        Self {
            status: AckStatus::Ok,
            message: message.into(),
            record_id,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Error,
            message: message.into(),
            record_id: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }

    /// Drop any id a server sent alongside an error status
    pub fn normalized(mut self) -> Self {
        if !self.is_ok() {
            self.record_id = None;
        }
        self
    }

    /// Text shown to the user, `message (id: ...)` when there's an id
    pub fn display_text(&self) -> String {
        match &self.record_id {
            Some(id) => format!("{} (id: {id})", self.message),
            None => self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
/// Wire body of a delivery. Accuracy stays local and is never sent.
pub struct LocationPayload {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: i64,
}

impl From<&LocationRecord> for LocationPayload {
    fn from(record: &LocationRecord) -> Self {
        Self {
            lat: record.latitude,
            lon: record.longitude,
            timestamp: record.timestamp,
        }
    }
}

/// Sends a [LocationRecord] to the backend. Implementations make exactly one attempt per call.
pub trait LocationDelivery: Send + Sync + 'static {
    fn deliver(
        &self,
        record: &LocationRecord,
    ) -> impl Future<Output = Result<DeliveryAcknowledgment, DeliveryError>> + Send;
}
