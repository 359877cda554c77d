use log::{debug, warn};
use locreport_logic::{
    ConfigError, DeliveryAcknowledgment, DeliveryError, LocationDelivery, LocationPayload,
    LocationRecord, prelude::*,
};
use reqwest::{Client, StatusCode};

use crate::config::DeliveryConfig;

/// Delivers locations with a `POST {API_BASE_URL}/location`, one request per call, no retries
pub struct HttpDeliveryClient {
    client: Client,
    config: DeliveryConfig,
}

impl HttpDeliveryClient {
    pub fn new(config: DeliveryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: DeliveryConfig, client: Client) -> Self {
        if !config.is_complete() {
            warn!("Delivery configuration is incomplete, deliveries will fail until it's set");
        }
        Self { client, config }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }
}

fn classify_send_error(err: reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        DeliveryError::Configuration(ConfigError::InvalidBaseUrl(err.to_string()))
    } else {
        DeliveryError::Network(err.to_string())
    }
}

/// Turn a response into an acknowledgment. Non-2xx statuses and undecodable bodies are
/// protocol failures, with the server's own message when the body still has one.
pub fn interpret_response(
    status: StatusCode,
    body: &[u8],
) -> Result<DeliveryAcknowledgment, DeliveryError> {
    let parsed = serde_json::from_slice::<DeliveryAcknowledgment>(body);

    if !status.is_success() {
        let message = match parsed {
            Ok(ack) if !ack.message.is_empty() => ack.message,
            _ => format!("server responded with HTTP {}", status.as_u16()),
        };
        return Err(DeliveryError::Protocol {
            status: Some(status.as_u16()),
            message,
        });
    }

    parsed
        .map(DeliveryAcknowledgment::normalized)
        .map_err(|why| DeliveryError::Protocol {
            status: Some(status.as_u16()),
            message: format!("malformed acknowledgment: {why}"),
        })
}

impl LocationDelivery for HttpDeliveryClient {
    async fn deliver(
        &self,
        record: &LocationRecord,
    ) -> Result<DeliveryAcknowledgment, DeliveryError> {
        let url = self.config.location_url()?;
        let api_key = self.config.api_key()?;
        let payload = LocationPayload::from(record);

        debug!("POST {url} {payload:?}");

        let resp = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|why| DeliveryError::Network(why.to_string()))?;

        interpret_response(status, &body)
    }
}
