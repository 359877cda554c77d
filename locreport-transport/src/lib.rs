mod config;
mod http;

pub use config::DeliveryConfig;
pub use http::{HttpDeliveryClient, interpret_response};
