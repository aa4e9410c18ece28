//! Delivery of stamped e-mail attachments to the remote routing endpoint.
//!
//! The endpoint decides the route and, optionally, the final filename.
//! Submissions are retried with linearly increasing backoff.

pub mod http;
pub mod naming;

pub use http::HttpTransport;
pub use naming::{apply_naming_convention, determine_route_hint, resolve_route_dir};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DeliveryConfig;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Endpoint responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid endpoint response: {0}")]
    ResponseParsing(String),

    #[error("Delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// The endpoint's routing decision. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryResponse {
    pub final_filename: Option<String>,
    pub naming_convention: Option<String>,
    pub route: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// One submission of a file plus its metadata.
pub trait DeliveryTransport {
    fn submit(
        &self,
        file: &Path,
        metadata: &serde_json::Value,
    ) -> Result<DeliveryResponse, DeliveryError>;
}

/// Blocking delay between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retries a transport up to `max_retries` times, waiting
/// `backoff * attempt` between attempts.
pub struct DeliveryClient {
    transport: Box<dyn DeliveryTransport>,
    sleeper: Box<dyn Sleeper>,
    max_retries: u32,
    backoff: Duration,
}

impl DeliveryClient {
    pub fn new(
        transport: Box<dyn DeliveryTransport>,
        sleeper: Box<dyn Sleeper>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            transport,
            sleeper,
            max_retries: config.max_retries.max(1),
            backoff: Duration::from_secs(config.backoff_seconds),
        }
    }

    pub fn deliver(
        &self,
        file: &Path,
        metadata: &serde_json::Value,
    ) -> Result<DeliveryResponse, DeliveryError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            match self.transport.submit(file, metadata) {
                Ok(response) => {
                    tracing::info!(file = %file.display(), attempt, "Endpoint accepted file");
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(
                        file = %file.display(),
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Delivery attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
            if attempt < self.max_retries {
                self.sleeper.sleep(self.backoff * attempt);
            }
        }
        Err(DeliveryError::RetriesExhausted {
            attempts: self.max_retries,
            last_error,
        })
    }
}
