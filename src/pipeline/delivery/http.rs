use std::path::Path;
use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};

use super::{DeliveryError, DeliveryResponse, DeliveryTransport};
use crate::config::DeliveryConfig;

/// Multipart POST of `metadata` (JSON text) and `file` to the endpoint.
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| DeliveryError::HttpClient(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
            timeout_secs: config.timeout_seconds,
        })
    }
}

impl DeliveryTransport for HttpTransport {
    fn submit(
        &self,
        file: &Path,
        metadata: &serde_json::Value,
    ) -> Result<DeliveryResponse, DeliveryError> {
        let bytes = std::fs::read(file)?;
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| DeliveryError::HttpClient(e.to_string()))?;
        let form = Form::new()
            .text("metadata", metadata.to_string())
            .part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::HttpClient(format!(
                        "Request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    DeliveryError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .map_err(|e| DeliveryError::ResponseParsing(e.to_string()))
    }
}
