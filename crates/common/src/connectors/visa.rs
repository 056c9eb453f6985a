//! Visa requirement connector (RapidAPI)

use super::VisaLookup;
use crate::config::VisaConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Visa requirement lookup for a passport and destination pair
pub struct RapidApiVisa {
    client: reqwest::Client,
    api_key: String,
    api_host: String,
}

impl RapidApiVisa {
    pub fn new(config: &VisaConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "visa.api_key is required".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            api_host: config.api_host.clone(),
        })
    }

    fn url(&self) -> String {
        format!("https://{}/v2/visa/check", self.api_host)
    }

    async fn request(&self, nationality_code: &str, destination_code: &str) -> Result<serde_json::Value> {
        let form = form_body(nationality_code, destination_code);

        let response = self.client
            .post(self.url())
            .header("x-rapidapi-key", &self.api_key)
            .header("x-rapidapi-host", &self.api_host)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Connector {
                connector: "visa".to_string(),
                message: format!("API error {}: {}", status, body),
            });
        }

        Ok(response.json().await?)
    }
}

/// Country codes are upper-cased; two-letter codes need no escaping
fn form_body(nationality_code: &str, destination_code: &str) -> String {
    format!(
        "passport={}&destination={}",
        nationality_code.trim().to_uppercase(),
        destination_code.trim().to_uppercase()
    )
}

#[async_trait]
impl VisaLookup for RapidApiVisa {
    async fn lookup(&self, nationality_code: &str, destination_code: &str) -> Option<serde_json::Value> {
        let start = Instant::now();

        match self.request(nationality_code, destination_code).await {
            Ok(payload) => {
                debug!(nationality_code, destination_code, "Visa lookup completed");
                metrics::record_connector("visa", "hit", start.elapsed().as_secs_f64());
                Some(payload)
            }
            Err(e) => {
                warn!(error = %e, nationality_code, destination_code, "Visa lookup failed");
                metrics::record_connector("visa", "failed", start.elapsed().as_secs_f64());
                None
            }
        }
    }
}
