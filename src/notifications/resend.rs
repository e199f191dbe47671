// E-mail delivery through Resend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::adapters::traits::Notifier;
use crate::error::{AppError, AppResult, DeliveryError};

/// Resend email client
pub struct ResendNotifier {
    api_key: String,
    from_email: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    id: String,
}

impl ResendNotifier {
    pub fn new(api_key: String, from_email: String, base_url: String) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            from_email,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, address: &str, subject: &str, body_html: &str) -> Result<(), DeliveryError> {
        let request = ResendEmailRequest {
            from: &self.from_email,
            to: [address],
            subject,
            html: body_html,
        };

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                address: address.to_string(),
                status: status.as_u16(),
                message: error_text,
            });
        }

        // An unreadable body after a 2xx still means the provider accepted it
        match response.json::<ResendEmailResponse>().await {
            Ok(result) => info!("📧 Email sent via Resend to {}: {}", address, result.id),
            Err(_) => info!("📧 Email sent via Resend to {}", address),
        }
        Ok(())
    }
}
