use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use crate::config::{MailConfig, SmsConfig};
use crate::error::{Result, ScoutError};

#[async_trait]
pub trait MailChannel: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

#[async_trait]
pub trait SmsChannel: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Mail delivery through the operators' HTTP mail gateway. A disabled
/// channel reports success so notifications stay a no-op in development.
pub struct HttpMailer {
    client: Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, config }
    }
}

#[async_trait]
impl MailChannel for HttpMailer {
    async fn send(&self, text: &str) -> Result<()> {
        if !self.config.should_send {
            info!("Skipping sending email");
            return Ok(());
        }

        let body = json!({
            "from": self.config.sender,
            "to": self.config.recipients,
            "subject": "Found new ads",
            "text": text,
        });

        let resp = self.client.post(&self.config.api_url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ScoutError::Notify(format!(
                "mail gateway returned {status}: {message}"
            )));
        }

        info!("Email successfully sent!");
        Ok(())
    }
}

/// SMS delivery through the operators' HTTP gateway: credentials, routing
/// and message all travel as query parameters on a GET.
pub struct HttpSms {
    client: Client,
    config: SmsConfig,
}

impl HttpSms {
    pub fn new(config: SmsConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, config }
    }
}

#[async_trait]
impl SmsChannel for HttpSms {
    async fn send(&self, text: &str) -> Result<()> {
        if !self.config.should_send {
            info!("Skipping sending SMS");
            return Ok(());
        }

        let resp = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("un", self.config.username.as_str()),
                ("ps", self.config.password.as_str()),
                ("from", self.config.sender.as_str()),
                ("to", self.config.recipient.as_str()),
                ("cc", self.config.country_code.as_str()),
                ("m", text),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScoutError::Notify(format!("SMS gateway returned {status}")));
        }

        info!("The SMS has been sent!");
        Ok(())
    }
}
