// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Alert dispatch through a webhook with an email fallback.
//!
//! Channels are tried in strict priority order and at most one notification
//! leaves the process per [`AlertDispatcher::dispatch`] call. Dispatch never
//! fails: channel errors are logged and recorded on the returned
//! [`AlertEvent`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::{AlertConfig, EmailConfig};

/// Subject line of alert emails.
pub const EMAIL_SUBJECT: &str = "EdgePaaS Alert";

/// A channel failed to deliver.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// Request could not be sent or timed out.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The channel answered with a non-success status.
    #[error("channel responded with HTTP {0}")]
    Status(u16),
}

/// Which channel an attempt used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Chat webhook.
    Webhook,
    /// Email relay.
    Email,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webhook => write!(f, "webhook"),
            Self::Email => write!(f, "email"),
        }
    }
}

/// Delivers a text message to operators.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel identity for logs and events.
    fn kind(&self) -> ChannelKind;

    /// Send one message.
    async fn send(&self, message: &str) -> Result<(), AlertError>;
}

/// Posts `{"text": message}` to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookChannel {
    /// Create a webhook channel.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(&self, message: &str) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&json!({ "text": message }))
            .send()
            .await?;
        check_status(response.status())
    }
}

/// Sends email through an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct EmailChannel {
    client: reqwest::Client,
    config: EmailConfig,
    timeout: Duration,
}

impl EmailChannel {
    /// Create an email channel.
    pub fn new(config: EmailConfig, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            timeout,
        }
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, message: &str) -> Result<(), AlertError> {
        let mut request = self
            .client
            .post(&self.config.api_url)
            .timeout(self.timeout)
            .json(&json!({
                "from": self.config.from,
                "to": self.config.to,
                "subject": EMAIL_SUBJECT,
                "text": message,
            }));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        check_status(response.status())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), AlertError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(AlertError::Status(status.as_u16()))
    }
}

/// Record of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    /// Message text.
    pub message: String,
    /// Channels contacted, in order.
    pub attempted: Vec<ChannelKind>,
    /// Channel that delivered, if any.
    pub delivered: Option<ChannelKind>,
    /// Logged only, because the condition is an expected fallback degradation.
    pub suppressed: bool,
    /// When dispatch started.
    pub raised_at: DateTime<Utc>,
}

/// Routes alerts to the webhook, then email.
#[derive(Clone, Default)]
pub struct AlertDispatcher {
    webhook: Option<Arc<dyn AlertChannel>>,
    email: Option<Arc<dyn AlertChannel>>,
}

impl AlertDispatcher {
    /// Create a dispatcher from explicit channels.
    pub fn new(
        webhook: Option<Arc<dyn AlertChannel>>,
        email: Option<Arc<dyn AlertChannel>>,
    ) -> Self {
        Self { webhook, email }
    }

    /// Create a dispatcher with the channels present in `config`.
    pub fn from_config(config: &AlertConfig) -> Self {
        let webhook = config.webhook_url.as_ref().map(|url| {
            Arc::new(WebhookChannel::new(url.clone(), config.timeout)) as Arc<dyn AlertChannel>
        });
        let email = config.email.as_ref().map(|email| {
            Arc::new(EmailChannel::new(email.clone(), config.timeout)) as Arc<dyn AlertChannel>
        });
        Self::new(webhook, email)
    }

    /// Whether any external channel is configured.
    pub fn has_channels(&self) -> bool {
        self.webhook.is_some() || self.email.is_some()
    }

    /// Deliver `message`, or only log it when `suppressed`.
    pub async fn dispatch(&self, message: &str, suppressed: bool) -> AlertEvent {
        let mut event = AlertEvent {
            message: message.to_string(),
            attempted: Vec::new(),
            delivered: None,
            suppressed,
            raised_at: Utc::now(),
        };

        if suppressed {
            warn!(alert = message, "Alert suppressed, running on embedded fallback");
            return event;
        }

        if !self.has_channels() {
            error!(alert = message, "No alert channel configured");
            return event;
        }

        for channel in [&self.webhook, &self.email].into_iter().flatten() {
            let kind = channel.kind();
            event.attempted.push(kind);
            match channel.send(message).await {
                Ok(()) => {
                    info!(channel = %kind, "Alert sent");
                    event.delivered = Some(kind);
                    return event;
                }
                Err(e) => {
                    error!(channel = %kind, error = %e, "Alert channel failed");
                }
            }
        }

        error!(alert = message, "All alert channels failed");
        event
    }
}
