//! Change-gated notification dispatch.
//!
//! The poll loop recomputes the recommendation every tick, but sinks only hear
//! about it when the start message changes. The gate records the new value
//! *before* any sink is tried, so a failing sink is attempted once per change
//! and never retried on later ticks. Each sink attempt is isolated: an error or
//! timeout is logged and recorded, then the next sink is tried.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS, TlsConfiguration, Transport};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use anyhow::{Context, Result};

use crate::config::{Config, MqttConfig};
use crate::redact;
use crate::suggestion::Recommendation;

/// Request channel capacity for the short-lived MQTT client
const MQTT_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook answered with status {0}")]
    Status(u16),

    #[error("MQTT request failed: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error("MQTT connection failed: {0}")]
    MqttConnection(#[from] rumqttc::ConnectionError),

    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Rejected(String),
}

/// A destination for recommendation changes
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    async fn notify(&self, message: &str) -> Result<(), SinkError>;
}

/// Home Assistant webhook URL for a host and webhook id
pub fn webhook_url(protocol: &str, hostname: &str, webhook_id: &str) -> String {
    format!("{}://{}/api/webhook/{}", protocol, hostname, webhook_id)
}

/// JSON body understood by the existing Home Assistant automation
#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookPayload<'a> {
    pub msg: &'a str,
}

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, message: &str) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { msg: message })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Status(status.as_u16()))
        }
    }
}

/// Publishes the raw message to a topic, one connection per notification
pub struct MqttSink {
    options: MqttOptions,
    topic: String,
}

impl MqttSink {
    /// Fails only when the configured CA bundle cannot be read.
    pub fn new(config: &MqttConfig) -> Result<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.server, config.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs));
        if let Some((user, pass)) = &config.credentials {
            options.set_credentials(user, pass);
        }

        if config.tls {
            let transport = match &config.ca_file {
                Some(path) => {
                    let ca = std::fs::read(path).with_context(|| {
                        format!("Failed to read MQTT_CA_FILE {}", path.display())
                    })?;
                    Transport::Tls(TlsConfiguration::Simple {
                        ca,
                        alpn: None,
                        client_auth: None,
                    })
                }
                // Platform trust store
                None => Transport::tls_with_default_config(),
            };
            options.set_transport(transport);
        }

        Ok(Self {
            options,
            topic: config.topic.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn notify(&self, message: &str) -> Result<(), SinkError> {
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), MQTT_CHANNEL_CAPACITY);

        client
            .publish(self.topic.as_str(), QoS::AtMostOnce, false, message.as_bytes().to_vec())
            .await?;

        // Drive the connection until the publish has been written
        loop {
            match eventloop.poll().await? {
                Event::Outgoing(Outgoing::Publish(_)) => break,
                event => debug!("MQTT event: {:?}", event),
            }
        }

        client.disconnect().await?;
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    // The publish already went out; a noisy close is not a failure
                    debug!("MQTT disconnect: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Last recommendation that passed the gate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationState {
    last_dispatched: Option<Recommendation>,
}

impl NotificationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_dispatched(&self) -> Option<&Recommendation> {
        self.last_dispatched.as_ref()
    }

    /// Recommendations compare on the start message only
    pub fn is_current(&self, recommendation: &Recommendation) -> bool {
        self.last_dispatched
            .as_ref()
            .is_some_and(|last| last.start_message == recommendation.start_message)
    }
}

/// Outcome of one gated dispatch
#[derive(Debug)]
pub struct DispatchReport {
    pub message: String,
    pub delivered: Vec<String>,
    pub failed: Vec<(String, SinkError)>,
}

impl DispatchReport {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            delivered: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Notifier {
    sinks: Vec<Box<dyn Sink>>,
    sink_timeout: Duration,
}

impl Notifier {
    pub fn new(sink_timeout: Duration) -> Self {
        Self {
            sinks: Vec::new(),
            sink_timeout,
        }
    }

    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Build the sinks enabled in the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let sink_timeout = Duration::from_secs(config.sink_timeout_secs);
        let mut notifier = Self::new(sink_timeout);

        if let Some(webhook) = &config.webhook {
            let client = reqwest::Client::builder()
                .timeout(sink_timeout)
                .build()
                .context("Failed to build HTTP client")?;
            let url = webhook.url();
            info!("Webhook sink: {}", redact::webhook_url(&url));
            notifier = notifier.with_sink(WebhookSink::new(client, url));
        }

        if let Some(mqtt) = &config.mqtt {
            info!(
                "MQTT sink: {}:{}{} topic {} ({})",
                mqtt.server,
                mqtt.port,
                if mqtt.tls { " over TLS" } else { "" },
                mqtt.topic,
                mqtt.credentials
                    .as_ref()
                    .map(|(user, pass)| format!(
                        "user {}, password {}",
                        redact::username(user),
                        redact::secret(pass)
                    ))
                    .unwrap_or_else(|| "anonymous".to_string())
            );
            notifier = notifier.with_sink(MqttSink::new(mqtt)?);
        }

        Ok(notifier)
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn sink_timeout(&self) -> Duration {
        self.sink_timeout
    }

    /// Push `current` to every sink if its start message differs from the last
    /// one dispatched. Returns `None` when the gate held.
    ///
    /// Never fails: sink errors end up in the report.
    pub async fn dispatch_if_changed(
        &self,
        current: &Recommendation,
        state: &mut NotificationState,
    ) -> Option<DispatchReport> {
        if state.is_current(current) {
            debug!("Recommendation unchanged: {}", current.start_message);
            return None;
        }

        // Record first: a failed delivery is not retried on the next tick
        state.last_dispatched = Some(current.clone());

        let message = current.start_message.as_str();
        let mut report = DispatchReport::new(message);

        for sink in &self.sinks {
            match timeout(self.sink_timeout, sink.notify(message)).await {
                Ok(Ok(())) => {
                    debug!("Notified {} sink", sink.name());
                    report.delivered.push(sink.name().to_string());
                }
                Ok(Err(e)) => {
                    warn!("Failed to notify {} sink: {}", sink.name(), e);
                    report.failed.push((sink.name().to_string(), e));
                }
                Err(_) => {
                    warn!(
                        "{} sink did not answer within {:?}",
                        sink.name(),
                        self.sink_timeout
                    );
                    report
                        .failed
                        .push((sink.name().to_string(), SinkError::Timeout(self.sink_timeout)));
                }
            }
        }

        Some(report)
    }
}
