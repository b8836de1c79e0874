//! Notification sinks for emitted incidents.

use crate::error::Error;
use crate::events::EventSummary;
use crate::messaging::MessageBrokerTrait;
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

/// Receives the summary of every emitted incident
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, summary: &EventSummary) -> Result<()>;
}

/// Writes each incident as a JSON line to the log
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, summary: &EventSummary) -> Result<()> {
        let line = serde_json::to_string(summary)
            .map_err(|e| Error::Serialization(format!("Failed to serialize incident: {}", e)))?;
        info!("{}", line);
        Ok(())
    }
}

/// Publishes each incident back onto the broker
pub struct BrokerSink<B: MessageBrokerTrait> {
    broker: Arc<B>,
    routing_key: String,
}

impl<B: MessageBrokerTrait> BrokerSink<B> {
    pub fn new(broker: Arc<B>, routing_key: impl Into<String>) -> Self {
        Self {
            broker,
            routing_key: routing_key.into(),
        }
    }
}

#[async_trait]
impl<B: MessageBrokerTrait + 'static> NotificationSink for BrokerSink<B> {
    async fn notify(&self, summary: &EventSummary) -> Result<()> {
        self.broker
            .publish(&self.routing_key, summary)
            .await
            .map_err(|e| Error::Sink(format!("Failed to publish incident for {}: {}", summary.camera_id, e)))?;
        Ok(())
    }
}
