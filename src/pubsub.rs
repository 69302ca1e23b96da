// src/pubsub.rs
use std::collections::HashMap;

use async_trait::async_trait;
use eyre::{eyre, Result};
use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use google_cloud_pubsub::client::{Client, ClientConfig};
use google_cloud_pubsub::publisher::Publisher;
use tracing::info;

use crate::error::QueueError;
use crate::publisher::MessageQueue;

/// Google Cloud Pub/Sub topic publisher.
///
/// Uses application default credentials, or `PUBSUB_EMULATOR_HOST` when set.
pub struct PubSubQueue {
    topic: String,
    publisher: Publisher,
}

impl PubSubQueue {
    pub async fn connect(project_id: Option<String>, topic_id: &str) -> Result<Self> {
        let config = ClientConfig {
            project_id,
            ..Default::default()
        }
        .with_auth()
        .await
        .map_err(|e| eyre!("pubsub auth failed: {e}"))?;

        let client = Client::new(config)
            .await
            .map_err(|e| eyre!("pubsub client failed: {e}"))?;
        let topic = client.topic(topic_id);
        info!("Publishing to Pub/Sub topic {}", topic.fully_qualified_name());

        Ok(Self {
            topic: topic.fully_qualified_name().to_string(),
            publisher: topic.new_publisher(None),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Flush buffered messages and stop the publisher's background tasks.
    pub async fn shutdown(&self) {
        let mut publisher = self.publisher.clone();
        publisher.shutdown().await;
    }
}

#[async_trait]
impl MessageQueue for PubSubQueue {
    async fn publish(
        &self,
        data: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String, QueueError> {
        let awaiter = self
            .publisher
            .publish(PubsubMessage {
                data,
                attributes,
                ..Default::default()
            })
            .await;

        awaiter
            .get()
            .await
            .map_err(|status| QueueError::Transport(status.to_string()))
    }
}
