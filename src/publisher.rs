use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::cancel::Cancel;
use crate::error::{QueueError, SinkError};
use crate::models::{Notification, TransferRecord};

/// Outbound queue: one message in, one acknowledgment id out.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(
        &self,
        data: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String, QueueError>;
}

/// Publishes every transfer of a notification as a single message.
#[derive(Clone)]
pub struct BatchPublisher {
    queue: Arc<dyn MessageQueue>,
}

impl BatchPublisher {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    /// Returns the queue's message id once the broker has acknowledged it.
    pub async fn publish_transfers(
        &self,
        notification: &Notification,
        transfers: &[TransferRecord],
        cancel: &Cancel,
    ) -> Result<String, SinkError> {
        let data = serde_json::to_vec(transfers)
            .map_err(|e| QueueError::Encode(format!("failed to marshal transfers: {e}")))?;
        let attributes = build_attributes(notification, transfers.len());

        let message_id = tokio::select! {
            res = self.queue.publish(data, attributes) => res?,
            _ = cancel.cancelled() => return Err(SinkError::Cancelled),
        };

        info!(message_id = %message_id, count = transfers.len(), "published transfers to queue");
        Ok(message_id)
    }
}

/// Routing attributes; an empty batch carries only `count = "0"`.
pub fn build_attributes(notification: &Notification, count: usize) -> HashMap<String, String> {
    if count == 0 {
        return HashMap::from([("count".to_string(), "0".to_string())]);
    }
    HashMap::from([
        ("webhook_id".to_string(), notification.webhook_id.clone()),
        ("event_id".to_string(), notification.id.clone()),
        ("network".to_string(), notification.event.network.clone()),
        ("count".to_string(), count.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{notification, records};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CapturingQueue {
        sent: Mutex<Vec<(Vec<u8>, HashMap<String, String>)>>,
    }

    #[async_trait]
    impl MessageQueue for CapturingQueue {
        async fn publish(
            &self,
            data: Vec<u8>,
            attributes: HashMap<String, String>,
        ) -> Result<String, QueueError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((data, attributes));
            Ok(format!("msg-{}", sent.len()))
        }
    }

    struct FailingQueue;

    #[async_trait]
    impl MessageQueue for FailingQueue {
        async fn publish(
            &self,
            _data: Vec<u8>,
            _attributes: HashMap<String, String>,
        ) -> Result<String, QueueError> {
            Err(QueueError::Transport("unavailable".to_string()))
        }
    }

    struct StalledQueue;

    #[async_trait]
    impl MessageQueue for StalledQueue {
        async fn publish(
            &self,
            _data: Vec<u8>,
            _attributes: HashMap<String, String>,
        ) -> Result<String, QueueError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn publishes_one_message_with_attributes() {
        let queue = Arc::new(CapturingQueue::default());
        let publisher = BatchPublisher::new(queue.clone());
        let n = notification(vec![]);
        let transfers = records(3);

        let id = publisher
            .publish_transfers(&n, &transfers, &Cancel::never())
            .await
            .unwrap();
        assert_eq!(id, "msg-1");

        let sent = queue.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (data, attributes) = &sent[0];
        assert_eq!(attributes["webhook_id"], "wh_test");
        assert_eq!(attributes["event_id"], "whevt_test");
        assert_eq!(attributes["network"], "ETH_MAINNET");
        assert_eq!(attributes["count"], "3");

        let payload: serde_json::Value = serde_json::from_slice(data).unwrap();
        let items = payload.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2]["transfer"]["value"], "3");
        assert_eq!(items[0]["transfer"]["logIndex"], 0);
        assert_eq!(items[0]["alchemy"]["webhookId"], "wh_test");
    }

    #[tokio::test]
    async fn empty_batch_is_still_published() {
        let queue = Arc::new(CapturingQueue::default());
        let publisher = BatchPublisher::new(queue.clone());

        publisher
            .publish_transfers(&notification(vec![]), &[], &Cancel::never())
            .await
            .unwrap();

        let sent = queue.sent.lock().unwrap();
        assert_eq!(sent[0].0, b"[]");
        assert_eq!(
            sent[0].1,
            HashMap::from([("count".to_string(), "0".to_string())])
        );
    }

    #[tokio::test]
    async fn queue_failure_is_publish_error() {
        let publisher = BatchPublisher::new(Arc::new(FailingQueue));
        let err = publisher
            .publish_transfers(&notification(vec![]), &records(1), &Cancel::never())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Publish(QueueError::Transport(_))));
    }

    #[tokio::test]
    async fn deadline_abandons_pending_publish() {
        let publisher = BatchPublisher::new(Arc::new(StalledQueue));
        let cancel = Cancel::never().with_timeout(Duration::from_millis(20));
        let err = publisher
            .publish_transfers(&notification(vec![]), &records(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Cancelled));
    }
}
