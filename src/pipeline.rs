use tracing::{info, warn};

use crate::cancel::Cancel;
use crate::db::{TransferWriter, WriteSummary};
use crate::error::SinkError;
use crate::models::Notification;
use crate::parser::{SkipReport, TransferDecoder};
use crate::publisher::BatchPublisher;

#[derive(Debug, Default)]
pub struct Outcome {
    pub extracted: usize,
    pub skipped: SkipReport,
    /// Set when a publisher is configured and the batch was published.
    pub message_id: Option<String>,
    /// Set when a writer is configured and the batch was persisted.
    pub persisted: Option<WriteSummary>,
}

/// Extract transfers from a notification, then publish and persist them.
pub struct Pipeline {
    decoder: TransferDecoder,
    publisher: Option<BatchPublisher>,
    writer: Option<TransferWriter>,
}

impl Pipeline {
    pub fn new(
        decoder: TransferDecoder,
        publisher: Option<BatchPublisher>,
        writer: Option<TransferWriter>,
    ) -> Self {
        Self {
            decoder,
            publisher,
            writer,
        }
    }

    pub async fn process(
        &self,
        notification: &Notification,
        cancel: &Cancel,
    ) -> Result<Outcome, SinkError> {
        let extraction = self.decoder.extract(notification);
        let mut outcome = Outcome {
            extracted: extraction.transfers.len(),
            skipped: extraction.skipped,
            ..Default::default()
        };

        if extraction.is_empty() {
            warn!(
                webhook_id = %notification.webhook_id,
                logs = notification.logs().len(),
                non_transfer = extraction.skipped.non_transfer,
                undecodable = extraction.skipped.undecodable,
                "no transfer events found in webhook"
            );
            return Ok(outcome);
        }

        info!(
            webhook_id = %notification.webhook_id,
            count = extraction.transfers.len(),
            skipped = extraction.skipped.total(),
            "parsed transfer events"
        );

        if let Some(publisher) = &self.publisher {
            let message_id = publisher
                .publish_transfers(notification, &extraction.transfers, cancel)
                .await?;
            outcome.message_id = Some(message_id);
        }

        if let Some(writer) = &self.writer {
            let summary = writer.write_batch(&extraction.transfers, cancel).await?;
            outcome.persisted = Some(summary);
        }

        Ok(outcome)
    }
}
