// src/parser.rs
use std::str::FromStr;
use std::sync::Arc;

use alloy::dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy::json_abi::Event;
use alloy::primitives::{Address, B256, U256};
use tracing::{debug, warn};

use crate::error::{ParseError, SchemaError};
use crate::models::{
    BlockSummary, LogEntry, Notification, SourceMetadata, TokenAmount, TransactionSummary,
    TransferRecord, TransferSummary,
};

/// ERC20 `Transfer`; topics[0] is keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_EVENT: &str =
    "event Transfer(address indexed from, address indexed to, uint256 value)";

/// Parsed event ABI used to recognise and decode transfer logs.
///
/// Built once at startup and shared behind an `Arc`; it holds no mutable state.
#[derive(Debug, Clone)]
pub struct TransferSchema {
    event: Event,
    selector: B256,
    body: DynSolType,
}

impl TransferSchema {
    pub fn erc20() -> Result<Self, SchemaError> {
        Self::new(TRANSFER_EVENT)
    }

    /// Accepts any non-anonymous event with two indexed `address` params and a
    /// single non-indexed unsigned integer.
    pub fn new(signature: &str) -> Result<Self, SchemaError> {
        let event = Event::parse(signature).map_err(|e| SchemaError::Parse(e.to_string()))?;
        if event.anonymous {
            return Err(SchemaError::Shape(format!("{} is anonymous", event.name)));
        }

        let indexed: Vec<_> = event.inputs.iter().filter(|p| p.indexed).collect();
        if indexed.len() != 2 || indexed.iter().any(|p| p.ty != "address") {
            return Err(SchemaError::Shape(format!(
                "{} must index exactly (address, address)",
                event.name
            )));
        }

        let body = event
            .inputs
            .iter()
            .filter(|p| !p.indexed)
            .map(|p| p.resolve())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SchemaError::Parse(e.to_string()))?;
        if !matches!(body.as_slice(), [DynSolType::Uint(_)]) {
            return Err(SchemaError::Shape(format!(
                "{} must carry a single unsigned amount",
                event.name
            )));
        }

        Ok(Self {
            selector: event.selector(),
            body: DynSolType::Tuple(body),
            event,
        })
    }

    pub fn name(&self) -> &str {
        &self.event.name
    }

    pub fn selector(&self) -> B256 {
        self.selector
    }

    fn decode_amount(&self, data: &[u8]) -> Result<U256, ParseError> {
        if data.is_empty() || data.len() % 32 != 0 {
            return Err(ParseError::Decode(format!(
                "payload is {} bytes, expected whole 32-byte words",
                data.len()
            )));
        }

        let decoded = self
            .body
            .abi_decode_sequence(data)
            .map_err(|e| ParseError::Decode(e.to_string()))?;

        match decoded {
            DynSolValue::Tuple(values) => values
                .first()
                .and_then(DynSolValue::as_uint)
                .map(|(value, _bits)| value)
                .ok_or_else(|| ParseError::Decode("payload has no amount".to_string())),
            other => Err(ParseError::Decode(format!("unexpected payload {other:?}"))),
        }
    }
}

/// Result of running the decoder over every log in a notification.
#[derive(Debug, Default)]
pub struct Extraction {
    pub transfers: Vec<TransferRecord>,
    pub skipped: SkipReport,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

/// Counts of logs that produced no record, split by cause.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SkipReport {
    /// Not a transfer at all (wrong topic count or selector).
    pub non_transfer: usize,
    /// Looked like a transfer but the payload or topics were corrupt.
    pub undecodable: usize,
}

impl SkipReport {
    pub fn total(&self) -> usize {
        self.non_transfer + self.undecodable
    }

    fn record(&mut self, err: &ParseError) {
        match err {
            ParseError::OutOfRange { .. } | ParseError::MalformedEvent(_) => self.non_transfer += 1,
            ParseError::Decode(_) => self.undecodable += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferDecoder {
    schema: Arc<TransferSchema>,
}

impl TransferDecoder {
    pub fn new(schema: Arc<TransferSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &TransferSchema {
        &self.schema
    }

    /// Decode `notification.logs()[index]` into a `TransferRecord`.
    pub fn decode(
        &self,
        notification: &Notification,
        index: usize,
    ) -> Result<TransferRecord, ParseError> {
        let logs = notification.logs();
        let log = logs.get(index).ok_or(ParseError::OutOfRange {
            index,
            len: logs.len(),
        })?;

        if log.topics.len() < 3 {
            return Err(ParseError::MalformedEvent(format!(
                "expected at least 3 topics, got {}",
                log.topics.len()
            )));
        }
        let signature = parse_topic(&log.topics[0])?;
        if signature != self.schema.selector() {
            return Err(ParseError::MalformedEvent(format!(
                "topic0 {signature} is not {}",
                self.schema.name()
            )));
        }

        let data = hex::decode(log.data.trim_start_matches("0x"))
            .map_err(|e| ParseError::Decode(format!("payload is not hex: {e}")))?;
        let amount = self.schema.decode_amount(&data)?;

        // topics[1] is from, topics[2] is to
        let from = topic_to_address(&log.topics[1])?;
        let to = topic_to_address(&log.topics[2])?;

        Ok(build_record(notification, log, from, to, amount))
    }

    /// Decode every log, keeping successes in order and counting the rest.
    pub fn extract(&self, notification: &Notification) -> Extraction {
        let mut extraction = Extraction {
            transfers: Vec::with_capacity(notification.logs().len()),
            skipped: SkipReport::default(),
        };

        for index in 0..notification.logs().len() {
            match self.decode(notification, index) {
                Ok(record) => extraction.transfers.push(record),
                Err(err) => {
                    debug!(webhook_id = %notification.webhook_id, index, %err, "skipping log");
                    extraction.skipped.record(&err);
                }
            }
        }

        extraction
    }
}

fn build_record(
    notification: &Notification,
    log: &LogEntry,
    from: Address,
    to: Address,
    amount: U256,
) -> TransferRecord {
    let block = &notification.event.data.block;
    let tx = &log.transaction;

    // bad transaction metadata does not invalidate the event itself
    let tx_value = hex_to_decimal(&tx.value).unwrap_or_else(|err| {
        warn!(tx_hash = %tx.hash, log_index = log.index, %err, "transaction value reset to 0");
        "0".to_string()
    });

    TransferRecord {
        block: BlockSummary {
            hash: block.hash.clone(),
            number: block.number,
            timestamp: block.timestamp,
        },
        transaction: TransactionSummary {
            hash: tx.hash.clone(),
            from: tx.from_address().to_string(),
            to: tx.to_address().to_string(),
            value: tx_value,
            gas_price: tx.gas_price.clone(),
            gas: tx.gas,
            status: tx.status,
            gas_used: tx.gas_used,
        },
        transfer: TransferSummary {
            contract: log.contract().to_string(),
            from: from.to_checksum(None),
            to: to.to_checksum(None),
            value: TokenAmount::new(amount),
            log_index: log.index,
        },
        network: notification.event.network.clone(),
        alchemy: SourceMetadata {
            webhook_id: notification.webhook_id.clone(),
            event_id: notification.id.clone(),
            sequence_number: notification.event.sequence_number.clone(),
            created_at: notification.created_at_rfc3339(),
        },
    }
}

fn parse_topic(topic: &str) -> Result<B256, ParseError> {
    B256::from_str(topic).map_err(|e| ParseError::Decode(format!("bad topic {topic:?}: {e}")))
}

fn topic_to_address(topic: &str) -> Result<Address, ParseError> {
    // 32-byte word, address right-aligned in the last 20 bytes
    parse_topic(topic).map(Address::from_word)
}

/// Hex quantity to base-10 string. `""` and `"0x"` are zero.
pub fn hex_to_decimal(hex_str: &str) -> Result<String, ParseError> {
    let trimmed = hex_str.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Ok("0".to_string());
    }
    U256::from_str_radix(digits, 16)
        .map(|v| v.to_string())
        .map_err(|e| ParseError::Decode(format!("bad hex value {hex_str:?}: {e}")))
}

/// Document key for a transfer: `{txHash}-{logIndex}`.
///
/// This is also the stored document's public id, so the format is frozen.
pub fn document_id(tx_hash: &str, log_index: u64) -> String {
    format!("{tx_hash}-{log_index}")
}
