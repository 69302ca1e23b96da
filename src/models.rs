// src/models.rs
use alloy::primitives::U256;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------- Inbound notification ----------

/// One webhook delivery: a block and the logs matched by the webhook query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub webhook_id: String,
    pub id: String,
    pub created_at: DateTime<FixedOffset>,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    pub event: NotificationEvent,
}

impl Notification {
    pub fn logs(&self) -> &[LogEntry] {
        &self.event.data.block.logs
    }

    /// `createdAt` as RFC 3339 with second precision.
    pub fn created_at_rfc3339(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub data: EventData,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sequence_number: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub network: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub block: BlockData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub hash: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub number: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub topics: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u64,
    #[serde(default)]
    pub account: Option<AccountRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub transaction: LogTransaction,
}

impl LogEntry {
    pub fn contract(&self) -> &str {
        address_of(&self.account)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogTransaction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub hash: String,
    #[serde(default)]
    pub from: Option<AccountRef>,
    // null for contract creations
    #[serde(default)]
    pub to: Option<AccountRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gas_price: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gas: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gas_used: u64,
}

impl LogTransaction {
    pub fn from_address(&self) -> &str {
        address_of(&self.from)
    }

    pub fn to_address(&self) -> &str {
        address_of(&self.to)
    }
}

// missing keys and explicit nulls both read as the zero value
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn address_of(account: &Option<AccountRef>) -> &str {
    account.as_ref().map(|a| a.address.as_str()).unwrap_or_default()
}

// ---------- Token amount ----------

/// An ERC20 amount: 256-bit unsigned in memory, base-10 string on the wire.
///
/// Amounts routinely exceed 2^53, so the wire form is never a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TokenAmount(U256);

impl TokenAmount {
    pub const ZERO: Self = Self(U256::ZERO);

    pub fn new(value: U256) -> Self {
        Self(value)
    }

    pub fn value(&self) -> U256 {
        self.0
    }

    pub fn to_wire(&self) -> String {
        self.0.to_string()
    }

    pub fn from_wire(s: &str) -> Result<Self, String> {
        if s.is_empty() {
            return Err("empty amount".to_string());
        }
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|e| format!("invalid decimal amount {s:?}: {e}"))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenAmount::from_wire(&s).map_err(serde::de::Error::custom)
    }
}

// ---------- Transfer record ----------

/// A decoded ERC20 transfer, as stored and published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub block: BlockSummary,
    pub transaction: TransactionSummary,
    pub transfer: TransferSummary,
    pub network: String,
    pub alchemy: SourceMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub hash: String,
    pub number: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String, // decimal, converted from hex
    pub gas_price: String,
    pub gas: u64,
    pub status: u64,
    pub gas_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub contract: String,
    pub from: String,
    pub to: String,
    pub value: TokenAmount,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    pub webhook_id: String,
    pub event_id: String,
    pub sequence_number: String,
    pub created_at: String,
}
