use alloy::primitives::U256;
use serde_json::{json, Value};

use crate::models::{
    BlockSummary, Notification, SourceMetadata, TokenAmount, TransactionSummary, TransferRecord,
    TransferSummary,
};

pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub fn address_topic(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x").to_lowercase())
}

pub fn amount_data(value: u128) -> String {
    format!("0x{value:064x}")
}

pub fn transfer_log(index: u64, tx_hash: &str, from: &str, to: &str, value: u128) -> Value {
    json!({
        "data": amount_data(value),
        "topics": [TRANSFER_TOPIC, address_topic(from), address_topic(to)],
        "index": index,
        "account": { "address": "0xtoken" },
        "transaction": {
            "hash": tx_hash,
            "from": { "address": from },
            "to": { "address": "0xtoken" },
            "value": "0xff",
            "gasPrice": "0x3b9aca00",
            "gas": 60000,
            "status": 1,
            "gasUsed": 51000
        }
    })
}

pub fn notification(logs: Vec<Value>) -> Notification {
    serde_json::from_value(json!({
        "webhookId": "wh_test",
        "id": "whevt_test",
        "createdAt": "2024-06-01T08:00:00.000Z",
        "type": "GRAPHQL",
        "event": {
            "sequenceNumber": "10000000000000000000000",
            "network": "ETH_MAINNET",
            "data": { "block": {
                "hash": "0xblock",
                "number": 19_000_000u64,
                "timestamp": 1_717_228_800u64,
                "logs": logs
            }}
        }
    }))
    .expect("fixture notification")
}

/// `count` distinct records, log indexes `0..count` within one transaction.
pub fn records(count: usize) -> Vec<TransferRecord> {
    (0..count).map(|i| record("0xfeed", i as u64, i as u64 + 1)).collect()
}

pub fn record(tx_hash: &str, log_index: u64, amount: u64) -> TransferRecord {
    TransferRecord {
        block: BlockSummary {
            hash: "0xblock".to_string(),
            number: 1,
            timestamp: 2,
        },
        transaction: TransactionSummary {
            hash: tx_hash.to_string(),
            from: "0xfrom".to_string(),
            to: "0xto".to_string(),
            value: "0".to_string(),
            gas_price: "0x1".to_string(),
            gas: 21000,
            status: 1,
            gas_used: 21000,
        },
        transfer: TransferSummary {
            contract: "0xtoken".to_string(),
            from: "0xfrom".to_string(),
            to: "0xto".to_string(),
            value: TokenAmount::new(U256::from(amount)),
            log_index,
        },
        network: "ETH_MAINNET".to_string(),
        alchemy: SourceMetadata {
            webhook_id: "wh_test".to_string(),
            event_id: "whevt_test".to_string(),
            sequence_number: "1".to_string(),
            created_at: "2024-06-01T08:00:00Z".to_string(),
        },
    }
}
