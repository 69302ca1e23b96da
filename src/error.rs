use thiserror::Error;

/// Why a single log entry did not produce a transfer record.
///
/// These never fail a request: the extractor counts them and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("log index {index} out of range ({len} logs)")]
    OutOfRange { index: usize, len: usize },
    #[error("not a transfer event: {0}")]
    MalformedEvent(String),
    #[error("failed to decode transfer event: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("invalid event signature: {0}")]
    Parse(String),
    #[error("event does not have the transfer shape: {0}")]
    Shape(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store task did not complete: {0}")]
    Task(String),
    #[error("transaction aborted before commit")]
    Aborted,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("publish failed: {0}")]
    Transport(String),
}

/// Failures of the side-effecting stages. All of them are surfaced to the
/// caller; none are retried here.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("group {group} failed after {committed} committed groups: {source}")]
    Persistence {
        group: usize,
        committed: usize,
        #[source]
        source: StoreError,
    },
    #[error("failed to publish transfers: {0}")]
    Publish(#[from] QueueError),
    #[error("operation cancelled")]
    Cancelled,
}
