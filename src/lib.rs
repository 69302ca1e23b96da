pub mod api;
pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod publisher;
pub mod pubsub;
pub mod signature;

#[cfg(test)]
mod test_support;
