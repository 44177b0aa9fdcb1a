//! chatport - move a chat workspace export into Teams channels
//!
//! Reads an unpacked export, turns every message into a channel message
//! creation call against the Graph import API and drains those calls at a
//! controlled pace, keeping all progress in crash-safe files so an
//! interrupted run resumes where it stopped.
//!
//! # Architecture
//!
//! - **record**: Normalized message records and their `(author, timestamp)` keys
//! - **resolve**: Deduplication, reply linking, quote synthesis, reference table
//! - **convert**: Block tree to HTML body, mentions and attachments
//! - **mappings**: Source-to-destination identity, channel and file lookups
//! - **queue**: Durable FIFO queues with atomic snapshots
//! - **transport**: Authenticated, retrying calls to the destination API
//! - **dispatch**: Paced, bounded-concurrency draining of queues
//! - **shutdown**: Close-then-flush of every durable component on exit
//! - **migrate**: The plan, dispatch and finish phases

pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod mappings;
pub mod metrics;
pub mod migrate;
pub mod queue;
pub mod record;
pub mod resolve;
pub mod shutdown;
pub mod transport;

// Re-exports
pub use error::{MigrateError, Result};
