//! Record preparation
//!
//! Turns exported messages into records ready for conversion:
//!
//! 1. Normalize every timestamp to integer milliseconds
//! 2. Deduplicate colliding `(author, timestamp)` keys
//! 3. Stamp thread replies with their parent's key
//! 4. Synthesize quoted records from shared-message attachments
//!
//! Destination ids of migrated records are kept in the [`ReferenceTable`].

mod dedup;
mod reference_table;

pub use dedup::deduplicate;
pub use reference_table::ReferenceTable;

use crate::record::{Quote, Record, RecordKey, Timestamp};
use blockkit::{Attachment, Message};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Preparation failures
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Key collisions remained after the allowed number of passes
    #[error("Deduplication did not converge after {rounds} rounds ({remaining} keys still collide)")]
    DedupDidNotConverge { rounds: usize, remaining: usize },

    /// The reference table on disk could not be read
    #[error("Reference table {path} is unreadable: {reason}")]
    CorruptReferences { path: String, reason: String },
}

/// Options for [`prepare`]
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub max_dedup_rounds: usize,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            max_dedup_rounds: 10_000,
        }
    }
}

/// Output of [`prepare`]
#[derive(Debug, Default)]
pub struct Prepared {
    /// Records in timestamp order
    pub records: Vec<Record>,
    /// Messages dropped because they could not be normalized
    pub skipped: usize,
    /// Records whose timestamp was shifted to make keys unique
    pub restamped: usize,
}

/// Normalize, deduplicate and link the messages of every given channel
///
/// Keys are made unique across all channels together, since destination ids
/// are recorded in one table for the whole run. Replies are only linked to a
/// parent in their own channel.
pub fn prepare<'a, I>(channels: I, options: &PrepareOptions) -> Result<Prepared, ResolveError>
where
    I: IntoIterator<Item = (&'a str, &'a [Message])>,
{
    let mut skipped = 0;
    let mut records: Vec<Record> = Vec::new();
    for (channel, messages) in channels {
        for message in messages {
            match Record::from_message(message, channel) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(channel, error = %e, "Skipping message that cannot be normalized");
                    skipped += 1;
                }
            }
        }
    }

    records.sort_by_key(|r| r.timestamp);
    let restamped = deduplicate(&mut records, options.max_dedup_rounds)?;
    for (source, timestamp) in restamped_keys(&records) {
        debug!(key = %source, to = timestamp.millis(), "Restamped colliding record");
    }
    link_replies(&mut records);
    for record in &mut records {
        attach_quotes(record);
    }
    records.sort_by_key(|r| r.timestamp);

    info!(
        records = records.len(),
        skipped,
        restamped,
        "Prepared records"
    );

    Ok(Prepared {
        records,
        skipped,
        restamped,
    })
}

/// Stamp each reply listed by a thread parent with the parent's key
///
/// Reply lists refer to source timestamps; the parent key written is the
/// deduplicated one. Only records of the parent's channel are candidates, and
/// when several of them share a source key the first wins.
pub fn link_replies(records: &mut [Record]) {
    let mut by_source: HashMap<(String, RecordKey), usize> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        by_source
            .entry((record.channel.clone(), record.source_key()))
            .or_insert(index);
    }

    let links: Vec<(usize, RecordKey)> = records
        .iter()
        .flat_map(|parent| {
            let parent_key = parent.key();
            parent
                .replies
                .iter()
                .filter_map(|reply| {
                    by_source
                        .get(&(parent.channel.clone(), reply.clone()))
                        .copied()
                })
                .map(move |index| (index, parent_key.clone()))
                .collect::<Vec<_>>()
        })
        .collect();

    for (index, parent_key) in links {
        let reply = &mut records[index];
        if reply.key() == parent_key {
            continue;
        }
        debug!(reply = %reply.key(), parent = %parent_key, "Linked reply");
        reply.reply_to = Some(parent_key);
    }
}

/// Move shared-message attachments of `record` into its quotes
///
/// Attachments that do not reference a message are dropped. A reference whose
/// content was not exported becomes a quote without a record.
pub fn attach_quotes(record: &mut Record) {
    let attachments = std::mem::take(&mut record.attachments);
    for attachment in attachments.iter().filter(|a| a.is_message_ref()) {
        record.quotes.push(synthesize_quote(attachment, &record.channel));
    }
}

fn synthesize_quote(attachment: &Attachment, channel: &str) -> Quote {
    let author_name = attachment
        .author_name
        .clone()
        .unwrap_or_else(|| "Unknown".to_string());

    let record = attachment.shared_message().and_then(|shared| {
        let mut message = shared.clone();
        message.user = attachment.author_id.clone().or(message.user);
        message.ts = attachment.ts.clone();

        let mut quoted = match Record::from_message(&message, channel) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Quoted message has an invalid timestamp");
                let mut fallback_message = message;
                fallback_message.ts = blockkit::Ts::new("0");
                Record::from_message(&fallback_message, channel).ok()?
            }
        };
        attach_quotes(&mut quoted);
        Some(Box::new(quoted))
    });

    Quote {
        author_name,
        record,
    }
}

/// Source keys of records moved by deduplication, with their new timestamps
fn restamped_keys(records: &[Record]) -> Vec<(RecordKey, Timestamp)> {
    records
        .iter()
        .filter(|r| r.timestamp != r.source_timestamp)
        .map(|r| (r.source_key(), r.timestamp))
        .collect()
}
