//! Timestamp collision removal

use super::ResolveError;
use crate::record::{Record, RecordKey};
use std::collections::HashMap;
use tracing::debug;

/// Make every `(author, timestamp)` key in `records` unique
///
/// Each pass groups records by key in list order and shifts the n-th member
/// of every colliding group by n milliseconds, so the first member keeps its
/// timestamp and later members keep their relative order. Shifts can create
/// new collisions, so passes repeat until none remain or `max_rounds` passes
/// have run. Returns how many records were shifted.
pub fn deduplicate(records: &mut [Record], max_rounds: usize) -> Result<usize, ResolveError> {
    let mut rounds = 0;

    loop {
        let groups = colliding_groups(records);
        if groups.is_empty() {
            break;
        }
        if rounds >= max_rounds {
            return Err(ResolveError::DedupDidNotConverge {
                rounds,
                remaining: groups.iter().map(Vec::len).sum(),
            });
        }

        for group in &groups {
            for (offset, &index) in group.iter().enumerate().skip(1) {
                let record = &mut records[index];
                record.timestamp = record.timestamp.offset(offset as i64);
            }
        }

        rounds += 1;
        debug!(round = rounds, groups = groups.len(), "Deduplication pass");
    }

    Ok(records
        .iter()
        .filter(|r| r.timestamp != r.source_timestamp)
        .count())
}

/// Index lists of records sharing a key, each in list order
fn colliding_groups(records: &[Record]) -> Vec<Vec<usize>> {
    let mut by_key: HashMap<RecordKey, Vec<usize>> = HashMap::new();
    let mut order = Vec::new();
    for (index, record) in records.iter().enumerate() {
        let entry = by_key.entry(record.key()).or_default();
        if entry.is_empty() {
            order.push(record.key());
        }
        entry.push(index);
    }

    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .filter(|group| group.len() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Body, Timestamp};
    use std::collections::HashSet;

    fn record(author: &str, ts: i64, text: &str) -> Record {
        Record {
            author: author.to_string(),
            timestamp: Timestamp(ts),
            source_timestamp: Timestamp(ts),
            channel: "C1".to_string(),
            body: Body::Text(text.to_string()),
            reply_to: None,
            quotes: Vec::new(),
            files: Vec::new(),
            replies: Vec::new(),
            attachments: Vec::new(),
        }
    }

    fn keys(records: &[Record]) -> HashSet<RecordKey> {
        records.iter().map(Record::key).collect()
    }

    #[test]
    fn test_unique_input_is_untouched() {
        let mut records = vec![record("U1", 1, "a"), record("U2", 1, "b"), record("U1", 2, "c")];
        assert_eq!(deduplicate(&mut records, 10).unwrap(), 0);
        assert_eq!(records[0].timestamp, Timestamp(1));
        assert_eq!(records[1].timestamp, Timestamp(1));
    }

    #[test]
    fn test_duplicates_become_unique_in_order() {
        let mut records = vec![
            record("U1", 1000, "first"),
            record("U1", 1000, "second"),
            record("U1", 1000, "third"),
            record("U2", 1000, "other author"),
        ];

        let shifted = deduplicate(&mut records, 10).unwrap();
        assert_eq!(shifted, 2);
        assert_eq!(records.len(), 4);
        assert_eq!(keys(&records).len(), 4);

        let u1: Vec<(i64, &Body)> = records
            .iter()
            .filter(|r| r.author == "U1")
            .map(|r| (r.timestamp.millis(), &r.body))
            .collect();
        assert_eq!(u1[0], (1000, &Body::Text("first".into())));
        assert_eq!(u1[1], (1001, &Body::Text("second".into())));
        assert_eq!(u1[2], (1002, &Body::Text("third".into())));
        assert_eq!(records[3].timestamp, Timestamp(1000));
    }

    #[test]
    fn test_same_key_in_different_channels_collides() {
        let mut general = record("U1", 1000, "general");
        general.channel = "C1".to_string();
        let mut random = record("U1", 1000, "random");
        random.channel = "C2".to_string();
        let mut records = vec![general, random];

        assert_eq!(deduplicate(&mut records, 10).unwrap(), 1);
        assert_eq!(keys(&records).len(), 2);
        assert_eq!(records[0].timestamp, Timestamp(1000));
        assert_eq!(records[1].timestamp, Timestamp(1001));
        assert_eq!(records[1].channel, "C2");
    }

    #[test]
    fn test_cascading_collisions_resolve() {
        // shifting the duplicate at 1000 lands on the existing 1001
        let mut records = vec![
            record("U1", 1000, "a"),
            record("U1", 1000, "b"),
            record("U1", 1001, "c"),
        ];

        deduplicate(&mut records, 10).unwrap();
        assert_eq!(keys(&records).len(), 3);

        let mut by_ts: Vec<&Record> = records.iter().collect();
        by_ts.sort_by_key(|r| r.timestamp);
        let order: Vec<&Body> = by_ts.iter().map(|r| &r.body).collect();
        assert_eq!(order[0], &Body::Text("a".into()));
        assert_eq!(order[1], &Body::Text("b".into()));
    }

    #[test]
    fn test_round_ceiling_fails_loudly() {
        let mut records: Vec<Record> = (0..5).map(|i| record("U1", 0, &i.to_string())).collect();
        records.push(record("U1", 1, "x"));

        let err = deduplicate(&mut records, 1).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::DedupDidNotConverge { rounds: 1, .. }
        ));
    }

    #[test]
    fn test_many_duplicates_converge() {
        let mut records: Vec<Record> = (0..200)
            .map(|i| record(if i % 2 == 0 { "U1" } else { "U2" }, 5000 + (i / 10), "x"))
            .collect();
        records.sort_by_key(|r| r.timestamp);

        deduplicate(&mut records, 10_000).unwrap();
        assert_eq!(records.len(), 200);
        assert_eq!(keys(&records).len(), 200);
    }
}
