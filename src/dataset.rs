//! Dataset loader: groups application records by a key field and feeds
//! them into the ring through plain store exchanges. The loader never
//! touches ring internals; it speaks only `store` (and callers use
//! `lookup`) like any other external client.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::net::client;
use crate::ring::{key_for, ChordKey};
use crate::utils::CarillonError;

/// One dataset record: a person, their award count (absent when the
/// scrape found none), and the institution the record groups under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub name: String,
    pub awards: Option<u32>,
    pub institution: String,
}

/// Reads JSON-lines records from `path`, skipping blank lines.
pub fn load_records(path: &Path) -> Result<Vec<PersonRecord>, CarillonError> {
    let text = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}

/// Groups records by institution, the field that places them on the ring.
pub fn group_by_institution(
    records: Vec<PersonRecord>,
) -> HashMap<String, Vec<PersonRecord>> {
    let mut groups: HashMap<String, Vec<PersonRecord>> = HashMap::new();
    for record in records {
        groups
            .entry(record.institution.clone())
            .or_default()
            .push(record);
    }
    groups
}

/// Ring coordinate of a group key.
pub fn chord_key_for(group: &str) -> ChordKey {
    key_for(group)
}

/// Data keys travel as bare tokens on propagate_lookup command lines, so
/// whitespace is slugged out of them.
pub fn data_key_for(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Feeds every record into the ring via the given entry node, which routes
/// each store to its holder. Returns the number of values stored.
pub async fn feed(
    host: &str,
    port: u16,
    records: Vec<PersonRecord>,
    dur: Duration,
) -> Result<usize, CarillonError> {
    let mut stored = 0;
    for (institution, group) in group_by_institution(records) {
        let chord_key = chord_key_for(&institution);
        for record in group {
            let data_key = data_key_for(&record.name);
            let value = serde_json::to_string(&record)?;
            client::send_store(
                host, port, "store", chord_key, &data_key, &value, dur,
            )
            .await?;
            stored += 1;
        }
    }
    Ok(stored)
}

#[cfg(test)]
mod dataset_tests {
    use super::*;

    fn sample() -> Vec<PersonRecord> {
        vec![
            PersonRecord {
                name: "Ada Lovelace".into(),
                awards: Some(2),
                institution: "University of London".into(),
            },
            PersonRecord {
                name: "Alan Turing".into(),
                awards: Some(3),
                institution: "University of Manchester".into(),
            },
            PersonRecord {
                name: "Tom Kilburn".into(),
                awards: None,
                institution: "University of Manchester".into(),
            },
        ]
    }

    #[test]
    fn records_parse_from_json_lines() -> Result<(), CarillonError> {
        let path = std::env::temp_dir().join("carillon_loader_test.jsonl");
        let text = concat!(
            "{\"name\": \"Ada Lovelace\", \"awards\": 2, ",
            "\"institution\": \"University of London\"}\n",
            "\n",
            "{\"name\": \"Tom Kilburn\", \"awards\": null, ",
            "\"institution\": \"University of Manchester\"}\n",
        );
        fs::write(&path, text)?;
        let records = load_records(&path)?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Ada Lovelace");
        assert_eq!(records[1].awards, None);
        fs::remove_file(&path)?;
        Ok(())
    }

    #[test]
    fn grouping_splits_by_institution() {
        let groups = group_by_institution(sample());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["University of Manchester"].len(), 2);
        assert_eq!(groups["University of London"].len(), 1);
    }

    #[test]
    fn data_keys_are_single_tokens() {
        assert_eq!(data_key_for("Alan Turing"), "Alan_Turing");
        assert_eq!(data_key_for("  Grace   Hopper "), "Grace_Hopper");
        assert!(!data_key_for("Edsger W. Dijkstra").contains(' '));
    }

    #[test]
    fn chord_keys_are_stable() {
        assert_eq!(
            chord_key_for("University of Manchester"),
            chord_key_for("University of Manchester")
        );
        assert_ne!(chord_key_for("MIT"), chord_key_for("ETH"));
    }
}
