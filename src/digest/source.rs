//! File-backed [`super::DigestSource`]: events come from a CSV event log,
//! written digests are tracked in a small JSON ledger under the same state
//! directory, both read/written with this codebase's atomic-write idiom
//! (write to `.tmp`, then `rename`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{DigestError, DigestEvent, DigestSource};

/// One row of the CSV event log the digest pipeline reads from.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct EventRow {
    date: String,
    conversation_id: String,
    event_type: String,
    payload_hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WrittenLedger {
    /// digest_key -> parameters last written for it.
    entries: HashMap<String, serde_json::Value>,
}

/// Reads events from a CSV file and tracks written digest keys in a JSON
/// ledger, both rooted at a state directory.
pub struct FileDigestSource {
    events_csv: PathBuf,
    ledger_path: PathBuf,
    ledger: RwLock<WrittenLedger>,
}

impl FileDigestSource {
    /// Open a source rooted at `state_dir`, reading events from
    /// `state_dir/events.csv` and tracking written keys in
    /// `state_dir/digest_written.json`. Missing files are treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger file exists but holds malformed JSON.
    pub fn open(state_dir: &Path) -> Result<Self, DigestError> {
        let ledger_path = state_dir.join("digest_written.json");
        let ledger = load_ledger(&ledger_path)?;
        Ok(Self {
            events_csv: state_dir.join("events.csv"),
            ledger_path,
            ledger: RwLock::new(ledger),
        })
    }

    fn persist_ledger(&self) -> Result<(), DigestError> {
        let ledger = self.ledger.read().expect("ledger lock poisoned");
        let json = serde_json::to_string_pretty(&*ledger)?;
        let tmp_path = self.ledger_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.ledger_path)?;
        Ok(())
    }
}

fn load_ledger(path: &Path) -> Result<WrittenLedger, DigestError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WrittenLedger::default()),
        Err(e) => Err(DigestError::Io(e)),
    }
}

impl DigestSource for FileDigestSource {
    fn events_on(&self, date: NaiveDate) -> Vec<DigestEvent> {
        let Ok(mut reader) = csv::Reader::from_path(&self.events_csv) else {
            return Vec::new();
        };
        let date_str = date.format("%Y-%m-%d").to_string();
        reader
            .deserialize::<EventRow>()
            .filter_map(Result::ok)
            .filter(|row| row.date == date_str)
            .map(|row| DigestEvent {
                conversation_id: row.conversation_id,
                event_type: row.event_type,
                payload_hash: row.payload_hash,
            })
            .collect()
    }

    fn exists(&self, digest_key: &str) -> bool {
        self.ledger
            .read()
            .expect("ledger lock poisoned")
            .entries
            .contains_key(digest_key)
    }

    fn write_digest(&self, digest_key: &str, parameters: serde_json::Value) -> Result<(), DigestError> {
        {
            let mut ledger = self.ledger.write().expect("ledger lock poisoned");
            ledger.entries.insert(digest_key.to_owned(), parameters);
        }
        self.persist_ledger()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_events_csv(dir: &Path, rows: &[(&str, &str, &str, &str)]) {
        let mut writer = csv::Writer::from_path(dir.join("events.csv")).unwrap();
        writer.write_record(["date", "conversation_id", "event_type", "payload_hash"]).unwrap();
        for (date, conv, event_type, hash) in rows {
            writer.write_record([date, conv, event_type, hash]).unwrap();
        }
        writer.flush().unwrap();
    }

    #[test]
    fn events_on_filters_by_date() {
        let dir = tempfile::tempdir().unwrap();
        write_events_csv(
            dir.path(),
            &[
                ("2026-03-05", "conv-a", "message", "hash1"),
                ("2026-03-06", "conv-b", "message", "hash2"),
            ],
        );
        let source = FileDigestSource::open(dir.path()).unwrap();
        let events = source.events_on(NaiveDate::from_ymd_opt(2026, 3, 5).unwrap());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].conversation_id, "conv-a");
    }

    #[test]
    fn missing_csv_yields_no_events() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileDigestSource::open(dir.path()).unwrap();
        assert!(source.events_on(NaiveDate::from_ymd_opt(2026, 3, 5).unwrap()).is_empty());
    }

    #[test]
    fn write_then_exists_round_trips_and_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileDigestSource::open(dir.path()).unwrap();
        assert!(!source.exists("abc123"));
        source.write_digest("abc123", serde_json::json!({"cycle": "daily"})).unwrap();
        assert!(source.exists("abc123"));

        let reopened = FileDigestSource::open(dir.path()).unwrap();
        assert!(reopened.exists("abc123"));
    }
}
