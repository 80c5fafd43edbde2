// src/provenance/mod.rs

//! Commit journal and state fingerprints.
//!
//! The journal is an opt-in, hash-chained list of every committed edit. A
//! snapshot captures the committed state so two points of a run can be
//! compared by their SHA-256 fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::DetManip;
use crate::kernel::{Kernel, Matrix};
use crate::DetManipError;

/// One committed edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    /// Matrix dimension after the commit.
    pub size: usize,
    pub ratio: String,
    /// Determinant after the commit.
    pub determinant: String,
    pub previous_record_hash: Option<String>,
}

impl JournalRecord {
    /// Hash of this record, used as the link from the next one.
    pub fn record_hash(&self) -> String {
        let canonical = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.sequence,
            self.timestamp.to_rfc3339(),
            self.operation,
            self.size,
            self.ratio,
            self.determinant,
            self.previous_record_hash.as_deref().unwrap_or("")
        );
        calculate_hash(canonical.as_bytes())
    }
}

/// Calculates the SHA256 hash of a byte slice.
fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash-chained list of commits.
#[derive(Debug, Clone, Default)]
pub struct CommitJournal {
    records: Vec<JournalRecord>,
    next_sequence: u64,
}

impl CommitJournal {
    pub fn new() -> Self {
        CommitJournal::default()
    }

    /// Appends a record linked to the previous one.
    pub fn record(&mut self, operation: &str, size: usize, ratio: String, determinant: String) {
        let previous_record_hash = self.records.last().map(JournalRecord::record_hash);
        self.records.push(JournalRecord {
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            operation: operation.to_string(),
            size,
            ratio,
            determinant,
            previous_record_hash,
        });
        self.next_sequence += 1;
    }

    pub fn records(&self) -> &[JournalRecord] {
        &self.records
    }

    /// `true` when every record links to its predecessor and the sequence
    /// numbers increase by one.
    pub fn verify_chain(&self) -> bool {
        let mut previous: Option<&JournalRecord> = None;
        for record in &self.records {
            let linked = match previous {
                None => true,
                Some(p) => {
                    record.previous_record_hash.as_deref() == Some(p.record_hash().as_str())
                        && record.sequence == p.sequence + 1
                }
            };
            if !linked {
                return false;
            }
            previous = Some(record);
        }
        true
    }

    /// Serializes the records to a JSON string.
    pub fn to_json(&self) -> Result<String, DetManipError> {
        serde_json::to_string_pretty(&self.records)
            .map_err(|e| DetManipError::Serialization(format!("Failed to serialize commit journal: {}", e)))
    }

    /// Restores a journal; new records continue its sequence.
    pub fn from_json(json_str: &str) -> Result<Self, DetManipError> {
        let records: Vec<JournalRecord> = serde_json::from_str(json_str)
            .map_err(|e| DetManipError::Serialization(format!("Failed to deserialize commit journal: {}", e)))?;
        let next_sequence = records.last().map_or(0, |r| r.sequence + 1);
        Ok(CommitJournal { records, next_sequence })
    }

    /// Removes all records, leaving the sequence counter running.
    pub fn drain(&mut self) -> Vec<JournalRecord> {
        std::mem::take(&mut self.records)
    }
}

/// The committed state in logical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<X, Y, T: nalgebra::Scalar> {
    pub size: usize,
    pub row_args: Vec<X>,
    pub col_args: Vec<Y>,
    pub inverse: Matrix<T>,
    pub determinant: T,
}

impl<X: Serialize, Y: Serialize, T: nalgebra::Scalar + Serialize> Snapshot<X, Y, T> {
    /// SHA-256 of the snapshot's JSON form.
    pub fn fingerprint(&self) -> Result<String, DetManipError> {
        let serialized = serde_json::to_string(self)
            .map_err(|e| DetManipError::Serialization(format!("Failed to serialize snapshot: {}", e)))?;
        Ok(calculate_hash(serialized.as_bytes()))
    }
}

impl<X, Y, K> DetManip<X, Y, K>
where
    X: Clone + Serialize,
    Y: Clone + Serialize,
    K: Kernel<X, Y>,
    K::Scalar: Serialize,
{
    /// Copies the committed state. O(N²).
    pub fn snapshot(&self) -> Snapshot<X, Y, K::Scalar> {
        Snapshot {
            size: self.size(),
            row_args: self.row_args().cloned().collect(),
            col_args: self.col_args().cloned().collect(),
            inverse: self.inverse_matrix(),
            determinant: self.determinant(),
        }
    }

    /// Fingerprint of the committed state.
    pub fn fingerprint(&self) -> Result<String, DetManipError> {
        self.snapshot().fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::PropagatorKernel;

    fn journal_with(n: usize) -> CommitJournal {
        let mut journal = CommitJournal::new();
        for k in 0..n {
            journal.record("insert", k + 1, format!("{}", 0.5 * k as f64), format!("{}", k as f64));
        }
        journal
    }

    #[test]
    fn test_journal_linking() {
        let journal = journal_with(3);
        let records = journal.records();
        assert!(records[0].previous_record_hash.is_none());
        assert_eq!(records[1].previous_record_hash, Some(records[0].record_hash()));
        assert_eq!(records[2].previous_record_hash, Some(records[1].record_hash()));
        assert_eq!(records[2].sequence, 2);
        assert!(journal.verify_chain());
    }

    #[test]
    fn test_tampered_journal_fails_verification() {
        let journal = journal_with(3);
        let mut records = journal.records().to_vec();
        records[1].ratio = "42".to_string();
        let json = serde_json::to_string(&records).unwrap();
        let tampered = CommitJournal::from_json(&json).unwrap();
        assert!(!tampered.verify_chain());
    }

    #[test]
    fn test_journal_serialization() {
        let journal = journal_with(2);
        let json_output = journal.to_json().unwrap();
        let mut restored = CommitJournal::from_json(&json_output).unwrap();
        assert_eq!(restored.records(), journal.records());
        assert!(restored.verify_chain());

        restored.record("remove", 1, "1".to_string(), "1".to_string());
        assert_eq!(restored.records()[2].sequence, 2);
        assert!(restored.verify_chain());

        assert_eq!(restored.drain().len(), 3);
        assert!(restored.records().is_empty());
        assert!(CommitJournal::from_json("{").is_err());
    }

    #[test]
    fn test_fingerprint_tracks_committed_state() {
        let mut engine = DetManip::new(PropagatorKernel::default(), 4);
        engine.insert(0, 0, 1.0, 2.0).unwrap();
        engine.insert(1, 0, 3.5, 0.5).unwrap();
        let before = engine.fingerprint().unwrap();

        engine.try_change_row(0, 6.0).unwrap();
        assert_eq!(engine.fingerprint().unwrap(), before);
        engine.reject_last_try();
        assert_eq!(engine.fingerprint().unwrap(), before);

        engine.change_row(0, 6.0).unwrap();
        assert_ne!(engine.fingerprint().unwrap(), before);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.size, 2);
        assert_eq!(snapshot.row_args, vec![6.0, 3.5]);
        assert_eq!(snapshot.col_args, vec![0.5, 2.0]);
    }
}
