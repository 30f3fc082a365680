// 📜 Assignment History - append-only ledger
// Answers one question: which representatives have ever held this account?

use crate::entities::TaxIdRoot;
use crate::error::RotationResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub raiz_cnpj: TaxIdRoot,
    pub representative: String,
    pub assigned_on: NaiveDate,
    /// Rotation run that produced the record (UUID v4).
    pub run_id: String,
}

impl AssignmentRecord {
    pub fn new(raiz_cnpj: TaxIdRoot, representative: &str, assigned_on: NaiveDate, run_id: &str) -> Self {
        AssignmentRecord {
            raiz_cnpj,
            representative: representative.to_string(),
            assigned_on,
            run_id: run_id.to_string(),
        }
    }

    /// Idempotency hash: the same placement committed twice is one record.
    /// The run id is deliberately not part of it.
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}",
            self.raiz_cnpj, self.representative, self.assigned_on
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Outcome of one commit attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Summary stored when a run releases the lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rotated: usize,
    pub leftover: usize,
    pub committed: usize,
    pub complete: bool,
}

// ============================================================================
// LOOKUP (what the engine needs)
// ============================================================================

/// Read-only, infallible view of history used by the rotation engine.
pub trait HistoryLookup {
    fn has_held(&self, root: &TaxIdRoot, representative: &str) -> bool;
}

/// History materialized for a set of roots before the engine runs.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    holders: HashMap<TaxIdRoot, BTreeSet<String>>,
}

impl HistorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, root: TaxIdRoot, representative: &str) {
        self.holders
            .entry(root)
            .or_default()
            .insert(representative.to_string());
    }

    pub fn holders(&self, root: &TaxIdRoot) -> Option<&BTreeSet<String>> {
        self.holders.get(root)
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

impl HistoryLookup for HistorySnapshot {
    fn has_held(&self, root: &TaxIdRoot, representative: &str) -> bool {
        self.holders
            .get(root)
            .map_or(false, |reps| reps.contains(representative))
    }
}

// ============================================================================
// STORE (durable side)
// ============================================================================

pub trait HistoryStore {
    /// Append one record. Returns false when an identical record exists.
    fn record(&mut self, record: &AssignmentRecord) -> RotationResult<bool>;

    /// Every representative ever recorded against `root`.
    fn history_for(&self, root: &TaxIdRoot) -> RotationResult<BTreeSet<String>>;

    /// All records for `root`, oldest first.
    fn records_for(&self, root: &TaxIdRoot) -> RotationResult<Vec<AssignmentRecord>>;

    /// Append a batch. Stores that support it make this all-or-nothing.
    fn record_batch(&mut self, records: &[AssignmentRecord]) -> RotationResult<CommitStats> {
        let mut stats = CommitStats::default();
        for record in records {
            if self.record(record)? {
                stats.inserted += 1;
            } else {
                stats.duplicates += 1;
            }
        }
        Ok(stats)
    }

    fn snapshot<'a, I>(&self, roots: I) -> RotationResult<HistorySnapshot>
    where
        I: IntoIterator<Item = &'a TaxIdRoot>,
        Self: Sized,
    {
        let mut snapshot = HistorySnapshot::new();
        for root in roots {
            for rep in self.history_for(root)? {
                snapshot.insert(root.clone(), &rep);
            }
        }
        Ok(snapshot)
    }

    /// Take the run lock. Stores without concurrent writers need not guard.
    fn begin_run(&mut self, _run_id: &str) -> RotationResult<()> {
        Ok(())
    }

    /// Release the run lock and keep the summary.
    fn finish_run(&mut self, _summary: &RunSummary) -> RotationResult<()> {
        Ok(())
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: Vec<AssignmentRecord>,
    hashes: HashSet<String>,
    runs: Vec<RunSummary>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn runs(&self) -> &[RunSummary] {
        &self.runs
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn record(&mut self, record: &AssignmentRecord) -> RotationResult<bool> {
        if !self.hashes.insert(record.compute_idempotency_hash()) {
            return Ok(false);
        }
        self.records.push(record.clone());
        Ok(true)
    }

    fn history_for(&self, root: &TaxIdRoot) -> RotationResult<BTreeSet<String>> {
        Ok(self
            .records
            .iter()
            .filter(|r| &r.raiz_cnpj == root)
            .map(|r| r.representative.clone())
            .collect())
    }

    fn records_for(&self, root: &TaxIdRoot) -> RotationResult<Vec<AssignmentRecord>> {
        let mut records: Vec<AssignmentRecord> = self
            .records
            .iter()
            .filter(|r| &r.raiz_cnpj == root)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.assigned_on);
        Ok(records)
    }

    fn finish_run(&mut self, summary: &RunSummary) -> RotationResult<()> {
        self.runs.push(summary.clone());
        Ok(())
    }
}

impl HistoryLookup for InMemoryHistoryStore {
    fn has_held(&self, root: &TaxIdRoot, representative: &str) -> bool {
        self.records
            .iter()
            .any(|r| &r.raiz_cnpj == root && r.representative == representative)
    }
}

// ============================================================================
// TESTS
// ============================================================================
