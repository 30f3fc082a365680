// Carteira Rotation - Core Library
// Account eligibility, rotation engine, assignment history and book reports

pub mod config;
pub mod db;
pub mod eligibility;
pub mod entities;
pub mod error;
pub mod feed;
pub mod history;
pub mod pipeline;
pub mod report;
pub mod rotation;

// Re-export commonly used types
pub use config::RotationConfig;
pub use db::{setup_database, SqliteHistoryStore};
pub use eligibility::{cutoff_from, EligibilityFilter, Ineligibility};
pub use entities::{
    apply_overrides, dedupe_accounts, Account, ClassificationRule, Roster, TaxIdRoot, Transfer,
    DEFAULT_CAPACITY,
};
pub use error::{RotationError, RotationResult};
pub use feed::{load_accounts, load_overrides, write_batch, write_reports};
pub use history::{
    AssignmentRecord, CommitStats, HistoryLookup, HistorySnapshot, HistoryStore,
    InMemoryHistoryStore, RunSummary,
};
pub use pipeline::{incomplete_commit_error, CommitReport, RosterOutcome, RotationPipeline, RunOutcome};
pub use report::{
    apply_rotation, file_stem, sheet_label, ReportClassifier, ReportRow, ReportStatus, RepresentativeReport,
};
pub use rotation::{RotatedAccount, RotationBatch, RotationEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
