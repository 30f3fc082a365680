// 🚚 Rotation Run - one batch, end to end
//
//   feed → dedupe → overrides → eligibility (per roster) → engine
//        → commit to history (retried) → reports
//
// Every run returns an explicit RunOutcome; nothing is cached between runs.

use crate::config::RotationConfig;
use crate::eligibility::{cutoff_from, EligibilityFilter};
use crate::entities::{apply_overrides, dedupe_accounts, Account, TaxIdRoot, Transfer};
use crate::error::{RotationError, RotationResult};
use crate::history::{AssignmentRecord, CommitStats, HistoryStore, RunSummary};
use crate::report::{apply_rotation, ReportClassifier, RepresentativeReport};
use crate::rotation::{RotationBatch, RotationEngine};
use chrono::{NaiveDate, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterOutcome {
    pub roster: String,
    pub eligible: usize,
    pub rotated: usize,
    pub leftover: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub attempts: u32,
    pub stats: CommitStats,
    /// Records that never reached the store.
    pub failed: usize,
    pub last_error: Option<String>,
}

impl CommitReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub cutoff: NaiveDate,
    /// Deduplicated feed with overrides applied, before rotation.
    pub previous: Vec<Account>,
    pub batch: RotationBatch,
    pub rosters: Vec<RosterOutcome>,
    pub commit: CommitReport,
    pub reports: Vec<RepresentativeReport>,
    pub overrides_applied: usize,
}

impl RunOutcome {
    /// Rotation computed AND durably recorded.
    pub fn is_complete(&self) -> bool {
        self.commit.is_complete()
    }

    /// Full book after rotation.
    pub fn current(&self) -> Vec<Account> {
        apply_rotation(&self.previous, &self.batch)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct RotationPipeline {
    pub config: RotationConfig,
    /// Pause between commit attempts; multiplied by the attempt number.
    pub retry_backoff: Duration,
    /// Entry date for transfers that carry none. Defaults to the run date.
    pub transfer_date: Option<NaiveDate>,
}

impl RotationPipeline {
    pub fn new(config: RotationConfig) -> Self {
        RotationPipeline {
            config,
            retry_backoff: Duration::from_millis(250),
            transfer_date: None,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_transfer_date(mut self, date: NaiveDate) -> Self {
        self.transfer_date = Some(date);
        self
    }

    /// Eligible accounts per roster, in roster order. An account accepted by
    /// an earlier roster is not offered to later ones.
    pub fn eligible_by_roster(&self, accounts: &[Account], cutoff: NaiveDate) -> Vec<Vec<Account>> {
        let mut claimed: HashSet<TaxIdRoot> = HashSet::new();

        self.config
            .rosters
            .iter()
            .map(|roster| {
                let filter = EligibilityFilter::new(cutoff, &roster.classification);
                filter
                    .filter(accounts)
                    .into_iter()
                    .filter(|a| claimed.insert(a.raiz_cnpj.clone()))
                    .collect()
            })
            .collect()
    }

    pub fn run<S, R>(
        &self,
        store: &mut S,
        rng: &mut R,
        feed: Vec<Account>,
        overrides: &HashMap<TaxIdRoot, Transfer>,
        run_date: NaiveDate,
    ) -> RotationResult<RunOutcome>
    where
        S: HistoryStore,
        R: Rng + ?Sized,
    {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let cutoff = cutoff_from(run_date, self.config.cutoff_days);

        let span = tracing::info_span!("rotation_run", run_id = %run_id, run_date = %run_date);
        let _enter = span.enter();

        let raw_rows = feed.len();
        let mut previous = dedupe_accounts(feed);
        let transfer_date = self.transfer_date.unwrap_or(run_date);
        let overrides_applied = apply_overrides(&mut previous, overrides, transfer_date);
        tracing::info!(
            raw_rows,
            accounts = previous.len(),
            overrides_applied,
            cutoff = %cutoff,
            "feed prepared"
        );

        store.begin_run(&run_id)?;

        let rotation = self.rotate_all(store, rng, &previous, cutoff, run_date);
        let (batch, rosters) = match rotation {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(error = %err, "rotation aborted before commit");
                let summary = RunSummary {
                    run_id: run_id.clone(),
                    started_at,
                    finished_at: Utc::now(),
                    rotated: 0,
                    leftover: 0,
                    committed: 0,
                    complete: false,
                };
                if let Err(release) = store.finish_run(&summary) {
                    tracing::error!(error = %release, "failed to release run lock");
                }
                return Err(err);
            }
        };

        let records = batch.assignments(&run_id);
        let commit = self.commit(store, &records);

        let classifier = ReportClassifier::new(cutoff, run_date)
            .with_recent_window(self.config.recent_window_months);
        let current = apply_rotation(&previous, &batch);
        let reports = classifier.build_reports(&self.config.all_members(), &current, &previous);

        let summary = RunSummary {
            run_id: run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            rotated: batch.rotated.len(),
            leftover: batch.leftover.len(),
            committed: commit.stats.inserted + commit.stats.duplicates,
            complete: commit.is_complete(),
        };
        if let Err(err) = store.finish_run(&summary) {
            // Assignments are already durable; only the run log and lock are affected
            tracing::error!(error = %err, "failed to record run summary; run lock may need `unlock`");
        }

        if commit.is_complete() {
            tracing::info!(
                rotated = batch.rotated.len(),
                leftover = batch.leftover.len(),
                "rotation committed"
            );
        } else {
            tracing::error!(
                failed = commit.failed,
                last_error = commit.last_error.as_deref().unwrap_or(""),
                "rotation computed but NOT committed to history"
            );
        }

        Ok(RunOutcome {
            run_id,
            run_date,
            cutoff,
            previous,
            batch,
            rosters,
            commit,
            reports,
            overrides_applied,
        })
    }

    fn rotate_all<S, R>(
        &self,
        store: &S,
        rng: &mut R,
        accounts: &[Account],
        cutoff: NaiveDate,
        run_date: NaiveDate,
    ) -> RotationResult<(RotationBatch, Vec<RosterOutcome>)>
    where
        S: HistoryStore,
        R: Rng + ?Sized,
    {
        let mut batch = RotationBatch::default();
        let mut outcomes = Vec::with_capacity(self.config.rosters.len());

        let eligible = self.eligible_by_roster(accounts, cutoff);

        for (roster, pool) in self.config.rosters.iter().zip(eligible) {
            let mut history = store.snapshot(pool.iter().map(|a| &a.raiz_cnpj))?;

            // The book itself is history: the current owner has held the account
            for account in &pool {
                history.insert(account.raiz_cnpj.clone(), &account.nome_vendedor);
            }

            let engine = RotationEngine::new(roster.capacity);
            let roster_batch = engine.rotate(&pool, &roster.active_members(), &history, rng, run_date);

            tracing::info!(
                roster = %roster.name,
                eligible = pool.len(),
                rotated = roster_batch.rotated.len(),
                leftover = roster_batch.leftover.len(),
                "roster rotated"
            );

            outcomes.push(RosterOutcome {
                roster: roster.name.clone(),
                eligible: pool.len(),
                rotated: roster_batch.rotated.len(),
                leftover: roster_batch.leftover.len(),
            });
            batch.merge(roster_batch);
        }

        Ok((batch, outcomes))
    }

    /// Commit with bounded retries. Retrying is safe: identical records are
    /// deduplicated by the store.
    pub fn commit<S: HistoryStore>(&self, store: &mut S, records: &[AssignmentRecord]) -> CommitReport {
        let mut report = CommitReport::default();

        if records.is_empty() {
            return report;
        }

        let max_attempts = self.config.commit_retries + 1;

        while report.attempts < max_attempts {
            report.attempts += 1;

            match store.record_batch(records) {
                Ok(stats) => {
                    report.stats = stats;
                    report.failed = 0;
                    report.last_error = None;
                    return report;
                }
                Err(err) => {
                    tracing::warn!(
                        attempt = report.attempts,
                        max_attempts,
                        error = %err,
                        "history commit failed"
                    );
                    report.last_error = Some(err.to_string());
                    if report.attempts < max_attempts && !self.retry_backoff.is_zero() {
                        thread::sleep(self.retry_backoff * report.attempts);
                    }
                }
            }
        }

        report.failed = records.len();
        report
    }
}

/// Persistence failures surfaced to the operator as a single error.
pub fn incomplete_commit_error(outcome: &RunOutcome) -> Option<RotationError> {
    if outcome.is_complete() {
        return None;
    }
    Some(RotationError::persistence(format!(
        "run {}: {} of {} assignments were not recorded ({})",
        outcome.run_id,
        outcome.commit.failed,
        outcome.batch.rotated.len(),
        outcome.commit.last_error.as_deref().unwrap_or("unknown error")
    )))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::account::tests::{create_test_account, date};
    use crate::entities::{ClassificationRule, Roster};
    use crate::history::InMemoryHistoryStore;
    use crate::report::ReportStatus;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn config(capacity: usize) -> RotationConfig {
        RotationConfig {
            rosters: vec![
                Roster::new(
                    "revenda",
                    &["Ana", "Bruno"],
                    ClassificationRule::Include(vec!["5".to_string(), "7".to_string()]),
                )
                .with_capacity(capacity),
                Roster::new(
                    "varejo",
                    &["Carla", "Daniel", "Eva"],
                    ClassificationRule::Exclude(vec!["5".to_string(), "7".to_string()]),
                )
                .with_capacity(capacity),
            ],
            ..RotationConfig::default()
        }
    }

    fn feed() -> Vec<Account> {
        let mut accounts = Vec::new();
        for i in 1..=4 {
            let mut a = create_test_account(&i.to_string(), &format!("Revenda {i}"), "Antigo");
            a.classificacao_conta = "5".to_string();
            accounts.push(a);
        }
        for i in 10..=16 {
            accounts.push(create_test_account(&i.to_string(), &format!("Varejo {i}"), "Antigo"));
        }
        // Still buying: never eligible
        let mut active = create_test_account("99", "Compra Sempre", "Ana");
        active.data_ultima_venda_grupo = Some(date("2024-06-20"));
        accounts.push(active);
        accounts
    }

    /// Fails the first `failures` batch commits.
    struct FlakyStore {
        inner: InMemoryHistoryStore,
        failures: u32,
    }

    impl HistoryStore for FlakyStore {
        fn record(&mut self, record: &AssignmentRecord) -> RotationResult<bool> {
            self.inner.record(record)
        }

        fn history_for(&self, root: &TaxIdRoot) -> RotationResult<BTreeSet<String>> {
            self.inner.history_for(root)
        }

        fn records_for(&self, root: &TaxIdRoot) -> RotationResult<Vec<AssignmentRecord>> {
            self.inner.records_for(root)
        }

        fn record_batch(&mut self, records: &[AssignmentRecord]) -> RotationResult<CommitStats> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(RotationError::persistence("disk unavailable"));
            }
            self.inner.record_batch(records)
        }
    }

    fn pipeline(capacity: usize) -> RotationPipeline {
        RotationPipeline::new(config(capacity)).with_retry_backoff(Duration::ZERO)
    }

    #[test]
    fn test_run_rotates_each_roster_separately() {
        let mut store = InMemoryHistoryStore::new();
        let mut rng = StdRng::seed_from_u64(2024);

        let outcome = pipeline(2)
            .run(&mut store, &mut rng, feed(), &HashMap::new(), date("2024-07-01"))
            .unwrap();

        assert_eq!(outcome.rosters[0].eligible, 4);
        assert_eq!(outcome.rosters[0].rotated, 4);
        assert_eq!(outcome.rosters[1].eligible, 7);
        assert_eq!(outcome.rosters[1].rotated, 6);
        assert_eq!(outcome.batch.leftover.len(), 1);
        assert!(outcome.is_complete());
        assert_eq!(store.len(), 10);
        assert_eq!(store.runs().len(), 1);

        for rotated in &outcome.batch.rotated {
            let resale = rotated.account.classificacao_conta == "5";
            let rep = rotated.representative();
            assert_eq!(resale, rep == "Ana" || rep == "Bruno", "{rep}");
        }
    }

    #[test]
    fn test_second_run_never_repeats_a_representative() {
        let mut store = InMemoryHistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let p = pipeline(10);

        let first = p.run(&mut store, &mut rng, feed(), &HashMap::new(), date("2024-07-01")).unwrap();
        // A year later the same accounts are stale again
        let second = p.run(&mut store, &mut rng, feed(), &HashMap::new(), date("2025-07-01")).unwrap();

        for again in &second.batch.rotated {
            if let Some(before) = first.batch.rotated.iter().find(|r| r.root() == again.root()) {
                assert_ne!(before.representative(), again.representative());
            }
        }
        // Two resale reps: every resale account is exhausted after two runs
        let third = p.run(&mut store, &mut rng, feed(), &HashMap::new(), date("2026-07-01")).unwrap();
        assert!(third
            .batch
            .rotated
            .iter()
            .all(|r| r.account.classificacao_conta != "5"));
    }

    #[test]
    fn test_overrides_apply_before_filtering() {
        let mut store = InMemoryHistoryStore::new();
        let mut rng = StdRng::seed_from_u64(5);
        let mut overrides = HashMap::new();
        overrides.insert(TaxIdRoot::parse("99").unwrap(), Transfer::new("Carla"));

        let outcome = pipeline(2)
            .run(&mut store, &mut rng, feed(), &overrides, date("2024-07-01"))
            .unwrap();

        assert_eq!(outcome.overrides_applied, 1);
        let carla = outcome.reports.iter().find(|r| r.representative == "Carla").unwrap();
        assert!(carla
            .block(ReportStatus::Active)
            .any(|row| row.razao_social == "Compra Sempre"));
    }

    #[test]
    fn test_commit_retries_then_succeeds() {
        let mut store = FlakyStore { inner: InMemoryHistoryStore::new(), failures: 2 };
        let mut rng = StdRng::seed_from_u64(9);

        let outcome = pipeline(2)
            .run(&mut store, &mut rng, feed(), &HashMap::new(), date("2024-07-01"))
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.commit.attempts, 3);
        assert_eq!(store.inner.len(), outcome.batch.rotated.len());
        assert!(incomplete_commit_error(&outcome).is_none());
    }

    #[test]
    fn test_commit_exhausted_is_reported_incomplete() {
        let mut store = FlakyStore { inner: InMemoryHistoryStore::new(), failures: 100 };
        let mut rng = StdRng::seed_from_u64(9);

        let outcome = pipeline(2)
            .run(&mut store, &mut rng, feed(), &HashMap::new(), date("2024-07-01"))
            .unwrap();

        assert!(!outcome.is_complete());
        assert_eq!(outcome.commit.attempts, 4);
        assert_eq!(outcome.commit.failed, outcome.batch.rotated.len());
        assert!(store.inner.is_empty());

        let err = incomplete_commit_error(&outcome).unwrap();
        assert!(err.is_persistence());
        assert!(err.to_string().contains("disk unavailable"));
    }

    #[test]
    fn test_reports_cover_every_member() {
        let mut store = InMemoryHistoryStore::new();
        let mut rng = StdRng::seed_from_u64(77);

        let outcome = pipeline(2)
            .run(&mut store, &mut rng, feed(), &HashMap::new(), date("2024-07-01"))
            .unwrap();

        let names: Vec<&str> = outcome.reports.iter().map(|r| r.representative.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Bruno", "Carla", "Daniel", "Eva"]);

        let received: usize = outcome
            .reports
            .iter()
            .map(|r| r.count(ReportStatus::NewlyReceived))
            .sum();
        assert_eq!(received, outcome.batch.rotated.len());
    }

    #[test]
    fn test_current_owner_never_receives_own_account() {
        let p = RotationPipeline::new(RotationConfig {
            rosters: vec![Roster::new("revenda", &["Ana", "Bruno"], ClassificationRule::Any)],
            ..RotationConfig::default()
        })
        .with_retry_backoff(Duration::ZERO);
        let owned = create_test_account("1", "Da Ana", "Ana");

        for seed in 0..20 {
            let mut store = InMemoryHistoryStore::new();
            let mut rng = StdRng::seed_from_u64(seed);

            let outcome = p
                .run(&mut store, &mut rng, vec![owned.clone()], &HashMap::new(), date("2024-07-01"))
                .unwrap();

            assert_eq!(outcome.batch.rotated.len(), 1, "seed {seed}");
            assert_eq!(outcome.batch.rotated[0].representative(), "Bruno", "seed {seed}");
            let ana = outcome.reports.iter().find(|r| r.representative == "Ana").unwrap();
            assert_eq!(ana.count(ReportStatus::NewlyReceived), 0);
            assert_eq!(ana.count(ReportStatus::Removed), 1);
        }
    }

    #[test]
    fn test_current_owner_alone_leaves_account_unrotated() {
        let p = RotationPipeline::new(RotationConfig {
            rosters: vec![Roster::new("solo", &["Ana"], ClassificationRule::Any)],
            ..RotationConfig::default()
        });
        let mut store = InMemoryHistoryStore::new();
        let mut rng = StdRng::seed_from_u64(0);

        let outcome = p
            .run(
                &mut store,
                &mut rng,
                vec![create_test_account("1", "Da Ana", "Ana")],
                &HashMap::new(),
                date("2024-07-01"),
            )
            .unwrap();

        assert!(outcome.batch.rotated.is_empty());
        assert_eq!(outcome.batch.leftover.len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_transferred_account_is_not_rotated_away() {
        let mut store = InMemoryHistoryStore::new();
        let mut rng = StdRng::seed_from_u64(5);
        let mut overrides = HashMap::new();
        // Otherwise eligible retail account
        overrides.insert(
            TaxIdRoot::parse("10").unwrap(),
            Transfer::new("Carla").on(date("2024-06-15")),
        );

        let outcome = pipeline(5)
            .run(&mut store, &mut rng, feed(), &overrides, date("2024-07-01"))
            .unwrap();

        assert!(outcome.batch.rotated.iter().all(|r| r.account.razao_social != "Varejo 10"));
        assert_eq!(outcome.rosters[1].eligible, 6);

        let carla = outcome.reports.iter().find(|r| r.representative == "Carla").unwrap();
        assert!(carla
            .block(ReportStatus::RecentlyArrived)
            .any(|row| row.razao_social == "Varejo 10"));
    }

    #[test]
    fn test_transfer_without_date_uses_transfer_date() {
        let mut store = InMemoryHistoryStore::new();
        let mut rng = StdRng::seed_from_u64(5);
        let mut overrides = HashMap::new();
        overrides.insert(TaxIdRoot::parse("10").unwrap(), Transfer::new("Carla"));

        let outcome = pipeline(5)
            .with_transfer_date(date("2024-03-20"))
            .run(&mut store, &mut rng, feed(), &overrides, date("2024-07-01"))
            .unwrap();

        let moved = outcome.previous.iter().find(|a| a.razao_social == "Varejo 10").unwrap();
        assert_eq!(moved.nome_vendedor, "Carla");
        assert_eq!(moved.data_entrou_carteira, Some(date("2024-03-20")));
    }
}
