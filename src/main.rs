use anyhow::{bail, Context, Result};
use carteira_rotation::{
    cutoff_from, incomplete_commit_error, load_accounts, load_overrides, write_batch,
    write_reports, HistoryStore, ReportClassifier, ReportStatus, RepresentativeReport,
    RotationConfig, RotationPipeline, SqliteHistoryStore, TaxIdRoot, Transfer, VERSION,
};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "carteira-rotation", version, about = "Rotate idle customer accounts between sales representatives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Select eligible accounts, rotate them and record the assignments
    Rotate {
        /// Account feed (CSV)
        #[arg(long)]
        feed: PathBuf,
        /// Roster configuration (JSON)
        #[arg(long, env = "CARTEIRA_CONFIG")]
        config: Option<PathBuf>,
        /// Assignment history database
        #[arg(long, env = "CARTEIRA_DB", default_value = "historico.db")]
        db: PathBuf,
        /// Output directory for batch and report files
        #[arg(long, default_value = "saida")]
        out: PathBuf,
        /// Manual reassignments (CSV with Raiz_CNPJ, Nome_Vendedor[, Data_Entrou_Carteira])
        #[arg(long)]
        overrides: Option<PathBuf>,
        /// Entry date for reassignments without their own date (defaults to the run date)
        #[arg(long)]
        override_date: Option<NaiveDate>,
        /// Seed for the random choice; printed so a run can be reproduced
        #[arg(long)]
        seed: Option<u64>,
        /// Run date (defaults to today)
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Build per-representative reports from two book snapshots
    Report {
        /// Book after rotation (CSV)
        #[arg(long)]
        current: PathBuf,
        /// Book before rotation (CSV)
        #[arg(long)]
        previous: PathBuf,
        #[arg(long, env = "CARTEIRA_CONFIG")]
        config: Option<PathBuf>,
        #[arg(long, default_value = "saida")]
        out: PathBuf,
        /// Date the rotation was committed (defaults to today)
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Show past holders of an account, or the latest runs
    History {
        #[arg(long, env = "CARTEIRA_DB", default_value = "historico.db")]
        db: PathBuf,
        /// Account tax-id root
        #[arg(long)]
        root: Option<String>,
        /// Number of runs to list when no root is given
        #[arg(long, default_value_t = 10)]
        runs: usize,
    },

    /// Validate a roster configuration file
    CheckConfig {
        config: PathBuf,
    },

    /// Release the run lock left behind by a crashed run
    Unlock {
        #[arg(long, env = "CARTEIRA_DB", default_value = "historico.db")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Rotate { feed, config, db, out, overrides, override_date, seed, today } => {
            let inputs = RotateInputs {
                feed,
                config,
                db,
                out,
                overrides,
                override_date,
                seed,
                today,
            };
            run_rotate(inputs)
        }
        Command::Report { current, previous, config, out, today } => {
            run_report(&current, &previous, config.as_deref(), &out, today)
        }
        Command::History { db, root, runs } => run_history(&db, root.as_deref(), runs),
        Command::CheckConfig { config } => run_check_config(&config),
        Command::Unlock { db } => run_unlock(&db),
    }
}

fn load_config(path: Option<&Path>) -> Result<RotationConfig> {
    match path {
        Some(path) => RotationConfig::from_file(path)
            .with_context(|| format!("loading roster config {}", path.display())),
        None => {
            tracing::warn!("no roster config given, using built-in defaults");
            Ok(RotationConfig::default())
        }
    }
}

fn print_reports(reports: &[RepresentativeReport]) {
    for report in reports {
        let counts: Vec<String> = ReportStatus::ALL
            .iter()
            .map(|s| format!("{}={}", s.label(), report.count(*s)))
            .collect();
        println!("   {:<24} {}", report.representative, counts.join("  "));
    }
}

struct RotateInputs {
    feed: PathBuf,
    config: Option<PathBuf>,
    db: PathBuf,
    out: PathBuf,
    overrides: Option<PathBuf>,
    override_date: Option<NaiveDate>,
    seed: Option<u64>,
    today: Option<NaiveDate>,
}

fn run_rotate(inputs: RotateInputs) -> Result<()> {
    println!("🔄 Carteira Rotation v{}", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let feed = inputs.feed.as_path();
    let db = inputs.db.as_path();
    let out = inputs.out.as_path();

    let config = load_config(inputs.config.as_deref())?;
    let run_date = inputs.today.unwrap_or_else(|| Local::now().date_naive());
    let seed = inputs.seed.unwrap_or_else(|| rand::thread_rng().next_u64());
    println!("✓ Run date {}  (seed {})", run_date, seed);

    println!("\n📂 Loading feed...");
    let accounts = load_accounts(feed)?;
    println!("✓ Loaded {} rows from {}", accounts.len(), feed.display());

    let overrides: HashMap<TaxIdRoot, Transfer> = match inputs.overrides.as_deref() {
        Some(path) => load_overrides(path)?,
        None => HashMap::new(),
    };

    println!("\n🗄️  Opening history...");
    let mut store = SqliteHistoryStore::open(db)?;
    println!("✓ {} past assignments on record", store.verify_count()?);

    println!("\n🎲 Rotating...");
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pipeline = RotationPipeline::new(config);
    if let Some(date) = inputs.override_date {
        pipeline = pipeline.with_transfer_date(date);
    }
    let outcome = pipeline.run(&mut store, &mut rng, accounts, &overrides, run_date)?;

    for roster in &outcome.rosters {
        println!(
            "   {:<12} eligible={:<5} rotated={:<5} leftover={}",
            roster.roster, roster.eligible, roster.rotated, roster.leftover
        );
    }
    if outcome.overrides_applied > 0 {
        println!("✓ {} manual reassignments applied", outcome.overrides_applied);
    }

    let (rotated_path, leftover_path) = write_batch(out, &outcome.batch)?;
    let report_paths = write_reports(out, &outcome.reports)?;
    println!("\n💾 Written:");
    println!("   {}", rotated_path.display());
    println!("   {}", leftover_path.display());
    println!("   {} report files under {}", report_paths.len(), out.display());

    println!("\n📊 Reports:");
    print_reports(&outcome.reports);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Run {}", outcome.run_id);
    println!(
        "✓ Recorded {} assignments ({} already on record) in {} attempt(s)",
        outcome.commit.stats.inserted, outcome.commit.stats.duplicates, outcome.commit.attempts
    );

    if let Some(err) = incomplete_commit_error(&outcome) {
        eprintln!("❌ Assignment history is incomplete");
        eprintln!("   Files in {} reflect a rotation that was NOT fully recorded.", out.display());
        return Err(err.into());
    }

    println!("✅ Rotation complete");
    Ok(())
}

fn run_report(
    current: &Path,
    previous: &Path,
    config: Option<&Path>,
    out: &Path,
    today: Option<NaiveDate>,
) -> Result<()> {
    let config = load_config(config)?;
    let commit_date = today.unwrap_or_else(|| Local::now().date_naive());
    let cutoff = cutoff_from(commit_date, config.cutoff_days);

    let current = load_accounts(current)?;
    let previous = load_accounts(previous)?;

    let mut representatives = config.all_members();
    if representatives.is_empty() {
        // No roster members configured: report on whoever holds accounts
        representatives = current.iter().map(|a| a.nome_vendedor.as_str()).collect();
        representatives.sort_unstable();
        representatives.dedup();
    }

    let classifier = ReportClassifier::new(cutoff, commit_date)
        .with_recent_window(config.recent_window_months);
    let reports = classifier.build_reports(&representatives, &current, &previous);
    let paths = write_reports(out, &reports)?;

    println!("📊 Reports as of {} (cutoff {})", commit_date, cutoff);
    print_reports(&reports);
    println!("✓ {} report files under {}", paths.len(), out.display());
    Ok(())
}

fn run_history(db: &Path, root: Option<&str>, runs: usize) -> Result<()> {
    let store = SqliteHistoryStore::open(db)?;

    if let Some(root) = root {
        let root = TaxIdRoot::parse(root)?;
        let records = store.records_for(&root)?;
        if records.is_empty() {
            println!("No assignments recorded for {}", root);
            return Ok(());
        }
        println!("Assignments for {}:", root);
        for record in records {
            println!("   {}  {:<24} run {}", record.assigned_on, record.representative, record.run_id);
        }
        return Ok(());
    }

    if let Some((run_id, started_at)) = store.lock_holder()? {
        println!("⚠️  Run {} in progress since {}", run_id, started_at);
    }

    let summaries = store.recent_runs(runs)?;
    if summaries.is_empty() {
        println!("No runs recorded in {}", db.display());
        return Ok(());
    }

    for run in summaries {
        println!(
            "{}  {}  rotated={} leftover={} committed={} {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.run_id,
            run.rotated,
            run.leftover,
            run.committed,
            if run.complete { "✓" } else { "INCOMPLETE" }
        );
    }
    Ok(())
}

fn run_check_config(path: &Path) -> Result<()> {
    let config = RotationConfig::from_file(path)?;

    println!("✓ {} is valid", path.display());
    println!(
        "   cutoff={} days  recent window={} months  commit retries={}",
        config.cutoff_days, config.recent_window_months, config.commit_retries
    );
    for roster in &config.rosters {
        let members = roster.active_members();
        if members.is_empty() {
            println!("⚠️  roster '{}' has no members", roster.name);
        }
        println!(
            "   {:<12} capacity={:<4} members={}",
            roster.name,
            roster.capacity,
            members.join(", ")
        );
    }
    Ok(())
}

fn run_unlock(db: &Path) -> Result<()> {
    if !db.exists() {
        bail!("database not found: {}", db.display());
    }
    let store = SqliteHistoryStore::open(db)?;
    match store.force_unlock()? {
        Some(run_id) => println!("✓ Released lock held by run {}", run_id),
        None => println!("No lock held"),
    }
    Ok(())
}
