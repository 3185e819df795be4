//! bibrecon - Bibliographic Record Reconciliation
//!
//! Matches catalogue records (MARCXML) against a publisher export (CSV or
//! JSON) and writes the resulting MARC updates for bulk upload.
//!
//! ## Usage
//!
//! ```bash
//! bibrecon run records.xml export.csv --config actaphys.toml
//! bibrecon normalize "Λ hypernuclei"
//! bibrecon similarity "Structure of Hypernuclei" "STRUCTURE OF HYPERNUCLEI."
//! ```

use anyhow::{Context, Result};
use bibrecon::config::RunConfig;
use bibrecon::index::CandidateIndex;
use bibrecon::matcher::{AmbiguityResolver, MatchStrategy, ScoredCandidate};
use bibrecon::model::AuthoritativeRecord;
use bibrecon::pipeline::{RecordOutcome, RecordReport, Reconciler, RunSummary};
use bibrecon::{loader, marcxml, normalize, similarity};
use chrono::Local;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Bibliographic record reconciliation
#[derive(Parser)]
#[command(name = "bibrecon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile catalogue records against a secondary source
    Run {
        /// MARCXML file with the catalogue records
        records: PathBuf,

        /// Secondary-source export (CSV or JSON)
        candidates: PathBuf,

        /// Run configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the fuzzy title threshold
        #[arg(long)]
        threshold: Option<f64>,

        /// Override the matching strategy
        #[arg(long, value_parser = ["strict_key", "key_then_fuzzy", "fuzzy_only"])]
        strategy: Option<String>,

        /// Ask the operator to settle ambiguous matches (TTY only)
        #[arg(long)]
        interactive: bool,

        /// Output directory
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },

    /// Print the comparison form of a title
    Normalize {
        /// Title text
        text: String,
    },

    /// Print the similarity of two titles
    Similarity {
        a: String,
        b: String,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run {
            records,
            candidates,
            config,
            threshold,
            strategy,
            interactive,
            output,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(threshold) = threshold {
                config.matching = config.matching.with_fuzzy_threshold(threshold);
            }
            if let Some(strategy) = strategy.as_deref() {
                config.matching.strategy = parse_strategy(strategy)?;
            }
            if interactive {
                if io::stdin().is_terminal() {
                    config.interactive = true;
                } else {
                    warn!("--interactive ignored: stdin is not a terminal");
                    config.interactive = false;
                }
            } else if config.interactive && !io::stdin().is_terminal() {
                warn!("interactive config ignored: stdin is not a terminal");
                config.interactive = false;
            }
            config.validate().context("Invalid configuration")?;

            run_reconciliation(&records, &candidates, &config, &output)?;
        }

        Commands::Normalize { text } => {
            let report = normalize::normalize_with_report(&text);
            println!("{}", report.text);
            if !report.is_clean() {
                eprintln!("unmapped: {:?}", report.unmapped);
            }
        }

        Commands::Similarity { a, b } => {
            let a_norm = normalize::normalize(&a);
            let b_norm = normalize::normalize(&b);
            println!("{:.4}", similarity::similarity(&a_norm, &b_norm));
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    if let Some(path) = path {
        return RunConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }
    match RunConfig::default_path().filter(|p| p.exists()) {
        Some(path) => {
            info!(path = %path.display(), "Using default config file");
            RunConfig::from_path(&path).with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => Ok(RunConfig::default()),
    }
}

fn parse_strategy(value: &str) -> Result<MatchStrategy> {
    match value {
        "strict_key" => Ok(MatchStrategy::StrictKey),
        "key_then_fuzzy" => Ok(MatchStrategy::KeyThenFuzzy),
        "fuzzy_only" => Ok(MatchStrategy::FuzzyOnly),
        other => anyhow::bail!("unknown strategy {other}"),
    }
}

// ============================================================================
// Run Pipeline
// ============================================================================

fn run_reconciliation(records_path: &Path, candidates_path: &Path, config: &RunConfig, output: &Path) -> Result<()> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let output_folder = output.join(format!("{}_{}", config.source.name, timestamp));
    std::fs::create_dir_all(&output_folder).context("Failed to create output folder")?;
    println!("Output folder: {}", output_folder.display());

    println!("\n--- Stage 1: Reading catalogue records ---");
    let records = marcxml::read_records_file(records_path)
        .with_context(|| format!("Failed to read {}", records_path.display()))?;
    println!("Read {} records.", records.len());

    println!("\n--- Stage 2: Indexing {} ---", config.source.name);
    let candidates = loader::load_candidates(candidates_path, &config.source)
        .with_context(|| format!("Failed to load {}", candidates_path.display()))?;
    let index = CandidateIndex::build(candidates);
    println!(
        "Indexed {} candidates ({} duplicate keys).",
        index.len(),
        index.duplicate_keys()
    );

    println!("\n--- Stage 3: Reconciling ---");
    let resolver = ConsoleResolver;
    let mut reconciler = Reconciler::new(&index, config);
    if config.interactive {
        reconciler = reconciler.with_resolver(&resolver);
    }

    let mut summary = RunSummary::default();
    let mut updates = Vec::new();
    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let report = reconciler.process(record);
        summary.record(&report);
        rows.push(ReportRow::from(&report));
        if let RecordOutcome::Emitted(update) = report.outcome {
            updates.push(update);
        }
    }

    println!("\n--- Stage 4: Writing output ---");
    let updates_path = output_folder.join("updates.xml");
    marcxml::write_updates_file(&updates_path, &updates).context("Failed to write updates")?;
    println!("Saved: {:?}", updates_path);
    save_csv(&output_folder.join("report.csv"), &rows)?;

    let summary_path = output_folder.join("summary.json");
    let json = serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
    std::fs::write(&summary_path, json).context("Failed to write summary")?;

    info!(
        emitted = summary.emitted,
        skipped = summary.skipped,
        "Reconciliation finished"
    );
    println!("\n{summary}");
    Ok(())
}

/// One row of the per-record audit report
#[derive(Debug, Serialize)]
struct ReportRow {
    recid: String,
    state: String,
    category: String,
    reason: String,
    candidate: Option<String>,
    method: Option<String>,
    score: Option<f64>,
    corrections: String,
    field_failures: usize,
}

impl From<&RecordReport> for ReportRow {
    fn from(report: &RecordReport) -> Self {
        let (category, reason) = match &report.outcome {
            RecordOutcome::Emitted(_) => (String::new(), String::new()),
            RecordOutcome::Skipped { reason, .. } => (reason.category().to_string(), reason.to_string()),
        };
        let corrections = report
            .corrections
            .iter()
            .map(|c| format!("{}: {} -> {}", c.part, c.old.as_deref().unwrap_or("-"), c.new))
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            recid: report.recid.clone(),
            state: report.lifecycle.current().to_string(),
            category,
            reason,
            candidate: report.candidate.clone(),
            method: report.method.map(|m| m.to_string()),
            score: report.score,
            corrections,
            field_failures: report.field_failures,
        }
    }
}

/// Save data to CSV file
fn save_csv<T: Serialize>(path: &Path, data: &[T]) -> Result<()> {
    if data.is_empty() {
        println!("No data to save to {:?}", path);
        return Ok(());
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context("Failed to create CSV writer")?;

    for item in data {
        wtr.serialize(item).context("Failed to write CSV record")?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    println!("Saved: {:?}", path);
    Ok(())
}

// ============================================================================
// Operator Confirmation
// ============================================================================

/// Asks on the terminal which of the tied candidates is the right one.
struct ConsoleResolver;

impl AmbiguityResolver for ConsoleResolver {
    fn resolve(&self, record: &AuthoritativeRecord, tied: &[ScoredCandidate<'_>]) -> Option<usize> {
        println!();
        println!("=== Ambiguous match for record {} ===", record.recid);
        println!(
            "  catalogue: {} (vol {}, {})",
            record.title,
            record.volume.map_or_else(|| "?".to_string(), |v| v.to_string()),
            record.year.map_or_else(|| "?".to_string(), |y| y.to_string())
        );
        for (i, scored) in tied.iter().enumerate() {
            let candidate = scored.candidate;
            println!(
                "  [{}] {} (vol {}, p. {}) score {:.3} [{}]",
                i + 1,
                candidate.title,
                candidate.volume.map_or_else(|| "?".to_string(), |v| v.to_string()),
                candidate.pages.map_or_else(|| "?".to_string(), |p| p.to_string()),
                scored.score,
                candidate.source_id
            );
        }
        print!("Pick a number, or press Enter to skip: ");
        if io::stdout().flush().is_err() {
            return None;
        }

        let mut input = String::new();
        if let Err(e) = io::stdin().read_line(&mut input) {
            warn!(error = %e, "Failed to read operator choice");
            return None;
        }
        match input.trim().parse::<usize>() {
            Ok(n) if (1..=tied.len()).contains(&n) => Some(n - 1),
            _ => None,
        }
    }

    fn is_interactive(&self) -> bool {
        io::stdin().is_terminal()
    }
}
