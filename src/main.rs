// 🎁 donation-match - batch commands against one state directory
//
// Every command that writes follows the same order:
//   lock → load → mutate → persist → (export) → unlock
// Any failure before persist leaves registry.db exactly as it was.

mod exit_codes;

// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use donation_match::{
    ingest, write_round_exports, Error, MatcherConfig, MatchingEngine, Registry, RegistryLock,
    RoundReport, UpsertSummary,
};
use exit_codes::{EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "donation-match")]
#[command(about = "Match gift-card donors to recipients, one batch round at a time")]
#[command(version)]
struct Cli {
    /// Directory holding registry.db (and optionally matcher.toml)
    #[arg(long, global = true, env = "DONATION_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add new donors and raise capacity of known ones
    UpdateDonors {
        /// Donor CSV file
        file: PathBuf,
    },

    /// Add new recipients; any repeated home email rejects the whole file
    UpdateRecipients {
        /// Recipient CSV file
        file: PathBuf,
    },

    /// Run one matching round and write the CSV views
    Match {
        /// Where to write the views (defaults to the state directory)
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },

    /// Show registry totals
    Status,

    /// Browse the registry in the terminal (read-only)
    Browse,
}

/// Bad invocation, as opposed to bad data
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(err) => {
            eprintln!("❌ {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<UsageError>().is_some() {
        return EXIT_USAGE;
    }
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map(exit_codes::for_error)
        .unwrap_or(EXIT_ERROR)
}

fn run(cli: Cli) -> Result<()> {
    let state_dir = cli.state_dir.ok_or_else(|| {
        UsageError("no state directory: pass --state-dir or set DONATION_STATE_DIR".to_string())
    })?;

    match cli.command {
        Commands::UpdateDonors { file } => cmd_update_donors(&state_dir, &file),
        Commands::UpdateRecipients { file } => cmd_update_recipients(&state_dir, &file),
        Commands::Match { export_dir } => {
            let export_dir = export_dir.unwrap_or_else(|| state_dir.clone());
            cmd_match(&state_dir, &export_dir)
        }
        Commands::Status => cmd_status(&state_dir),
        Commands::Browse => cmd_browse(&state_dir),
    }
}

fn require_file(file: &Path) -> Result<()> {
    if !file.is_file() {
        return Err(UsageError(format!("input file not found: {}", file.display())).into());
    }
    Ok(())
}

/// Lock the state directory and load config plus registry
fn open_state(state_dir: &Path, command: &str) -> Result<(RegistryLock, MatcherConfig, Registry)> {
    let lock = RegistryLock::acquire_for(state_dir, command)?;
    let config = MatcherConfig::load(state_dir)
        .with_context(|| format!("reading configuration in {}", state_dir.display()))?;
    let registry = Registry::load(state_dir)
        .with_context(|| format!("loading registry from {}", state_dir.display()))?
        .with_actor(&config.actor);
    Ok((lock, config, registry))
}

fn print_summary(kind: &str, summary: &UpsertSummary, total: usize) {
    println!(
        "✓ {} {} added, {} updated, {} unchanged ({} in registry)",
        kind, summary.created, summary.updated, summary.unchanged, total
    );
    if !summary.warnings.is_empty() {
        println!("\n⚠️  Warnings:");
        for warning in &summary.warnings {
            println!("   {}", warning);
        }
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn cmd_update_donors(state_dir: &Path, file: &Path) -> Result<()> {
    require_file(file)?;
    let records = ingest::load_donor_csv(file)
        .with_context(|| format!("reading donors from {}", file.display()))?;
    println!("📂 Read {} donor rows from {}", records.len(), file.display());

    let (_lock, _config, mut registry) = open_state(state_dir, "update-donors")?;
    let summary = registry
        .upsert_donors(&records)
        .context("donor update rejected, registry unchanged")?;
    registry.persist(state_dir)?;

    print_summary("Donors:", &summary, registry.donors().len());
    println!("✅ Registry saved to {}", state_dir.display());
    Ok(())
}

fn cmd_update_recipients(state_dir: &Path, file: &Path) -> Result<()> {
    require_file(file)?;
    let records = ingest::load_recipient_csv(file)
        .with_context(|| format!("reading recipients from {}", file.display()))?;
    println!("📂 Read {} recipient rows from {}", records.len(), file.display());

    let (_lock, _config, mut registry) = open_state(state_dir, "update-recipients")?;
    let summary = registry
        .upsert_recipients(&records)
        .context("recipient update rejected, registry unchanged")?;
    registry.persist(state_dir)?;

    print_summary("Recipients:", &summary, registry.recipients().len());
    println!("✅ Registry saved to {}", state_dir.display());
    Ok(())
}

fn cmd_match(state_dir: &Path, export_dir: &Path) -> Result<()> {
    let (_lock, config, mut registry) = open_state(state_dir, "match")?;

    let engine = MatchingEngine::with_config(config);
    let report = engine.run_round(&mut registry).context("matching round failed")?;

    if !report.is_noop() {
        registry.persist(state_dir)?;
    }
    let written = write_round_exports(&registry, &report, export_dir)
        .with_context(|| format!("writing views to {}", export_dir.display()))?;

    print_report(&report);
    for path in written {
        println!("✓ Wrote {}", path.display());
    }
    Ok(())
}

fn print_report(report: &RoundReport) {
    println!("🎯 {}", report.summary());

    if !report.extra_stores.is_empty() {
        println!("\n⚠️  Donors asked to use an extra store:");
        for extra in &report.extra_stores {
            println!(
                "   {} → {} (already buying at {})",
                extra.donor,
                extra.store,
                extra.prior_stores.join(", ")
            );
        }
    }
    if !report.shortfalls.is_empty() {
        println!("\n📉 Recipients still short: {} ({} cards)", report.shortfalls.len(), report.cards_missing());
    }
    if !report.unplaced.is_empty() {
        let cards: u64 = report.unplaced.iter().map(|u| u64::from(u.remaining)).sum();
        println!("💤 Unplaced donor capacity: {} cards across {} donors", cards, report.unplaced.len());
    }
}

fn cmd_status(state_dir: &Path) -> Result<()> {
    let registry = Registry::load(state_dir)
        .with_context(|| format!("loading registry from {}", state_dir.display()))?;

    let full = registry.recipients().values().filter(|r| r.is_full()).count();
    let ineligible = registry.recipients().values().filter(|r| !r.valid).count();
    println!("📊 Registry at {}", state_dir.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Donors:          {}", registry.donors().len());
    println!(
        "✓ Recipients:      {} ({} fully matched, {} ineligible)",
        registry.recipients().len(),
        full,
        ineligible
    );
    println!("✓ Cards assigned:  {}", registry.history().len());
    println!("✓ Rounds run:      {}", registry.rounds().len());
    println!("✓ Open demand:     {} cards", registry.open_demand());
    println!("✓ Free capacity:   {} cards", registry.free_capacity());
    Ok(())
}

#[cfg(feature = "tui")]
fn cmd_browse(state_dir: &Path) -> Result<()> {
    let registry = Registry::load(state_dir)
        .with_context(|| format!("loading registry from {}", state_dir.display()))?;
    println!("✓ Loaded {} recipients, {} donors", registry.recipients().len(), registry.donors().len());

    let mut app = ui::App::new(registry);
    ui::run_ui(&mut app)?;

    println!("\n✅ Browser closed");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn cmd_browse(_state_dir: &Path) -> Result<()> {
    Err(UsageError("browse needs the `tui` feature: cargo build --features tui".to_string()).into())
}
