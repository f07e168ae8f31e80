use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use medkeep_core::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "medkeep")]
#[command(about = "Medicine stock tracker with FEFO daily deduction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the daily FEFO dosage deduction (default)
    Apply {
        /// Apply for YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Re-apply even if already applied for that date
        #[arg(long)]
        force: bool,

        /// Print per-batch draw detail
        #[arg(long)]
        verbose: bool,

        /// Compute the run report without persisting
        #[arg(long)]
        dry_run: bool,
    },

    /// Create the data directory and an empty inventory snapshot
    Init,

    /// Import suppliers/medicines/batches/dosage CSV files
    Ingest {
        /// Directory containing the CSV files
        #[arg(long)]
        dir: PathBuf,
    },

    /// Receive stock into a batch
    Receive {
        #[arg(long)]
        medicine: String,

        /// Batch label (created if new, topped up if known)
        #[arg(long)]
        batch: String,

        #[arg(long)]
        qty: u32,

        /// Expiry date YYYY-MM-DD
        #[arg(long)]
        expiry: Option<NaiveDate>,

        #[arg(long)]
        note: Option<String>,
    },

    /// Set a batch to an exact quantity
    Adjust {
        /// Store-assigned batch id (see `report batches --all`)
        #[arg(long)]
        batch: u64,

        #[arg(long)]
        qty: u32,

        #[arg(long)]
        note: Option<String>,
    },

    /// Read-only reports over stock and the move ledger
    Report {
        #[command(subcommand)]
        report: ReportCommands,
    },

    /// Roll the move ledger into the CSV archive
    Rollup {
        /// Clean up retired ledger files after rollup
        #[arg(long)]
        cleanup: bool,
    },
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Stock per medicine against its reorder level
    Stock,

    /// Batches in FEFO order
    Batches {
        #[arg(long)]
        medicine: Option<String>,

        /// Include batches with no stock left
        #[arg(long)]
        all: bool,
    },

    /// Medicines at or below their reorder level
    LowStock,

    /// Daily-plan medicines running low, with days of cover
    Alerts,

    /// Stocked batches expiring within a window
    Expiring {
        /// Window in days (default from config)
        #[arg(long)]
        days: Option<u32>,
    },

    /// The stock move ledger, newest first
    Moves {
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        medicine: Option<String>,

        /// receipt, daily_dose, expired, adjustment, shortfall, reversal
        #[arg(long)]
        reason: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    medkeep_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    match cli.command {
        Some(Commands::Apply {
            date,
            force,
            verbose,
            dry_run,
        }) => cmd_apply(data_dir, date, force, verbose, dry_run),
        Some(Commands::Init) => cmd_init(data_dir),
        Some(Commands::Ingest { dir }) => cmd_ingest(data_dir, dir),
        Some(Commands::Receive {
            medicine,
            batch,
            qty,
            expiry,
            note,
        }) => cmd_receive(data_dir, medicine, batch, qty, expiry, note),
        Some(Commands::Adjust { batch, qty, note }) => cmd_adjust(data_dir, batch, qty, note),
        Some(Commands::Report { report }) => cmd_report(data_dir, report, &config),
        Some(Commands::Rollup { cleanup }) => cmd_rollup(data_dir, cleanup),
        None => {
            // Default to "apply" for today
            cmd_apply(data_dir, None, false, false, false)
        }
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn cmd_apply(
    data_dir: PathBuf,
    date: Option<NaiveDate>,
    force: bool,
    verbose: bool,
    dry_run: bool,
) -> Result<()> {
    let date = date.unwrap_or_else(today);
    let mut store = Store::open(&data_dir)?;

    let options = RunOptions {
        date,
        force,
        verbose,
        dry_run,
    };
    let report = apply_dosage(&mut store, &options)?;
    display_run_report(&report, verbose);
    Ok(())
}

fn display_run_report(report: &RunReport, verbose: bool) {
    let date = report
        .date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());

    println!("\n╭─────────────────────────────────────────╮");
    println!("│  DAILY DOSAGE RUN {}", date);
    println!("╰─────────────────────────────────────────╯");
    println!();

    if report.results.is_empty() {
        println!("  No daily dosage due. Nothing to deduct.");
        println!();
        return;
    }

    println!(
        "  Applied: {}   Already applied: {}   Shorted: {}   Failed: {}",
        report.applied(),
        report.already_applied(),
        report.shorted(),
        report.failed()
    );
    println!();

    for result in &report.results {
        match &result.status {
            MedicineStatus::Applied => {
                println!("  ✓ {}: deducted {}", result.medicine_id, result.deducted);
            }
            MedicineStatus::AlreadyApplied => {
                println!("  = {}: already applied", result.medicine_id);
            }
            MedicineStatus::Shorted => {
                println!(
                    "  ! {}: deducted {}, short {} units",
                    result.medicine_id, result.deducted, result.shortfall
                );
            }
            MedicineStatus::Failed(e) => {
                println!("  ✗ {}: failed ({})", result.medicine_id, e);
            }
        }

        if verbose {
            if result.scrapped > 0 {
                println!("      scrapped {} expired units", result.scrapped);
            }
            for draw in &result.draws {
                println!("      batch {}: took {}", draw.batch_id, draw.qty);
            }
        }
    }

    let only_skips = report.applied() + report.shorted() + report.failed() == 0
        && report.already_applied() > 0;
    if only_skips {
        println!();
        println!("  Already applied for {}. Use --force to re-apply.", date);
    }

    if report.dry_run {
        println!();
        println!("  [Dry run - nothing persisted]");
    }
    println!();
}

fn cmd_init(data_dir: PathBuf) -> Result<()> {
    let store = Store::init(&data_dir)?;
    println!("✓ Store ready at {}", store.paths().data_dir().display());
    Ok(())
}

fn cmd_ingest(data_dir: PathBuf, dir: PathBuf) -> Result<()> {
    let mut store = Store::open_or_create(&data_dir)?;
    let mut inventory = store.inventory().clone();

    let summary = ingest_dir(&mut inventory, &dir)?;
    store.commit_inventory(inventory)?;

    println!("✓ Ingested from {}", dir.display());
    println!("  suppliers: {}", summary.suppliers);
    println!("  medicines: {}", summary.medicines);
    println!("  batches:   {}", summary.batches);
    println!("  schedules: {}", summary.schedules);
    Ok(())
}

fn cmd_receive(
    data_dir: PathBuf,
    medicine: String,
    batch: String,
    qty: u32,
    expiry: Option<NaiveDate>,
    note: Option<String>,
) -> Result<()> {
    let mut store = Store::open(&data_dir)?;
    let (batch_id, new_qty) = store.receive(&medicine, &batch, qty, expiry, today(), note)?;
    println!(
        "✓ Received {} of {} / {} (batch {}, now {})",
        qty, medicine, batch, batch_id, new_qty
    );
    Ok(())
}

fn cmd_adjust(data_dir: PathBuf, batch: u64, qty: u32, note: Option<String>) -> Result<()> {
    let mut store = Store::open(&data_dir)?;
    let delta = store.adjust(batch, qty, today(), note)?;
    println!("✓ Batch {} set to {} (Δ {})", batch, qty, delta);
    Ok(())
}

fn cmd_report(data_dir: PathBuf, report: ReportCommands, config: &Config) -> Result<()> {
    let store = Store::open(&data_dir)?;
    let inventory = store.inventory();

    match report {
        ReportCommands::Stock => {
            println!("{:<16} {:>10} {:>10} {:>10}", "medicine", "on hand", "reorder", "per day");
            for level in report::stock_levels(inventory) {
                println!(
                    "{:<16} {:>10} {:>10} {:>10}",
                    level.medicine_id, level.total_on_hand, level.reorder_level, level.units_per_day
                );
            }
        }

        ReportCommands::Batches { medicine, all } => {
            println!(
                "{:>6} {:<16} {:<14} {:>8}  {}",
                "id", "medicine", "batch_no", "qty", "expiry"
            );
            for batch in report::batches_fefo(inventory, medicine.as_deref(), !all) {
                println!(
                    "{:>6} {:<16} {:<14} {:>8}  {}",
                    batch.id,
                    batch.medicine_id,
                    batch.batch_no,
                    batch.quantity,
                    batch
                        .expiry
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }

        ReportCommands::LowStock => {
            let low = report::low_stock(inventory);
            if low.is_empty() {
                println!("No medicines at or below reorder level.");
            }
            for level in low {
                println!(
                    "{:<16} {} on hand (reorder at {})",
                    level.medicine_id, level.total_on_hand, level.reorder_level
                );
            }
        }

        ReportCommands::Alerts => {
            let alerts = report::alerts(inventory, config.alerts.low_stock_factor);
            if alerts.is_empty() {
                println!("No low-stock alerts.");
            }
            for alert in alerts {
                println!(
                    "{:<16} {} on hand, alert below {:.0}, {:.1} days cover",
                    alert.medicine_id, alert.total_on_hand, alert.alert_level, alert.days_cover
                );
            }
        }

        ReportCommands::Expiring { days } => {
            let window = days.unwrap_or(config.alerts.expiry_window_days);
            let expiring = report::expiring_soon(inventory, today(), window);
            if expiring.is_empty() {
                println!("No stocked batches expiring within {} days.", window);
            }
            for batch in expiring {
                println!(
                    "{:<16} {:<14} {:>6} units, expires {}",
                    batch.medicine_id,
                    batch.batch_no,
                    batch.quantity,
                    batch
                        .expiry
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }

        ReportCommands::Moves {
            date,
            medicine,
            reason,
            limit,
        } => {
            let reason = reason.map(|s| s.parse::<MoveReason>()).transpose()?;
            let filter = report::MoveFilter {
                date,
                medicine_id: medicine,
                reason,
                limit,
            };
            let moves = store.load_all_moves()?;
            for mv in report::filter_moves(&moves, &filter) {
                println!(
                    "{}  {:<16} {:<10} batch {:<6} {:>6}  {}",
                    mv.date,
                    mv.medicine_id,
                    mv.reason,
                    mv.batch_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    mv.qty_change,
                    mv.note.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}

fn cmd_rollup(data_dir: PathBuf, cleanup: bool) -> Result<()> {
    let paths = StorePaths::new(&data_dir);
    let ledger_path = paths.ledger();
    let csv_path = paths.archive();

    if !ledger_path.exists() {
        println!("No ledger file found - nothing to roll up.");
        return Ok(());
    }

    let count = medkeep_core::archive::ledger_to_csv_and_archive(&ledger_path, &csv_path)?;

    println!("✓ Rolled up {} moves to CSV", count);
    println!("  CSV: {}", csv_path.display());

    if cleanup {
        let cleaned = medkeep_core::archive::cleanup_processed(&paths.ledger_dir())?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} retired ledger files", cleaned);
        }
    }

    Ok(())
}
