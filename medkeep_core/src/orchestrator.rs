//! Daily dosage run: FEFO deduction with per-date idempotency.
//!
//! For each medicine due on the target date the run scraps expired stock,
//! allocates the day's requirement in FEFO order and commits the resulting
//! moves in one transaction per medicine. A date already applied is a no-op
//! unless `force` is set, in which case the prior moves are reversed
//! against the ledger before a fresh allocation runs.

use crate::allocator::{allocate, Draw};
use crate::ledger::is_applied;
use crate::store::Store;
use crate::types::{DosageRequirement, StockMove};
use crate::Result;
use chrono::NaiveDate;

/// Options for a dosage run
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub date: NaiveDate,
    /// Re-apply a date that already has moves, superseding them
    pub force: bool,
    /// Reporting detail only; no behavioural effect
    pub verbose: bool,
    /// Compute the full report without persisting anything
    pub dry_run: bool,
}

impl RunOptions {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date,
            force: false,
            verbose: false,
            dry_run: false,
        }
    }
}

/// Per-medicine outcome of a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MedicineStatus {
    /// Requirement fully met
    Applied,
    /// A prior application for the date is still live; nothing changed
    AlreadyApplied,
    /// Applied with unmet demand
    Shorted,
    /// Persistence failed; this medicine's unit was rolled back
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct MedicineResult {
    pub medicine_id: String,
    pub status: MedicineStatus,
    pub required: u32,
    pub deducted: u32,
    pub shortfall: u32,
    /// Planned draws, in allocation order
    pub draws: Vec<Draw>,
    /// Stocked units scrapped because they expired before the run date
    pub scrapped: u32,
}

/// Summary of a dosage run
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub date: Option<NaiveDate>,
    pub dry_run: bool,
    pub results: Vec<MedicineResult>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&MedicineStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|s| *s == MedicineStatus::Applied)
    }

    pub fn already_applied(&self) -> usize {
        self.count(|s| *s == MedicineStatus::AlreadyApplied)
    }

    pub fn shorted(&self) -> usize {
        self.count(|s| *s == MedicineStatus::Shorted)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, MedicineStatus::Failed(_)))
    }

    /// Medicines with unmet demand, with the missing amounts
    pub fn shortfalls(&self) -> Vec<(&str, u32)> {
        self.results
            .iter()
            .filter(|r| r.shortfall > 0)
            .map(|r| (r.medicine_id.as_str(), r.shortfall))
            .collect()
    }
}

/// Apply the daily dosage for `options.date` across all due medicines.
///
/// Medicines are processed sequentially and independently; a failure in
/// one medicine's commit is recorded in the report and does not disturb
/// medicines already committed in this run.
pub fn apply_dosage(store: &mut Store, options: &RunOptions) -> Result<RunReport> {
    let requirements = store.due_requirements(options.date);

    let mut report = RunReport {
        date: Some(options.date),
        dry_run: options.dry_run,
        results: Vec::new(),
    };

    if requirements.is_empty() {
        tracing::info!("No daily dosage due on {}; nothing to deduct", options.date);
        return Ok(report);
    }

    // The ledger is read once; moves committed during the run are appended
    // to this view so later medicines see them.
    let mut moves = store.load_all_moves()?;

    tracing::info!(
        "Dosage run for {}: {} medicines due (force={}, dry_run={})",
        options.date,
        requirements.len(),
        options.force,
        options.dry_run
    );

    for requirement in requirements {
        let applied = is_applied(&moves, &requirement.medicine_id, options.date);

        if applied && !options.force {
            tracing::info!(
                "{}: already applied for {}, skipping",
                requirement.medicine_id,
                options.date
            );
            report.results.push(MedicineResult {
                medicine_id: requirement.medicine_id,
                status: MedicineStatus::AlreadyApplied,
                required: requirement.quantity,
                deducted: 0,
                shortfall: 0,
                draws: Vec::new(),
                scrapped: 0,
            });
            continue;
        }

        match apply_medicine(store, &moves, &requirement, options, applied) {
            Ok((result, committed)) => {
                moves.extend(committed);
                report.results.push(result);
            }
            Err(e) => {
                tracing::warn!("{}: unit aborted: {}", requirement.medicine_id, e);
                report.results.push(MedicineResult {
                    medicine_id: requirement.medicine_id,
                    status: MedicineStatus::Failed(e.to_string()),
                    required: requirement.quantity,
                    deducted: 0,
                    shortfall: 0,
                    draws: Vec::new(),
                    scrapped: 0,
                });
            }
        }
    }

    tracing::info!(
        "Dosage run for {} complete: {} applied, {} already applied, {} shorted, {} failed",
        options.date,
        report.applied(),
        report.already_applied(),
        report.shorted(),
        report.failed()
    );

    Ok(report)
}

/// One medicine's atomic unit: reverse (force), scrap expired, allocate,
/// deduct, commit. Returns the result and the moves made durable (empty
/// for a dry run).
fn apply_medicine(
    store: &mut Store,
    moves: &[StockMove],
    requirement: &DosageRequirement,
    options: &RunOptions,
    applied: bool,
) -> Result<(MedicineResult, Vec<StockMove>)> {
    let medicine_id = requirement.medicine_id.as_str();
    let mut txn = store.begin();

    // Force re-run: restore exactly what the prior application deducted,
    // recording reversal entries that name the superseded moves.
    if applied && options.force {
        let reversed = txn.reverse_dosage_moves(moves, medicine_id, options.date)?;
        tracing::info!(
            "{}: force re-run, reversed {} prior moves for {}",
            medicine_id,
            reversed,
            options.date
        );
    }

    // Scrap stock that expired before the run date so it can never be drawn.
    let mut scrapped = 0;
    for batch in txn.inventory().expired_batches(medicine_id, options.date) {
        txn.inventory_mut().adjust_batch(batch.id, 0)?;
        txn.record(StockMove::expired(
            medicine_id,
            batch.id,
            options.date,
            batch.quantity,
        ));
        scrapped += batch.quantity;
        tracing::debug!(
            "{}: scrapped batch {} ({} units expired {:?})",
            medicine_id,
            batch.batch_no,
            batch.quantity,
            batch.expiry
        );
    }

    let eligible = txn.inventory().eligible_batches(medicine_id, options.date);
    let allocation = allocate(requirement.quantity, &eligible);

    for draw in &allocation.plan {
        txn.inventory_mut().deduct(draw.batch_id, draw.qty)?;
        txn.record(StockMove::daily_dose(
            medicine_id,
            draw.batch_id,
            options.date,
            draw.qty,
        ));
        tracing::debug!("{}: drew {} from batch {}", medicine_id, draw.qty, draw.batch_id);
    }

    if allocation.shortfall > 0 {
        txn.record(StockMove::shortfall(
            medicine_id,
            options.date,
            allocation.shortfall,
        ));
        tracing::warn!(
            "{}: shortfall of {} units on {}",
            medicine_id,
            allocation.shortfall,
            options.date
        );
    }

    let status = if allocation.shortfall > 0 {
        MedicineStatus::Shorted
    } else {
        MedicineStatus::Applied
    };

    let result = MedicineResult {
        medicine_id: medicine_id.to_string(),
        status,
        required: requirement.quantity,
        deducted: allocation.total_drawn(),
        shortfall: allocation.shortfall,
        draws: allocation.plan,
        scrapped,
    };

    let committed = if options.dry_run {
        // Staged changes are discarded with the transaction.
        Vec::new()
    } else {
        txn.commit()?
    };

    Ok((result, committed))
}
