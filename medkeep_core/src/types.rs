//! Core domain types for the medicine stock tracker.
//!
//! This module defines the fundamental types used throughout the system:
//! - Medicines, suppliers and expiring batches
//! - Daily dose schedules and per-date requirements
//! - Stock moves (the append-only audit ledger)

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Catalog Types
// ============================================================================

/// A supplier of medicines
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub lead_time_days: u32,
}

/// A medicine tracked by the system
///
/// Identity is immutable; attributes are only edited by ingestion or
/// administrative paths, never by the dosage run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Medicine {
    pub id: String,
    pub name: String,
    /// Unit of measure (e.g. "tablet", "ml")
    pub unit: String,
    pub salt: Option<String>,
    pub uses: Option<String>,
    pub reorder_level: u32,
    pub supplier_id: Option<String>,
}

/// A discrete lot of a medicine with its own expiry date and quantity
///
/// A batch with quantity 0 remains visible (historical) but is never
/// selected for allocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Batch {
    /// Store-assigned identifier, unique across the inventory
    pub id: u64,
    pub medicine_id: String,
    /// External batch label, unique per medicine
    pub batch_no: String,
    pub quantity: u32,
    /// Batches without an expiry date sort last for allocation
    pub expiry: Option<NaiveDate>,
}

impl Batch {
    /// Total allocation order: expiry ascending, no-expiry last,
    /// batch id as the tie-break.
    pub fn fefo_key(&self) -> (bool, Option<NaiveDate>, u64) {
        (self.expiry.is_none(), self.expiry, self.id)
    }

    /// True when the batch expired strictly before the given date
    pub fn expired_before(&self, date: NaiveDate) -> bool {
        matches!(self.expiry, Some(e) if e < date)
    }
}

/// Per-medicine daily dose slots
///
/// The daily requirement is the sum of the slots; a schedule summing
/// to zero means the medicine is not on the daily plan.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DoseSchedule {
    pub medicine_id: String,
    #[serde(default)]
    pub before_breakfast: u32,
    #[serde(default)]
    pub after_breakfast: u32,
    #[serde(default)]
    pub at_8pm: u32,
    #[serde(default)]
    pub after_dinner: u32,
}

impl DoseSchedule {
    pub fn units_per_day(&self) -> u32 {
        self.before_breakfast + self.after_breakfast + self.at_8pm + self.after_dinner
    }
}

/// The quantity of a medicine required on a calendar date
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DosageRequirement {
    pub medicine_id: String,
    pub date: NaiveDate,
    pub quantity: u32,
}

// ============================================================================
// Stock Move (ledger) Types
// ============================================================================

/// Why a stock move was recorded
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoveReason {
    Receipt,
    DailyDose,
    Expired,
    Adjustment,
    Shortfall,
    Reversal,
}

impl MoveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveReason::Receipt => "receipt",
            MoveReason::DailyDose => "daily_dose",
            MoveReason::Expired => "expired",
            MoveReason::Adjustment => "adjustment",
            MoveReason::Shortfall => "shortfall",
            MoveReason::Reversal => "reversal",
        }
    }

    /// Reasons written by a dosage run for a given date; these are the
    /// moves a force re-run supersedes.
    pub fn is_dosage_run(&self) -> bool {
        matches!(
            self,
            MoveReason::DailyDose | MoveReason::Expired | MoveReason::Shortfall
        )
    }
}

impl std::fmt::Display for MoveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MoveReason {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "receipt" => Ok(MoveReason::Receipt),
            "daily_dose" => Ok(MoveReason::DailyDose),
            "expired" => Ok(MoveReason::Expired),
            "adjustment" => Ok(MoveReason::Adjustment),
            "shortfall" => Ok(MoveReason::Shortfall),
            "reversal" => Ok(MoveReason::Reversal),
            other => Err(crate::Error::Validation(format!(
                "unknown move reason '{}'",
                other
            ))),
        }
    }
}

/// Immutable ledger entry recording a quantity change against a batch
///
/// Moves are only ever appended; a force re-run supersedes prior moves by
/// appending `Reversal` entries that name them, never by rewriting history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StockMove {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    /// The dosage date this move belongs to
    pub date: NaiveDate,
    pub medicine_id: String,
    /// None for shortfall records, which name no batch
    pub batch_id: Option<u64>,
    /// Negative for deductions, positive for restocks and reversals
    pub qty_change: i64,
    pub reason: MoveReason,
    pub note: Option<String>,
    /// Set only on reversal entries: the move being superseded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses: Option<Uuid>,
}

impl StockMove {
    pub fn daily_dose(medicine_id: &str, batch_id: u64, date: NaiveDate, qty: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: run_timestamp(date),
            date,
            medicine_id: medicine_id.to_string(),
            batch_id: Some(batch_id),
            qty_change: -i64::from(qty),
            reason: MoveReason::DailyDose,
            note: Some(format!("FEFO daily dosage {}", date)),
            reverses: None,
        }
    }

    pub fn expired(medicine_id: &str, batch_id: u64, date: NaiveDate, qty: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: run_timestamp(date),
            date,
            medicine_id: medicine_id.to_string(),
            batch_id: Some(batch_id),
            qty_change: -i64::from(qty),
            reason: MoveReason::Expired,
            note: Some(format!("auto-scrap expired before {}", date)),
            reverses: None,
        }
    }

    pub fn shortfall(medicine_id: &str, date: NaiveDate, missing: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: run_timestamp(date),
            date,
            medicine_id: medicine_id.to_string(),
            batch_id: None,
            qty_change: 0,
            reason: MoveReason::Shortfall,
            note: Some(format!("needed {} more units on {}", missing, date)),
            reverses: None,
        }
    }

    pub fn receipt(
        medicine_id: &str,
        batch_id: u64,
        date: NaiveDate,
        qty: u32,
        note: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            date,
            medicine_id: medicine_id.to_string(),
            batch_id: Some(batch_id),
            qty_change: i64::from(qty),
            reason: MoveReason::Receipt,
            note,
            reverses: None,
        }
    }

    pub fn adjustment(
        medicine_id: &str,
        batch_id: u64,
        date: NaiveDate,
        delta: i64,
        note: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            date,
            medicine_id: medicine_id.to_string(),
            batch_id: Some(batch_id),
            qty_change: delta,
            reason: MoveReason::Adjustment,
            note,
            reverses: None,
        }
    }

    /// Build the compensating entry for a prior dosage-run move.
    ///
    /// The reversal restores exactly the recorded quantity change; manual
    /// adjustments made since the original run are left untouched.
    pub fn reversal_of(original: &StockMove) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: run_timestamp(original.date),
            date: original.date,
            medicine_id: original.medicine_id.clone(),
            batch_id: original.batch_id,
            qty_change: -original.qty_change,
            reason: MoveReason::Reversal,
            note: Some(format!("supersedes {} move {}", original.reason, original.id)),
            reverses: Some(original.id),
        }
    }
}

/// Ledger timestamp for dosage-run entries: a fixed 20:00:00 stamp on the
/// run date keeps a day's entries grouped regardless of when the job ran.
pub fn run_timestamp(date: NaiveDate) -> DateTime<Utc> {
    match date.and_hms_opt(20, 0, 0) {
        Some(dt) => dt.and_utc(),
        None => Utc::now(),
    }
}
