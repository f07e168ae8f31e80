//! Read-only reporting queries over inventory state and the move ledger.
//!
//! Everything here derives from the persisted entities; nothing mutates.

use crate::inventory::Inventory;
use crate::types::{Batch, MoveReason, StockMove};
use chrono::NaiveDate;

/// Stock position of one medicine across all of its batches
#[derive(Clone, Debug)]
pub struct MedicineStock {
    pub medicine_id: String,
    pub name: String,
    pub unit: String,
    pub total_on_hand: u64,
    pub reorder_level: u32,
    pub units_per_day: u32,
}

impl MedicineStock {
    pub fn below_reorder(&self) -> bool {
        self.total_on_hand <= u64::from(self.reorder_level)
    }
}

/// Stock per medicine, sorted by name
pub fn stock_levels(inventory: &Inventory) -> Vec<MedicineStock> {
    let mut levels: Vec<MedicineStock> = inventory
        .medicines
        .values()
        .map(|m| MedicineStock {
            medicine_id: m.id.clone(),
            name: m.name.clone(),
            unit: m.unit.clone(),
            total_on_hand: inventory.total_stock(&m.id),
            reorder_level: m.reorder_level,
            units_per_day: inventory.units_per_day(&m.id),
        })
        .collect();
    levels.sort_by(|a, b| a.name.cmp(&b.name));
    levels
}

/// Medicines at or below their reorder level, lowest stock first
pub fn low_stock(inventory: &Inventory) -> Vec<MedicineStock> {
    let mut low: Vec<MedicineStock> = stock_levels(inventory)
        .into_iter()
        .filter(|s| s.below_reorder())
        .collect();
    low.sort_by(|a, b| a.total_on_hand.cmp(&b.total_on_hand).then(a.name.cmp(&b.name)));
    low
}

/// A daily-plan medicine running low, with its days of cover
#[derive(Clone, Debug)]
pub struct LowStockAlert {
    pub medicine_id: String,
    pub name: String,
    pub total_on_hand: u64,
    pub reorder_level: u32,
    pub units_per_day: u32,
    /// alert_factor x reorder_level
    pub alert_level: f64,
    pub days_cover: f64,
}

/// Early-warning alerts: daily-plan medicines whose stock is below
/// `alert_factor` times their reorder level (1.5 by default).
pub fn alerts(inventory: &Inventory, alert_factor: f64) -> Vec<LowStockAlert> {
    let mut alerts: Vec<LowStockAlert> = stock_levels(inventory)
        .into_iter()
        .filter(|s| s.units_per_day > 0 && s.reorder_level > 0)
        .filter(|s| (s.total_on_hand as f64) < alert_factor * f64::from(s.reorder_level))
        .map(|s| LowStockAlert {
            alert_level: alert_factor * f64::from(s.reorder_level),
            days_cover: s.total_on_hand as f64 / f64::from(s.units_per_day),
            medicine_id: s.medicine_id,
            name: s.name,
            total_on_hand: s.total_on_hand,
            reorder_level: s.reorder_level,
            units_per_day: s.units_per_day,
        })
        .collect();
    alerts.sort_by(|a, b| a.total_on_hand.cmp(&b.total_on_hand).then(a.name.cmp(&b.name)));
    alerts
}

/// Batches in FEFO order, optionally restricted to one medicine and to
/// batches still in stock
pub fn batches_fefo(
    inventory: &Inventory,
    medicine_id: Option<&str>,
    in_stock_only: bool,
) -> Vec<Batch> {
    let mut batches: Vec<Batch> = inventory
        .batches
        .values()
        .filter(|b| medicine_id.map_or(true, |m| b.medicine_id == m))
        .filter(|b| !in_stock_only || b.quantity > 0)
        .cloned()
        .collect();
    batches.sort_by(|a, b| {
        a.medicine_id
            .cmp(&b.medicine_id)
            .then(a.fefo_key().cmp(&b.fefo_key()))
    });
    batches
}

/// Stocked batches expiring within `window_days` of `on` (already-expired
/// stock is included; it will be scrapped by the next run)
pub fn expiring_soon(inventory: &Inventory, on: NaiveDate, window_days: u32) -> Vec<Batch> {
    let horizon = on + chrono::Duration::days(i64::from(window_days));
    let mut batches: Vec<Batch> = inventory
        .batches
        .values()
        .filter(|b| b.quantity > 0)
        .filter(|b| matches!(b.expiry, Some(e) if e <= horizon))
        .cloned()
        .collect();
    batches.sort_by_key(|b| b.fefo_key());
    batches
}

/// Filter for the ledger view
#[derive(Clone, Debug, Default)]
pub struct MoveFilter {
    pub date: Option<NaiveDate>,
    pub medicine_id: Option<String>,
    pub reason: Option<MoveReason>,
    /// Maximum rows returned; 0 means unlimited
    pub limit: usize,
}

/// Ledger entries matching the filter, newest first
pub fn filter_moves(moves: &[StockMove], filter: &MoveFilter) -> Vec<StockMove> {
    let mut matched: Vec<StockMove> = moves
        .iter()
        .filter(|m| filter.date.map_or(true, |d| m.date == d))
        .filter(|m| {
            filter
                .medicine_id
                .as_deref()
                .map_or(true, |id| m.medicine_id == id)
        })
        .filter(|m| filter.reason.map_or(true, |r| m.reason == r))
        .cloned()
        .collect();
    matched.sort_by(|a, b| b.ts.cmp(&a.ts).then(b.id.cmp(&a.id)));
    if filter.limit > 0 {
        matched.truncate(filter.limit);
    }
    matched
}
