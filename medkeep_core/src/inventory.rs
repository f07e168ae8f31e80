//! In-memory inventory aggregate: suppliers, medicines, batches, schedules.
//!
//! The inventory is the persisted snapshot of the store (see `store`).
//! Batch quantities only decrease through the dosage run; receipts and
//! manual adjustments go through the same ledger-recording paths.

use crate::types::*;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// The complete inventory state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub suppliers: HashMap<String, Supplier>,
    #[serde(default)]
    pub medicines: HashMap<String, Medicine>,
    #[serde(default)]
    pub batches: BTreeMap<u64, Batch>,
    /// Keyed by medicine id
    #[serde(default)]
    pub schedules: HashMap<String, DoseSchedule>,
    #[serde(default = "first_batch_id")]
    next_batch_id: u64,
}

fn first_batch_id() -> u64 {
    1
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            suppliers: HashMap::new(),
            medicines: HashMap::new(),
            batches: BTreeMap::new(),
            schedules: HashMap::new(),
            next_batch_id: first_batch_id(),
        }
    }
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next store-assigned batch id
    pub fn allocate_batch_id(&mut self) -> u64 {
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        id
    }

    /// Find a batch by its external (medicine, batch_no) key
    pub fn find_batch(&self, medicine_id: &str, batch_no: &str) -> Option<&Batch> {
        self.batches
            .values()
            .find(|b| b.medicine_id == medicine_id && b.batch_no == batch_no)
    }

    /// Receive stock into a batch, creating it if needed.
    ///
    /// Upserts by (medicine_id, batch_no): an existing batch has the
    /// quantity added and a missing expiry filled in; a new batch gets a
    /// fresh id. Returns the batch id and its new quantity.
    pub fn receive(
        &mut self,
        medicine_id: &str,
        batch_no: &str,
        qty: u32,
        expiry: Option<NaiveDate>,
    ) -> Result<(u64, u32)> {
        if !self.medicines.contains_key(medicine_id) {
            return Err(Error::Validation(format!(
                "unknown medicine '{}'",
                medicine_id
            )));
        }

        if let Some(id) = self.find_batch(medicine_id, batch_no).map(|b| b.id) {
            let batch = self
                .batches
                .get_mut(&id)
                .ok_or_else(|| Error::Inventory(format!("batch {} vanished", id)))?;
            batch.quantity += qty;
            if batch.expiry.is_none() {
                batch.expiry = expiry;
            }
            return Ok((id, batch.quantity));
        }

        let id = self.allocate_batch_id();
        self.batches.insert(
            id,
            Batch {
                id,
                medicine_id: medicine_id.to_string(),
                batch_no: batch_no.to_string(),
                quantity: qty,
                expiry,
            },
        );
        Ok((id, qty))
    }

    /// Set a batch to an exact quantity, returning the signed delta
    pub fn adjust_batch(&mut self, batch_id: u64, new_qty: u32) -> Result<i64> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| Error::Validation(format!("unknown batch {}", batch_id)))?;
        let delta = i64::from(new_qty) - i64::from(batch.quantity);
        batch.quantity = new_qty;
        Ok(delta)
    }

    /// Draw down a batch by exactly `qty` units
    pub fn deduct(&mut self, batch_id: u64, qty: u32) -> Result<()> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| Error::Inventory(format!("unknown batch {}", batch_id)))?;
        batch.quantity = batch.quantity.checked_sub(qty).ok_or_else(|| {
            Error::Inventory(format!(
                "over-draw on batch {}: {} > {}",
                batch_id, qty, batch.quantity
            ))
        })?;
        Ok(())
    }

    /// Restore previously deducted units to a batch (force re-run reversal)
    pub fn restore(&mut self, batch_id: u64, qty: u32) -> Result<()> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| Error::Inventory(format!("unknown batch {}", batch_id)))?;
        batch.quantity += qty;
        Ok(())
    }

    /// Batches eligible for allocation on `date`: in stock and not expired
    /// before the date, in FEFO order (expiry ascending, no-expiry last,
    /// batch id tie-break).
    pub fn eligible_batches(&self, medicine_id: &str, date: NaiveDate) -> Vec<Batch> {
        let mut batches: Vec<Batch> = self
            .batches
            .values()
            .filter(|b| {
                b.medicine_id == medicine_id && b.quantity > 0 && !b.expired_before(date)
            })
            .cloned()
            .collect();
        batches.sort_by_key(|b| b.fefo_key());
        batches
    }

    /// Stocked batches that expired strictly before `date`
    pub fn expired_batches(&self, medicine_id: &str, date: NaiveDate) -> Vec<Batch> {
        let mut batches: Vec<Batch> = self
            .batches
            .values()
            .filter(|b| b.medicine_id == medicine_id && b.quantity > 0 && b.expired_before(date))
            .cloned()
            .collect();
        batches.sort_by_key(|b| b.fefo_key());
        batches
    }

    /// Total on-hand quantity across all of a medicine's batches
    pub fn total_stock(&self, medicine_id: &str) -> u64 {
        self.batches
            .values()
            .filter(|b| b.medicine_id == medicine_id)
            .map(|b| u64::from(b.quantity))
            .sum()
    }

    pub fn units_per_day(&self, medicine_id: &str) -> u32 {
        self.schedules
            .get(medicine_id)
            .map(|s| s.units_per_day())
            .unwrap_or(0)
    }

    /// Requirements due on `date`: every scheduled medicine with a daily
    /// total above zero, sorted by medicine id for a deterministic run order.
    pub fn due_requirements(&self, date: NaiveDate) -> Vec<DosageRequirement> {
        let mut due: Vec<DosageRequirement> = self
            .schedules
            .values()
            .filter(|s| s.units_per_day() > 0)
            .map(|s| DosageRequirement {
                medicine_id: s.medicine_id.clone(),
                date,
                quantity: s.units_per_day(),
            })
            .collect();
        due.sort_by(|a, b| a.medicine_id.cmp(&b.medicine_id));
        due
    }

    /// Validate the inventory for consistency and referential integrity
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, medicine) in &self.medicines {
            if id.is_empty() || medicine.id.is_empty() {
                errors.push("Medicine has empty ID".to_string());
            }
            if id != &medicine.id {
                errors.push(format!(
                    "Medicine key '{}' doesn't match medicine.id '{}'",
                    id, medicine.id
                ));
            }
            if medicine.name.is_empty() {
                errors.push(format!("Medicine '{}' has empty name", id));
            }
            if let Some(supplier_id) = &medicine.supplier_id {
                if !self.suppliers.contains_key(supplier_id) {
                    errors.push(format!(
                        "Medicine '{}' references non-existent supplier '{}'",
                        id, supplier_id
                    ));
                }
            }
        }

        let mut seen_labels = HashSet::new();
        for (id, batch) in &self.batches {
            if id != &batch.id {
                errors.push(format!(
                    "Batch key {} doesn't match batch.id {}",
                    id, batch.id
                ));
            }
            if batch.id >= self.next_batch_id {
                errors.push(format!(
                    "Batch {} is ahead of the id allocator ({})",
                    batch.id, self.next_batch_id
                ));
            }
            if !self.medicines.contains_key(&batch.medicine_id) {
                errors.push(format!(
                    "Batch {} references non-existent medicine '{}'",
                    batch.id, batch.medicine_id
                ));
            }
            if batch.batch_no.is_empty() {
                errors.push(format!("Batch {} has empty batch_no", batch.id));
            }
            if !seen_labels.insert((batch.medicine_id.clone(), batch.batch_no.clone())) {
                errors.push(format!(
                    "Duplicate batch '{}' for medicine '{}'",
                    batch.batch_no, batch.medicine_id
                ));
            }
        }

        for (id, schedule) in &self.schedules {
            if id != &schedule.medicine_id {
                errors.push(format!(
                    "Schedule key '{}' doesn't match schedule.medicine_id '{}'",
                    id, schedule.medicine_id
                ));
            }
            if !self.medicines.contains_key(&schedule.medicine_id) {
                errors.push(format!(
                    "Schedule references non-existent medicine '{}'",
                    schedule.medicine_id
                ));
            }
        }

        errors
    }
}
