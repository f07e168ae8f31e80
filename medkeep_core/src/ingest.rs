//! CSV ingestion of suppliers, medicines, batches and dose schedules.
//!
//! Reads up to four files from a directory (`suppliers.csv`,
//! `medicines.csv`, `batches.csv`, `dosage.csv`); missing files are
//! skipped. Rows are cleaned the way the spreadsheets arrive: ids
//! trimmed, quantities coerced to non-negative integers, dates ISO,
//! duplicate batch rows keep the last occurrence. Upserts replace by
//! primary key; rows absent from a file are left untouched.

use crate::inventory::Inventory;
use crate::types::{DoseSchedule, Medicine, Supplier};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Counts of rows applied per entity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub suppliers: usize,
    pub medicines: usize,
    pub batches: usize,
    pub schedules: usize,
}

#[derive(Debug, Deserialize)]
struct SupplierRow {
    supplier_id: String,
    supplier_name: String,
    #[serde(default)]
    lead_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MedicineRow {
    id: String,
    medicine_name: String,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    salt: Option<String>,
    #[serde(default)]
    uses: Option<String>,
    #[serde(default)]
    supplier_id: Option<String>,
    #[serde(default)]
    reorder_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchRow {
    medicine_id: String,
    batch_no: String,
    #[serde(default)]
    stock_units: Option<String>,
    #[serde(default)]
    expiry_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DosageRow {
    medicine_id: String,
    #[serde(default)]
    before_bf: Option<String>,
    #[serde(default)]
    after_bf: Option<String>,
    #[serde(default)]
    at_8pm: Option<String>,
    #[serde(default)]
    after_dinner: Option<String>,
}

/// Ingest all CSV files found in `dir` into the inventory.
///
/// The updated inventory is validated before returning; a referential
/// integrity failure rejects the whole ingest so nothing inconsistent
/// is ever persisted.
pub fn ingest_dir(inventory: &mut Inventory, dir: &Path) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    let suppliers_path = dir.join("suppliers.csv");
    if suppliers_path.exists() {
        summary.suppliers = ingest_suppliers(inventory, &suppliers_path)?;
    } else {
        tracing::info!("No suppliers.csv in {:?}, skipping", dir);
    }

    let medicines_path = dir.join("medicines.csv");
    if medicines_path.exists() {
        summary.medicines = ingest_medicines(inventory, &medicines_path)?;
    } else {
        tracing::info!("No medicines.csv in {:?}, skipping", dir);
    }

    let batches_path = dir.join("batches.csv");
    if batches_path.exists() {
        summary.batches = ingest_batches(inventory, &batches_path)?;
    } else {
        tracing::info!("No batches.csv in {:?}, skipping", dir);
    }

    let dosage_path = dir.join("dosage.csv");
    if dosage_path.exists() {
        summary.schedules = ingest_dosage(inventory, &dosage_path)?;
    } else {
        tracing::info!("No dosage.csv in {:?}, skipping", dir);
    }

    let errors = inventory.validate();
    if !errors.is_empty() {
        return Err(Error::Validation(format!(
            "ingest produced an inconsistent inventory: {}",
            errors.join("; ")
        )));
    }

    tracing::info!(
        "Ingested {} suppliers, {} medicines, {} batches, {} schedules",
        summary.suppliers,
        summary.medicines,
        summary.batches,
        summary.schedules
    );

    Ok(summary)
}

fn ingest_suppliers(inventory: &mut Inventory, path: &Path) -> Result<usize> {
    let mut count = 0;
    for row in read_rows::<SupplierRow>(path)? {
        let id = row.supplier_id.trim().to_string();
        if id.is_empty() {
            tracing::warn!("Skipping supplier row with empty id");
            continue;
        }
        inventory.suppliers.insert(
            id.clone(),
            Supplier {
                id,
                name: row.supplier_name.trim().to_string(),
                lead_time_days: parse_units(row.lead_time.as_deref()),
            },
        );
        count += 1;
    }
    Ok(count)
}

fn ingest_medicines(inventory: &mut Inventory, path: &Path) -> Result<usize> {
    let mut count = 0;
    for row in read_rows::<MedicineRow>(path)? {
        let id = row.id.trim().to_string();
        if id.is_empty() {
            tracing::warn!("Skipping medicine row with empty id");
            continue;
        }
        inventory.medicines.insert(
            id.clone(),
            Medicine {
                id,
                name: row.medicine_name.trim().to_string(),
                unit: non_empty(row.unit).unwrap_or_else(|| "unit".to_string()),
                salt: non_empty(row.salt),
                uses: non_empty(row.uses),
                reorder_level: parse_units(row.reorder_level.as_deref()),
                supplier_id: non_empty(row.supplier_id),
            },
        );
        count += 1;
    }
    Ok(count)
}

fn ingest_batches(inventory: &mut Inventory, path: &Path) -> Result<usize> {
    // Deduplicate on (medicine_id, batch_no), keeping the last row.
    let mut rows: HashMap<(String, String), BatchRow> = HashMap::new();
    for row in read_rows::<BatchRow>(path)? {
        let key = (
            row.medicine_id.trim().to_string(),
            row.batch_no.trim().to_string(),
        );
        if key.0.is_empty() || key.1.is_empty() {
            tracing::warn!("Skipping batch row with empty key");
            continue;
        }
        rows.insert(key, row);
    }

    let mut count = 0;
    let mut keys: Vec<(String, String)> = rows.keys().cloned().collect();
    keys.sort();
    for key in keys {
        let row = &rows[&key];
        let (medicine_id, batch_no) = key;
        let quantity = parse_units(row.stock_units.as_deref());
        let expiry = parse_date(row.expiry_date.as_deref());

        // Replace quantity and expiry, preserving the id of a known batch.
        if let Some(id) = inventory.find_batch(&medicine_id, &batch_no).map(|b| b.id) {
            if let Some(batch) = inventory.batches.get_mut(&id) {
                batch.quantity = quantity;
                batch.expiry = expiry;
            }
        } else {
            let id = inventory.allocate_batch_id();
            inventory.batches.insert(
                id,
                crate::types::Batch {
                    id,
                    medicine_id,
                    batch_no,
                    quantity,
                    expiry,
                },
            );
        }
        count += 1;
    }
    Ok(count)
}

fn ingest_dosage(inventory: &mut Inventory, path: &Path) -> Result<usize> {
    let mut count = 0;
    for row in read_rows::<DosageRow>(path)? {
        let medicine_id = row.medicine_id.trim().to_string();
        if medicine_id.is_empty() {
            tracing::warn!("Skipping dosage row with empty medicine id");
            continue;
        }
        inventory.schedules.insert(
            medicine_id.clone(),
            DoseSchedule {
                medicine_id,
                before_breakfast: parse_units(row.before_bf.as_deref()),
                after_breakfast: parse_units(row.after_bf.as_deref()),
                at_8pm: parse_units(row.at_8pm.as_deref()),
                after_dinner: parse_units(row.after_dinner.as_deref()),
            },
        );
        count += 1;
    }
    Ok(count)
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!("Skipping unreadable row in {:?}: {}", path, e);
            }
        }
    }
    Ok(rows)
}

/// Coerce a spreadsheet cell to a non-negative unit count; anything
/// unparsable counts as zero.
fn parse_units(raw: Option<&str>) -> u32 {
    let Some(s) = raw else { return 0 };
    let s = s.trim();
    if s.is_empty() {
        return 0;
    }
    if let Ok(n) = s.parse::<i64>() {
        return u32::try_from(n.max(0)).unwrap_or(0);
    }
    if let Ok(f) = s.parse::<f64>() {
        return u32::try_from((f.max(0.0)) as i64).unwrap_or(0);
    }
    tracing::warn!("Unparsable unit count '{}', treating as 0", s);
    0
}

/// Parse an ISO date cell; a datetime suffix is tolerated and dropped
fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let s = raw?.trim();
    if s.is_empty() {
        return None;
    }
    let candidate = if s.len() > 10 {
        s.get(..10).unwrap_or(s)
    } else {
        s
    };
    match candidate.parse::<NaiveDate>() {
        Ok(d) => Some(d),
        Err(e) => {
            tracing::warn!("Unparsable expiry date '{}': {}", s, e);
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
