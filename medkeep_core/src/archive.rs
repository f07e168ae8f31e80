//! CSV archival for the stock-move ledger.
//!
//! Rolls the live JSONL ledger into a long-term CSV archive atomically.
//! The archive is fsynced before the JSONL is retired, and readers merge
//! both files, so archival never loses or duplicates audit history.

use crate::types::{MoveReason, StockMove};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::fs::OpenOptions;
use std::path::Path;
use uuid::Uuid;

/// A row in the CSV archive
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CsvRow {
    id: String,
    ts: String,
    date: String,
    medicine_id: String,
    batch_id: Option<u64>,
    qty_change: i64,
    reason: String,
    note: Option<String>,
    reverses: Option<String>,
}

impl From<&StockMove> for CsvRow {
    fn from(mv: &StockMove) -> Self {
        CsvRow {
            id: mv.id.to_string(),
            ts: mv.ts.to_rfc3339(),
            date: mv.date.to_string(),
            medicine_id: mv.medicine_id.clone(),
            batch_id: mv.batch_id,
            qty_change: mv.qty_change,
            reason: mv.reason.to_string(),
            note: mv.note.clone(),
            reverses: mv.reverses.map(|id| id.to_string()),
        }
    }
}

impl TryFrom<CsvRow> for StockMove {
    type Error = crate::Error;

    fn try_from(row: CsvRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| crate::Error::Validation(format!("invalid move id: {}", e)))?;

        let ts = DateTime::parse_from_rfc3339(&row.ts)
            .map_err(|e| crate::Error::Validation(format!("invalid timestamp: {}", e)))?
            .with_timezone(&Utc);

        let date = row
            .date
            .parse::<NaiveDate>()
            .map_err(|e| crate::Error::Validation(format!("invalid date: {}", e)))?;

        let reason: MoveReason = row.reason.parse()?;

        let reverses = match row.reverses.as_deref() {
            None | Some("") => None,
            Some(s) => Some(
                Uuid::parse_str(s)
                    .map_err(|e| crate::Error::Validation(format!("invalid reversal id: {}", e)))?,
            ),
        };

        Ok(StockMove {
            id,
            ts,
            date,
            medicine_id: row.medicine_id,
            batch_id: row.batch_id,
            qty_change: row.qty_change,
            reason,
            note: row.note,
            reverses,
        })
    }
}

/// Roll up ledger moves into the CSV archive and retire the JSONL atomically
///
/// This function:
/// 1. Reads all moves from the JSONL ledger
/// 2. Appends them to the CSV archive (creates with headers if needed)
/// 3. Syncs the CSV to disk
/// 4. Renames the ledger to .processed
/// 5. Returns the number of moves processed
///
/// # Safety
/// - CSV is fsynced before the ledger is renamed
/// - The ledger is renamed (not deleted) to allow manual recovery if needed
pub fn ledger_to_csv_and_archive(ledger_path: &Path, csv_path: &Path) -> Result<usize> {
    let moves = crate::ledger::read_moves(ledger_path)?;

    if moves.is_empty() {
        tracing::info!("No moves in ledger to roll up");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for mv in &moves {
        let row = CsvRow::from(mv);
        writer.serialize(row)?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Wrote {} moves to CSV archive", moves.len());

    let processed_path = ledger_path.with_extension("jsonl.processed");
    std::fs::rename(ledger_path, &processed_path)?;

    tracing::info!("Retired ledger to {:?}", processed_path);

    Ok(moves.len())
}

/// Read all archived moves from a CSV file
///
/// Rows that fail to parse are skipped with a warning, matching the
/// ledger reader's behaviour.
pub fn read_archive(path: &Path) -> Result<Vec<StockMove>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;

    let mut moves = Vec::new();
    for result in reader.deserialize::<CsvRow>() {
        match result {
            Ok(row) => match StockMove::try_from(row) {
                Ok(mv) => moves.push(mv),
                Err(e) => {
                    tracing::warn!("Failed to parse archived move: {}", e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to deserialize archive row: {}", e);
            }
        }
    }

    Ok(moves)
}

/// Clean up retired ledger files
///
/// Removes all .processed files in the given directory.
pub fn cleanup_processed(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if let Some(extension) = path.extension() {
            if extension == "processed" {
                std::fs::remove_file(&path)?;
                tracing::debug!("Removed retired ledger: {:?}", path);
                count += 1;
            }
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} retired ledger files", count);
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{JsonlLedger, LedgerSink};
    use std::fs::File;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_rollup_creates_archive_and_retires_ledger() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger_path = temp_dir.path().join("stock_moves.jsonl");
        let csv_path = temp_dir.path().join("stock_moves.csv");

        let mut sink = JsonlLedger::new(&ledger_path);
        for i in 0..3 {
            sink.append(&StockMove::daily_dose("para", i, date("2025-01-15"), 1))
                .unwrap();
        }

        let count = ledger_to_csv_and_archive(&ledger_path, &csv_path).unwrap();
        assert_eq!(count, 3);

        assert!(csv_path.exists());
        assert!(!ledger_path.exists());
        assert!(ledger_path.with_extension("jsonl.processed").exists());
    }

    #[test]
    fn test_rollup_appends_across_runs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger_path = temp_dir.path().join("stock_moves.jsonl");
        let csv_path = temp_dir.path().join("stock_moves.csv");

        JsonlLedger::new(&ledger_path)
            .append(&StockMove::daily_dose("para", 1, date("2025-01-15"), 1))
            .unwrap();
        assert_eq!(ledger_to_csv_and_archive(&ledger_path, &csv_path).unwrap(), 1);

        JsonlLedger::new(&ledger_path)
            .append(&StockMove::daily_dose("para", 1, date("2025-01-16"), 1))
            .unwrap();
        assert_eq!(ledger_to_csv_and_archive(&ledger_path, &csv_path).unwrap(), 1);

        let archived = read_archive(&csv_path).unwrap();
        assert_eq!(archived.len(), 2);
    }

    #[test]
    fn test_archive_roundtrip_preserves_fields() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger_path = temp_dir.path().join("stock_moves.jsonl");
        let csv_path = temp_dir.path().join("stock_moves.csv");

        let original = StockMove::daily_dose("para", 4, date("2025-01-15"), 3);
        let reversal = StockMove::reversal_of(&original);
        let shortfall = StockMove::shortfall("para", date("2025-01-15"), 2);

        JsonlLedger::new(&ledger_path)
            .append_all(&[original.clone(), reversal.clone(), shortfall.clone()])
            .unwrap();
        ledger_to_csv_and_archive(&ledger_path, &csv_path).unwrap();

        let archived = read_archive(&csv_path).unwrap();
        assert_eq!(archived.len(), 3);

        let got_reversal = archived.iter().find(|m| m.id == reversal.id).unwrap();
        assert_eq!(got_reversal.reverses, Some(original.id));
        assert_eq!(got_reversal.qty_change, 3);

        let got_shortfall = archived.iter().find(|m| m.id == shortfall.id).unwrap();
        assert_eq!(got_shortfall.batch_id, None);
        assert_eq!(got_shortfall.qty_change, 0);
    }

    #[test]
    fn test_empty_ledger() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger_path = temp_dir.path().join("empty.jsonl");
        let csv_path = temp_dir.path().join("stock_moves.csv");

        File::create(&ledger_path).unwrap();

        let count = ledger_to_csv_and_archive(&ledger_path, &csv_path).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_merged_view_unchanged_by_rollup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger_path = temp_dir.path().join("stock_moves.jsonl");
        let csv_path = temp_dir.path().join("stock_moves.csv");

        let mv = StockMove::daily_dose("para", 1, date("2025-01-15"), 3);
        JsonlLedger::new(&ledger_path).append(&mv).unwrap();

        let before = crate::ledger::load_moves(&ledger_path, &csv_path).unwrap();
        ledger_to_csv_and_archive(&ledger_path, &csv_path).unwrap();
        let after = crate::ledger::load_moves(&ledger_path, &csv_path).unwrap();

        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].id, after[0].id);
    }

    #[test]
    fn test_cleanup_processed() {
        let temp_dir = tempfile::tempdir().unwrap();

        File::create(temp_dir.path().join("a.jsonl.processed")).unwrap();
        File::create(temp_dir.path().join("b.jsonl.processed")).unwrap();
        File::create(temp_dir.path().join("keep.jsonl")).unwrap();

        let count = cleanup_processed(temp_dir.path()).unwrap();
        assert_eq!(count, 2);

        assert!(!temp_dir.path().join("a.jsonl.processed").exists());
        assert!(temp_dir.path().join("keep.jsonl").exists());
    }
}
