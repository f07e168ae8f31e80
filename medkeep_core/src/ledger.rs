//! Append-only stock-move ledger.
//!
//! Moves are appended to a JSONL (JSON Lines) file with file locking to
//! ensure safe access. The ledger is the audit trail and the source of the
//! per-date idempotency state; entries are never rewritten, only superseded
//! by later `Reversal` entries.

use crate::types::StockMove;
use crate::Result;
use chrono::NaiveDate;
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Sink trait for persisting stock moves
pub trait LedgerSink {
    fn append_all(&mut self, moves: &[StockMove]) -> Result<()>;

    fn append(&mut self, mv: &StockMove) -> Result<()> {
        self.append_all(std::slice::from_ref(mv))
    }
}

/// JSONL-based ledger sink with file locking
pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl LedgerSink for JsonlLedger {
    /// Append a batch of moves under one exclusive lock and one fsync,
    /// so a medicine's transaction lands in the ledger as a unit.
    fn append_all(&mut self, moves: &[StockMove]) -> Result<()> {
        if moves.is_empty() {
            return Ok(());
        }
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let result = (|| -> Result<()> {
            let mut writer = std::io::BufWriter::new(&file);
            for mv in moves {
                let line = serde_json::to_string(mv)?;
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            file.sync_all()?;
            Ok(())
        })();

        file.unlock()?;
        result?;

        tracing::debug!("Appended {} moves to ledger", moves.len());
        Ok(())
    }
}

/// Read all moves from a ledger file
///
/// Unparsable lines are skipped with a warning rather than failing the read.
pub fn read_moves(path: &Path) -> Result<Vec<StockMove>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut moves = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<StockMove>(&line) {
            Ok(mv) => moves.push(mv),
            Err(e) => {
                tracing::warn!("Failed to parse move at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} moves from ledger", moves.len());
    Ok(moves)
}

/// Load the full move history: live JSONL merged with the archived CSV
///
/// Rollup moves entries from the JSONL into the CSV archive; readers merge
/// both so archival never changes the visible history. Duplicates (a move
/// present in both during a crash window) are dropped by id. The result is
/// sorted by timestamp ascending.
pub fn load_moves(ledger_path: &Path, archive_path: &Path) -> Result<Vec<StockMove>> {
    let mut moves = Vec::new();
    let mut seen_ids = HashSet::new();

    if ledger_path.exists() {
        for mv in read_moves(ledger_path)? {
            seen_ids.insert(mv.id);
            moves.push(mv);
        }
    }

    if archive_path.exists() {
        let mut archived = 0;
        for mv in crate::archive::read_archive(archive_path)? {
            if seen_ids.insert(mv.id) {
                moves.push(mv);
                archived += 1;
            }
        }
        tracing::debug!("Loaded {} moves from archive", archived);
    }

    moves.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.id.cmp(&b.id)));
    Ok(moves)
}

/// Ids of moves superseded by a reversal entry
pub fn reversed_ids(moves: &[StockMove]) -> HashSet<Uuid> {
    moves.iter().filter_map(|m| m.reverses).collect()
}

/// Live (unreversed) dosage-run moves for a (medicine, date) key
pub fn live_dosage_moves<'a>(
    moves: &'a [StockMove],
    medicine_id: &str,
    date: NaiveDate,
) -> Vec<&'a StockMove> {
    let reversed = reversed_ids(moves);
    moves
        .iter()
        .filter(|m| {
            m.medicine_id == medicine_id
                && m.date == date
                && m.reason.is_dosage_run()
                && !reversed.contains(&m.id)
        })
        .collect()
}

/// Whether a dosage run has already been applied for this (medicine, date)
pub fn is_applied(moves: &[StockMove], medicine_id: &str, date: NaiveDate) -> bool {
    !live_dosage_moves(moves, medicine_id, date).is_empty()
}
