//! File-backed store with per-medicine transactional commits.
//!
//! The inventory snapshot is a JSON file written atomically (temp file,
//! fsync, rename) under an exclusive lock; the stock-move ledger is an
//! append-only JSONL (see `ledger`). A transaction stages a copy of the
//! inventory plus its ledger entries and makes both durable on commit:
//! the staged snapshot is fully written and fsynced before anything
//! becomes visible, so a failed commit leaves the store untouched.
//!
//! Single-writer semantics are a precondition of the dosage run; the file
//! locks guard against torn reads and writes, not concurrent logical
//! writers.

use crate::inventory::Inventory;
use crate::ledger::{JsonlLedger, LedgerSink};
use crate::types::{DosageRequirement, StockMove};
use crate::{Error, Result};
use chrono::NaiveDate;
use fs2::FileExt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File layout under the data directory
#[derive(Clone, Debug)]
pub struct StorePaths {
    data_dir: PathBuf,
}

impl StorePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn inventory(&self) -> PathBuf {
        self.data_dir.join("inventory.json")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn ledger(&self) -> PathBuf {
        self.ledger_dir().join("stock_moves.jsonl")
    }

    pub fn archive(&self) -> PathBuf {
        self.data_dir.join("stock_moves.csv")
    }
}

/// The persistent store: inventory snapshot plus stock-move ledger
pub struct Store {
    paths: StorePaths,
    inventory: Inventory,
}

impl Store {
    /// Open an existing store; the snapshot must already exist
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let paths = StorePaths::new(data_dir);
        let inventory_path = paths.inventory();
        if !inventory_path.exists() {
            return Err(Error::Validation(format!(
                "no inventory snapshot at {:?}; run `init` or `ingest` first",
                inventory_path
            )));
        }
        let inventory = load_snapshot(&inventory_path)?;
        Ok(Self { paths, inventory })
    }

    /// Open a store, starting from an empty inventory if none exists yet
    ///
    /// Nothing is written until the first commit.
    pub fn open_or_create(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let paths = StorePaths::new(data_dir);
        let inventory_path = paths.inventory();
        let inventory = if inventory_path.exists() {
            load_snapshot(&inventory_path)?
        } else {
            tracing::info!("No inventory snapshot at {:?}, starting empty", inventory_path);
            Inventory::new()
        };
        Ok(Self { paths, inventory })
    }

    /// Create the data directory and an empty snapshot if missing
    ///
    /// An existing snapshot is left untouched.
    pub fn init(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::open_or_create(data_dir)?;
        if !store.paths.inventory().exists() {
            let empty = store.inventory.clone();
            store.commit_inventory(empty)?;
        }
        Ok(store)
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Full move history: live ledger merged with the CSV archive
    pub fn load_all_moves(&self) -> Result<Vec<StockMove>> {
        crate::ledger::load_moves(&self.paths.ledger(), &self.paths.archive())
    }

    pub fn due_requirements(&self, date: NaiveDate) -> Vec<DosageRequirement> {
        self.inventory.due_requirements(date)
    }

    /// Begin a transaction: stages a copy of the inventory to mutate
    pub fn begin(&mut self) -> Transaction<'_> {
        Transaction {
            staged: self.inventory.clone(),
            moves: Vec::new(),
            store: self,
        }
    }

    /// Replace the whole inventory in one commit, with no ledger entries
    /// (ingestion and init go through here).
    pub fn commit_inventory(&mut self, inventory: Inventory) -> Result<()> {
        self.persist(&inventory, &[])?;
        self.inventory = inventory;
        Ok(())
    }

    /// Receive stock: upsert the batch and record a `Receipt` move
    pub fn receive(
        &mut self,
        medicine_id: &str,
        batch_no: &str,
        qty: u32,
        expiry: Option<NaiveDate>,
        date: NaiveDate,
        note: Option<String>,
    ) -> Result<(u64, u32)> {
        let mut txn = self.begin();
        let (batch_id, new_qty) = txn.inventory_mut().receive(medicine_id, batch_no, qty, expiry)?;
        txn.record(StockMove::receipt(medicine_id, batch_id, date, qty, note));
        txn.commit()?;
        Ok((batch_id, new_qty))
    }

    /// Set a batch to an exact quantity and record the delta as an
    /// `Adjustment` move
    pub fn adjust(
        &mut self,
        batch_id: u64,
        new_qty: u32,
        date: NaiveDate,
        note: Option<String>,
    ) -> Result<i64> {
        let mut txn = self.begin();
        let medicine_id = txn
            .inventory()
            .batches
            .get(&batch_id)
            .map(|b| b.medicine_id.clone())
            .ok_or_else(|| Error::Validation(format!("unknown batch {}", batch_id)))?;
        let delta = txn.inventory_mut().adjust_batch(batch_id, new_qty)?;
        txn.record(StockMove::adjustment(&medicine_id, batch_id, date, delta, note));
        txn.commit()?;
        Ok(delta)
    }

    /// Make a staged inventory and its moves durable.
    ///
    /// Order matters: the snapshot is staged and fsynced first, the ledger
    /// entries are appended and fsynced next, and only then is the snapshot
    /// renamed into place. A failure at any earlier step leaves the visible
    /// store exactly as it was.
    fn persist(&self, staged: &Inventory, moves: &[StockMove]) -> Result<()> {
        let inventory_path = self.paths.inventory();
        let temp = stage_snapshot(staged, &inventory_path)?;

        if !moves.is_empty() {
            let mut sink = JsonlLedger::new(self.paths.ledger());
            sink.append_all(moves)
                .map_err(|e| Error::Persistence(format!("ledger append failed: {}", e)))?;
        }

        temp.persist(&inventory_path)
            .map_err(|e| Error::Persistence(format!("snapshot rename failed: {}", e.error)))?;

        tracing::debug!("Committed snapshot to {:?}", inventory_path);
        Ok(())
    }
}

/// A staged unit of work: one atomic commit per medicine
///
/// Dropping a transaction without committing discards the staged changes.
pub struct Transaction<'a> {
    store: &'a mut Store,
    staged: Inventory,
    moves: Vec<StockMove>,
}

impl Transaction<'_> {
    pub fn inventory(&self) -> &Inventory {
        &self.staged
    }

    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.staged
    }

    pub fn record(&mut self, mv: StockMove) {
        self.moves.push(mv);
    }

    pub fn staged_moves(&self) -> &[StockMove] {
        &self.moves
    }

    /// Reverse the live dosage-run moves for a (medicine, date) key:
    /// restores each recorded deduction to its batch and stages reversal
    /// entries naming the superseded moves. Returns how many moves were
    /// reversed.
    pub fn reverse_dosage_moves(
        &mut self,
        history: &[StockMove],
        medicine_id: &str,
        date: NaiveDate,
    ) -> Result<usize> {
        let prior: Vec<StockMove> = crate::ledger::live_dosage_moves(history, medicine_id, date)
            .into_iter()
            .cloned()
            .collect();
        for mv in &prior {
            if let (Some(batch_id), true) = (mv.batch_id, mv.qty_change < 0) {
                let restore = u32::try_from(-mv.qty_change).unwrap_or(0);
                self.staged.restore(batch_id, restore)?;
            }
            self.moves.push(StockMove::reversal_of(mv));
        }
        Ok(prior.len())
    }

    /// Commit the staged inventory and ledger entries; returns the moves
    /// that were made durable.
    pub fn commit(self) -> Result<Vec<StockMove>> {
        let Transaction {
            store,
            staged,
            moves,
        } = self;
        store.persist(&staged, &moves)?;
        store.inventory = staged;
        Ok(moves)
    }
}

/// Load an inventory snapshot with shared locking
///
/// Unlike transient caches, a corrupt stock snapshot is a hard error:
/// falling back to an empty inventory would silently erase stock.
fn load_snapshot(path: &Path) -> Result<Inventory> {
    let file = File::open(path)?;
    file.lock_shared()?;

    let mut contents = String::new();
    let mut reader = std::io::BufReader::new(&file);
    let read_result = reader.read_to_string(&mut contents);
    file.unlock()?;
    read_result?;

    let inventory: Inventory = serde_json::from_str(&contents).map_err(|e| {
        Error::Persistence(format!("corrupt inventory snapshot {:?}: {}", path, e))
    })?;

    tracing::debug!("Loaded inventory snapshot from {:?}", path);
    Ok(inventory)
}

/// Write a snapshot to a temp file in the target directory, fsynced but
/// not yet visible; the caller renames it into place to publish.
fn stage_snapshot(inventory: &Inventory, path: &Path) -> Result<NamedTempFile> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp = NamedTempFile::new_in(path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "snapshot path missing parent")
    })?)?;

    temp.as_file().lock_exclusive()?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        let contents = serde_json::to_string(inventory)?;
        writer.write_all(contents.as_bytes())?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DoseSchedule, Medicine, MoveReason};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn seeded_store(dir: &Path) -> Store {
        let mut store = Store::open_or_create(dir).unwrap();
        let mut inv = store.inventory().clone();
        inv.medicines.insert(
            "para".into(),
            Medicine {
                id: "para".into(),
                name: "Paracetamol 500mg".into(),
                unit: "tablet".into(),
                salt: None,
                uses: None,
                reorder_level: 10,
                supplier_id: None,
            },
        );
        inv.schedules.insert(
            "para".into(),
            DoseSchedule {
                medicine_id: "para".into(),
                before_breakfast: 1,
                after_dinner: 1,
                ..Default::default()
            },
        );
        store.commit_inventory(inv).unwrap();
        store
    }

    #[test]
    fn test_open_requires_snapshot() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(Store::open(temp_dir.path()).is_err());
        assert!(Store::open_or_create(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_init_creates_empty_snapshot() {
        let temp_dir = tempfile::tempdir().unwrap();
        Store::init(temp_dir.path()).unwrap();

        assert!(temp_dir.path().join("inventory.json").exists());
        let store = Store::open(temp_dir.path()).unwrap();
        assert!(store.inventory().medicines.is_empty());
    }

    #[test]
    fn test_commit_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let mut store = seeded_store(temp_dir.path());
            store
                .receive("para", "LOT-1", 20, Some(date("2025-06-01")), date("2025-01-10"), None)
                .unwrap();
        }

        let store = Store::open(temp_dir.path()).unwrap();
        assert_eq!(store.inventory().total_stock("para"), 20);

        let moves = store.load_all_moves().unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].reason, MoveReason::Receipt);
        assert_eq!(moves[0].qty_change, 20);
    }

    #[test]
    fn test_dropped_transaction_changes_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(temp_dir.path());
        store
            .receive("para", "LOT-1", 20, None, date("2025-01-10"), None)
            .unwrap();

        {
            let mut txn = store.begin();
            let batch_id = txn.inventory().find_batch("para", "LOT-1").unwrap().id;
            txn.inventory_mut().deduct(batch_id, 5).unwrap();
            txn.record(StockMove::daily_dose("para", batch_id, date("2025-01-15"), 5));
            // dropped, not committed
        }

        assert_eq!(store.inventory().total_stock("para"), 20);
        assert_eq!(store.load_all_moves().unwrap().len(), 1);

        let reopened = Store::open(temp_dir.path()).unwrap();
        assert_eq!(reopened.inventory().total_stock("para"), 20);
    }

    #[test]
    fn test_adjust_records_delta() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(temp_dir.path());
        let (batch_id, _) = store
            .receive("para", "LOT-1", 10, None, date("2025-01-10"), None)
            .unwrap();

        let delta = store
            .adjust(batch_id, 4, date("2025-01-11"), Some("stocktake".into()))
            .unwrap();
        assert_eq!(delta, -6);

        let moves = store.load_all_moves().unwrap();
        let adjustment = moves
            .iter()
            .find(|m| m.reason == MoveReason::Adjustment)
            .unwrap();
        assert_eq!(adjustment.qty_change, -6);
        assert_eq!(adjustment.batch_id, Some(batch_id));
    }

    #[test]
    fn test_adjust_unknown_batch_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(temp_dir.path());
        assert!(store.adjust(404, 1, date("2025-01-11"), None).is_err());
    }

    #[test]
    fn test_corrupt_snapshot_is_hard_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("inventory.json"), "{ not json").unwrap();

        assert!(matches!(
            Store::open(temp_dir.path()),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn test_atomic_snapshot_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(temp_dir.path());
        store
            .receive("para", "LOT-1", 5, None, date("2025-01-10"), None)
            .unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "inventory.json" && name != "ledger")
            .collect();
        assert!(extras.is_empty(), "unexpected files: {:?}", extras);
    }
}
