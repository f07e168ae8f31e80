//! Integration tests for the medkeep binary.
//!
//! These tests verify end-to-end behavior including:
//! - Store initialization and CSV ingestion
//! - The daily dosage run (idempotency, force re-runs, dry runs)
//! - Receive/adjust actions and the reporting surface
//! - Ledger rollup

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("medkeep"))
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Write the four ingestion CSVs: one medicine on a 2-unit daily plan
/// with the worked-example batches B1(5 @ 2025-01-10) and B2(10 @ 2025-01-20).
fn write_fixture_csvs(dir: &Path) {
    fs::write(
        dir.join("suppliers.csv"),
        "supplier_id,supplier_name,lead_time\nS1,Acme Pharma,7\n",
    )
    .unwrap();
    fs::write(
        dir.join("medicines.csv"),
        "id,medicine_name,unit,salt,uses,supplier_id,reorder_level\n\
         para,Paracetamol 500mg,tablet,paracetamol,fever,S1,20\n",
    )
    .unwrap();
    fs::write(
        dir.join("batches.csv"),
        "medicine_id,batch_no,stock_units,expiry_date\n\
         para,B1,5,2025-01-10\n\
         para,B2,10,2025-01-20\n",
    )
    .unwrap();
    fs::write(
        dir.join("dosage.csv"),
        "medicine_id,before_bf,after_bf,at_8pm,after_dinner\npara,1,0,1,0\n",
    )
    .unwrap();
}

/// Init a store and ingest the fixture CSVs into it
fn seeded_store() -> TempDir {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().join("data");
    let csv_dir = temp_dir.path().join("csv");
    fs::create_dir_all(&csv_dir).unwrap();
    write_fixture_csvs(&csv_dir);

    cli()
        .arg("ingest")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--dir")
        .arg(&csv_dir)
        .assert()
        .success();

    temp_dir
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Medicine stock tracker with FEFO daily deduction",
        ));
}

#[test]
fn test_init_creates_snapshot() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().join("data");

    cli()
        .arg("init")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Store ready"));

    assert!(data_dir.join("inventory.json").exists());
}

#[test]
fn test_apply_requires_initialised_store() {
    let temp_dir = setup_test_dir();

    cli()
        .arg("apply")
        .arg("--data-dir")
        .arg(temp_dir.path().join("missing"))
        .arg("--date")
        .arg("2025-01-05")
        .assert()
        .failure();
}

#[test]
fn test_ingest_reports_counts() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().join("data");
    let csv_dir = temp_dir.path().join("csv");
    fs::create_dir_all(&csv_dir).unwrap();
    write_fixture_csvs(&csv_dir);

    cli()
        .arg("ingest")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--dir")
        .arg(&csv_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("medicines: 1"))
        .stdout(predicate::str::contains("batches:   2"));
}

#[test]
fn test_apply_deducts_and_writes_ledger() {
    let temp_dir = seeded_store();
    let data_dir = temp_dir.path().join("data");

    cli()
        .arg("apply")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--date")
        .arg("2025-01-05")
        .arg("--verbose")
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied: 1"))
        .stdout(predicate::str::contains("deducted 2"));

    let ledger_path = data_dir.join("ledger/stock_moves.jsonl");
    let ledger = fs::read_to_string(&ledger_path).expect("Failed to read ledger");
    assert!(ledger.contains("daily_dose"));
}

#[test]
fn test_second_apply_is_noop() {
    let temp_dir = seeded_store();
    let data_dir = temp_dir.path().join("data");

    for _ in 0..2 {
        cli()
            .arg("apply")
            .arg("--data-dir")
            .arg(&data_dir)
            .arg("--date")
            .arg("2025-01-05")
            .assert()
            .success();
    }

    cli()
        .arg("apply")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--date")
        .arg("2025-01-05")
        .assert()
        .success()
        .stdout(predicate::str::contains("Already applied: 1"))
        .stdout(predicate::str::contains("Use --force to re-apply"));

    // Exactly the first run's single draw (2 units fit in batch B1),
    // nothing appended by the re-runs
    let ledger = fs::read_to_string(data_dir.join("ledger/stock_moves.jsonl")).unwrap();
    assert_eq!(ledger.lines().count(), 1);
}

#[test]
fn test_force_rerun_supersedes() {
    let temp_dir = seeded_store();
    let data_dir = temp_dir.path().join("data");

    cli()
        .arg("apply")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--date")
        .arg("2025-01-05")
        .assert()
        .success();

    cli()
        .arg("apply")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--date")
        .arg("2025-01-05")
        .arg("--force")
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied: 1"));

    let ledger = fs::read_to_string(data_dir.join("ledger/stock_moves.jsonl")).unwrap();
    assert!(ledger.contains("reversal"));

    // Net stock identical to a single application: 15 - 2 = 13
    cli()
        .arg("report")
        .arg("stock")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("13"));
}

#[test]
fn test_dry_run_persists_nothing() {
    let temp_dir = seeded_store();
    let data_dir = temp_dir.path().join("data");

    cli()
        .arg("apply")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--date")
        .arg("2025-01-05")
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"));

    assert!(!data_dir.join("ledger/stock_moves.jsonl").exists());
}

#[test]
fn test_receive_and_adjust() {
    let temp_dir = seeded_store();
    let data_dir = temp_dir.path().join("data");

    cli()
        .arg("receive")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--medicine")
        .arg("para")
        .arg("--batch")
        .arg("B3")
        .arg("--qty")
        .arg("20")
        .arg("--expiry")
        .arg("2025-09-30")
        .assert()
        .success()
        .stdout(predicate::str::contains("Received 20"));

    // B3 got id 3 (after the two ingested batches)
    cli()
        .arg("adjust")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--batch")
        .arg("3")
        .arg("--qty")
        .arg("18")
        .arg("--note")
        .arg("stocktake")
        .assert()
        .success()
        .stdout(predicate::str::contains("set to 18"));

    cli()
        .arg("report")
        .arg("moves")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--reason")
        .arg("adjustment")
        .assert()
        .success()
        .stdout(predicate::str::contains("adjustment"))
        .stdout(predicate::str::contains("-2"));
}

#[test]
fn test_receive_unknown_medicine_fails() {
    let temp_dir = seeded_store();
    let data_dir = temp_dir.path().join("data");

    cli()
        .arg("receive")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--medicine")
        .arg("ghost")
        .arg("--batch")
        .arg("B1")
        .arg("--qty")
        .arg("5")
        .assert()
        .failure();
}

#[test]
fn test_report_batches_fefo_order() {
    let temp_dir = seeded_store();
    let data_dir = temp_dir.path().join("data");

    let assert = cli()
        .arg("report")
        .arg("batches")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let b1_pos = stdout.find("B1").expect("B1 missing from listing");
    let b2_pos = stdout.find("B2").expect("B2 missing from listing");
    assert!(b1_pos < b2_pos, "earliest expiry should list first");
}

#[test]
fn test_report_alerts_days_cover() {
    let temp_dir = seeded_store();
    let data_dir = temp_dir.path().join("data");

    // 15 on hand < 1.5 x 10 reorder, 2/day -> 7.5 days cover
    cli()
        .arg("report")
        .arg("alerts")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("7.5 days cover"));
}

#[test]
fn test_rollup_archives_ledger() {
    let temp_dir = seeded_store();
    let data_dir = temp_dir.path().join("data");

    cli()
        .arg("apply")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--date")
        .arg("2025-01-05")
        .assert()
        .success();

    cli()
        .arg("rollup")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--cleanup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled up"));

    assert!(data_dir.join("stock_moves.csv").exists());
    assert!(!data_dir.join("ledger/stock_moves.jsonl").exists());

    // Archived history still guards idempotency
    cli()
        .arg("apply")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--date")
        .arg("2025-01-05")
        .assert()
        .success()
        .stdout(predicate::str::contains("Already applied: 1"));
}

#[test]
fn test_rollup_without_ledger() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().join("data");

    cli()
        .arg("init")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();

    cli()
        .arg("rollup")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to roll up"));
}
