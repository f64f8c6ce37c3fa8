use std::path::Path;

use polars::prelude::DataFrame;

use waterqc_core::combine::{
    align_combined, combine_cleaned, combine_pair, find_latest_pair, find_pairs,
};
use waterqc_table::read::read_delimited;

fn cell(df: &DataFrame, column: &str, row: usize) -> String {
    df.column(column)
        .unwrap()
        .str()
        .unwrap()
        .get(row)
        .unwrap_or("")
        .to_string()
}

fn write_pair(dir: &Path, sonde_rows: &str, biosensor_rows: &str) -> (std::path::PathBuf, std::path::PathBuf) {
    let sonde = dir.join("cleaned_data_Sonde_20251130_to_20251201.csv");
    let biosensor = dir.join("cleaned_data_Biosensor_20251130_to_20251201.csv");
    std::fs::write(&sonde, format!("TimeStamp,Temp C,Turbidity\n{sonde_rows}")).unwrap();
    std::fs::write(&biosensor, format!("Time (UTC),Activity\n{biosensor_rows}")).unwrap();
    (sonde, biosensor)
}

#[test]
fn period_pairs_match_on_shared_keys_only() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), "", "");
    std::fs::write(
        dir.path().join("cleaned_data_Sonde_20251202_to_20251203.csv"),
        "TimeStamp\n",
    )
    .unwrap();

    let pairs = find_pairs(dir.path()).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0, ("20251130".to_string(), "20251201".to_string()));
}

#[test]
fn latest_pair_falls_back_to_most_recent_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cleaned_data_Sonde_week48.csv"), "TimeStamp\n").unwrap();
    std::fs::write(
        dir.path().join("cleaned_data_Biosensor_week48.csv"),
        "Time (UTC)\n",
    )
    .unwrap();

    let (sonde, biosensor) = find_latest_pair(dir.path()).unwrap();
    assert!(sonde.is_some());
    assert!(biosensor.is_some());
}

#[test]
fn combined_rows_interleave_both_origins_sorted_by_time() {
    let dir = tempfile::tempdir().unwrap();
    let (sonde, biosensor) = write_pair(
        dir.path(),
        "30/11/2025 00:00,10.1,\n30/11/2025 00:05,10.2,\n30/11/2025 00:10,10.3,\n",
        "30/11/2025 00:04,2500\n",
    );

    let combined = combine_pair(&sonde, &biosensor).unwrap();
    assert_eq!(combined.height(), 4);
    let origins: Vec<String> = (0..4).map(|idx| cell(&combined, "Origin", idx)).collect();
    assert_eq!(origins, ["Sonde", "Biosensor", "Sonde", "Sonde"]);
    assert_eq!(cell(&combined, "TimeStamp", 1), "30/11/2025 00:04");
    assert_eq!(cell(&combined, "Activity - Biosensor", 1), "2500");
    // sonde measurements ride along untouched
    assert_eq!(cell(&combined, "Temp C", 0), "10.1");
}

#[test]
fn alignment_assigns_the_nearest_sonde_row() {
    let dir = tempfile::tempdir().unwrap();
    let (sonde, biosensor) = write_pair(
        dir.path(),
        "30/11/2025 00:00,10.1,\n30/11/2025 00:05,10.2,\n30/11/2025 00:10,10.3,\n",
        "30/11/2025 00:04,2500\n",
    );

    let combined = combine_pair(&sonde, &biosensor).unwrap();
    let (aligned, stats) = align_combined(&combined).unwrap();

    assert_eq!(aligned.height(), 3);
    assert_eq!(cell(&aligned, "Sonde TimeStamp", 1), "30/11/2025 00:05");
    assert_eq!(cell(&aligned, "Biosensor TimeStamp", 1), "30/11/2025 00:04");
    assert_eq!(cell(&aligned, "Activity - Biosensor", 1), "2500");
    assert_eq!(cell(&aligned, "Biosensor TimeStamp", 0), "");
    assert_eq!(cell(&aligned, "Biosensor TimeStamp", 2), "");

    assert_eq!(stats.total_secondary_rows, 1);
    assert_eq!(stats.matched_rows, 1);
    assert_eq!(stats.unmatched_rows, 0);
    assert_eq!(stats.unmatched_percentage, 0.0);
}

#[test]
fn unmatched_secondary_rows_are_counted() {
    let dir = tempfile::tempdir().unwrap();
    let (sonde, biosensor) = write_pair(
        dir.path(),
        "30/11/2025 00:00,10.1,\n30/11/2025 00:05,10.2,\n",
        "30/11/2025 00:01,100\n30/11/2025 00:06,200\n30/11/2025 00:11,300\n",
    );

    let combined = combine_pair(&sonde, &biosensor).unwrap();
    let (_, stats) = align_combined(&combined).unwrap();

    assert_eq!(stats.total_secondary_rows, 3);
    assert_eq!(stats.matched_rows, 2);
    assert_eq!(stats.unmatched_rows, 1);
    assert!((stats.unmatched_percentage - 100.0 / 3.0).abs() < 1e-9);
}

#[test]
fn combine_cleaned_writes_period_and_general_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let cleaned_dir = dir.path().join("cleaned");
    let combined_dir = dir.path().join("combined");
    std::fs::create_dir_all(&cleaned_dir).unwrap();
    write_pair(
        &cleaned_dir,
        "30/11/2025 00:00,10.1,\n30/11/2025 00:05,10.2,\n",
        "30/11/2025 00:04,2500\n",
    );

    let outputs = combine_cleaned(&cleaned_dir, &combined_dir).unwrap();
    assert_eq!(outputs.len(), 4);
    assert!(combined_dir
        .join("combined_data_20251130_to_20251201.csv")
        .exists());
    assert!(combined_dir
        .join("aligned_data_20251130_to_20251201.csv")
        .exists());
    assert!(combined_dir.join("combined_data_general.csv").exists());
    assert!(combined_dir.join("aligned_data_general.csv").exists());

    // first row of a combined artifact is the unit row
    let period = read_delimited(&combined_dir.join("combined_data_20251130_to_20251201.csv")).unwrap();
    assert_eq!(cell(&period, "TimeStamp", 0), "dd-mm-yyyy hh:mm:ss");
    assert_eq!(cell(&period, "Origin", 1), "Sonde");
}

#[test]
fn general_files_deduplicate_across_repeated_runs() {
    let dir = tempfile::tempdir().unwrap();
    let cleaned_dir = dir.path().join("cleaned");
    let combined_dir = dir.path().join("combined");
    std::fs::create_dir_all(&cleaned_dir).unwrap();
    write_pair(
        &cleaned_dir,
        "30/11/2025 00:00,10.1,\n30/11/2025 00:05,10.2,\n",
        "30/11/2025 00:04,2500\n",
    );

    combine_cleaned(&cleaned_dir, &combined_dir).unwrap();
    let first = read_delimited(&combined_dir.join("combined_data_general.csv")).unwrap();
    combine_cleaned(&cleaned_dir, &combined_dir).unwrap();
    let second = read_delimited(&combined_dir.join("combined_data_general.csv")).unwrap();

    // unit row + three data rows, both times
    assert_eq!(first.height(), 4);
    assert_eq!(second.height(), first.height());

    let aligned = read_delimited(&combined_dir.join("aligned_data_general.csv")).unwrap();
    // unit row + one row per sonde timestamp
    assert_eq!(aligned.height(), 3);
}
