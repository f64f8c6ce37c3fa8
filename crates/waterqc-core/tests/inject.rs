use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use polars::prelude::DataFrame;

use waterqc_core::inject::inject_biosensor;
use waterqc_table::read::{column_names, read_delimited};

fn uid(d: u32, h: u32, m: u32, s: u32) -> i64 {
    NaiveDate::from_ymd_opt(2025, 12, d)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
        .and_utc()
        .timestamp()
}

fn cell(df: &DataFrame, column: &str, row: usize) -> String {
    df.column(column)
        .unwrap()
        .str()
        .unwrap()
        .get(row)
        .unwrap_or("")
        .to_string()
}

fn write_primary(dir: &Path) -> PathBuf {
    let path = dir.join("raw_data_Sonde_test.csv");
    std::fs::write(
        &path,
        "TimeStamp,Temp C,TRP RFU,Signal strength\n\
         01/12/2025 00:00,10.0,,-70\n\
         01/12/2025 00:05,11.0,,-70\n\
         01/12/2025 00:10,12.0,,-71\n",
    )
    .unwrap();
    path
}

fn write_secondary(dir: &Path, rows: &[(i64, &str, &str)]) -> PathBuf {
    let path = dir.join("results.csv");
    let mut body = String::from("UID;mU;activeSample\n");
    for (uid, activity, sample) in rows {
        body.push_str(&format!("{uid};{activity};{sample}\n"));
    }
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn best_replace_assignment_prefers_the_closer_reading() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_primary(dir.path());
    let secondary = write_secondary(
        dir.path(),
        &[
            (uid(1, 0, 4, 0), "100.5", "0"),
            (uid(1, 0, 4, 30), "200.5", "0"),
        ],
    );

    let summary = inject_biosensor(&primary, Some(&secondary)).unwrap();
    assert_eq!(summary.total_secondary_rows, 2);
    assert_eq!(summary.merged_rows, 1);

    let df = read_delimited(&primary).unwrap();
    // the later reading is strictly closer to 00:05 and displaces the first
    assert_eq!(cell(&df, "Activity", 1), "200.5");
    assert_eq!(cell(&df, "Biosensor TimeStamp (UTC)", 1), "01-12-2025 00:04:30");
    assert_eq!(cell(&df, "Sample Numb", 1), "0");
    assert_eq!(cell(&df, "Activity", 0), "");
    assert_eq!(cell(&df, "Activity", 2), "");
}

#[test]
fn injected_columns_are_appended_after_the_original_layout() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_primary(dir.path());
    let secondary = write_secondary(dir.path(), &[(uid(1, 0, 4, 0), "100.5", "0")]);

    inject_biosensor(&primary, Some(&secondary)).unwrap();
    let df = read_delimited(&primary).unwrap();
    assert_eq!(
        column_names(&df),
        vec![
            "TimeStamp",
            "Temp C",
            "TRP RFU",
            "Signal strength",
            "Biosensor TimeStamp (UTC)",
            "Activity",
            "Sample Numb",
        ]
    );
}

#[test]
fn absent_secondary_file_reports_no_rows_merged() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_primary(dir.path());

    let summary = inject_biosensor(&primary, None).unwrap();
    assert_eq!(summary.merged_rows, 0);
    assert_eq!(summary.total_secondary_rows, 0);

    let df = read_delimited(&primary).unwrap();
    assert_eq!(df.height(), 3);
    for row in 0..3 {
        assert_eq!(cell(&df, "Biosensor TimeStamp (UTC)", row), "");
        assert_eq!(cell(&df, "Activity", row), "");
        assert_eq!(cell(&df, "Sample Numb", row), "");
    }
}

#[test]
fn out_of_range_secondary_rows_are_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_primary(dir.path());
    let secondary = write_secondary(dir.path(), &[(uid(2, 10, 0, 0), "300.5", "0")]);

    let summary = inject_biosensor(&primary, Some(&secondary)).unwrap();
    assert_eq!(summary.total_secondary_rows, 0);
    assert_eq!(summary.merged_rows, 0);

    let df = read_delimited(&primary).unwrap();
    assert_eq!(cell(&df, "Activity", 1), "");
}

#[test]
fn secondary_file_missing_required_columns_merges_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_primary(dir.path());
    let secondary = dir.path().join("results.csv");
    std::fs::write(&secondary, "UID;Value\n1;2\n").unwrap();

    let summary = inject_biosensor(&primary, Some(&secondary)).unwrap();
    assert_eq!(summary.merged_rows, 0);
}

#[test]
fn stray_fluorescence_values_relocate_to_the_nearest_measurement_row() {
    let dir = tempfile::tempdir().unwrap();
    let primary = dir.path().join("raw_data_Sonde_test.csv");
    std::fs::write(
        &primary,
        "TimeStamp,Temp C,TRP RFU,Signal strength\n\
         01/12/2025 00:00,10.0,,-70\n\
         01/12/2025 00:02,,5.123,-70\n\
         01/12/2025 00:05,11.0,,-71\n",
    )
    .unwrap();

    let summary = inject_biosensor(&primary, None).unwrap();
    assert_eq!(summary.relocated_values, 1);
    assert_eq!(summary.dropped_rows, 1);

    let df = read_delimited(&primary).unwrap();
    // the stray row at 00:02 donated its value to 00:00 and was dropped
    assert_eq!(df.height(), 2);
    assert_eq!(cell(&df, "TimeStamp", 0), "01/12/2025 00:00");
    assert_eq!(cell(&df, "TRP RFU", 0), "5.123");
    assert_eq!(cell(&df, "TimeStamp", 1), "01/12/2025 00:05");
}

#[test]
fn relocation_never_overwrites_an_existing_value() {
    let dir = tempfile::tempdir().unwrap();
    let primary = dir.path().join("raw_data_Sonde_test.csv");
    std::fs::write(
        &primary,
        "TimeStamp,Temp C,TRP RFU,Signal strength\n\
         01/12/2025 00:00,10.0,4.000,-70\n\
         01/12/2025 00:02,,5.123,-70\n\
         01/12/2025 00:05,11.0,,-71\n",
    )
    .unwrap();

    let summary = inject_biosensor(&primary, None).unwrap();
    assert_eq!(summary.relocated_values, 1);

    let df = read_delimited(&primary).unwrap();
    assert_eq!(cell(&df, "TRP RFU", 0), "4.000");
    assert_eq!(cell(&df, "TRP RFU", 1), "5.123");
}

#[test]
fn stray_row_with_other_data_is_kept_after_donating() {
    let dir = tempfile::tempdir().unwrap();
    let primary = dir.path().join("raw_data_Sonde_test.csv");
    // the stray row carries an unrelated comment column, so it survives
    std::fs::write(
        &primary,
        "TimeStamp,Temp C,TRP RFU,Signal strength,Comment\n\
         01/12/2025 00:00,10.0,,-70,\n\
         01/12/2025 00:02,,5.123,-70,probe lifted\n",
    )
    .unwrap();

    let summary = inject_biosensor(&primary, None).unwrap();
    assert_eq!(summary.relocated_values, 1);
    assert_eq!(summary.dropped_rows, 0);

    let df = read_delimited(&primary).unwrap();
    assert_eq!(df.height(), 2);
    assert_eq!(cell(&df, "TRP RFU", 0), "5.123");
    assert_eq!(cell(&df, "TRP RFU", 1), "");
}
