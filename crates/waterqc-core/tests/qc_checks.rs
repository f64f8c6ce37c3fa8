use polars::prelude::*;

use waterqc_core::checks::{count_decimals, evaluate_parameter, is_missing, to_float, ParameterFlags};
use waterqc_core::config::{ParameterRule, RuleSet};

const RULES: &str = r#"
checks:
  completeness: true
  numeric: true
  format: true
  range: true
  nonnegative: true
  spike: true
  flatline: true

parameters:
  - key: SpCond_uScm
    origin: Sonde
    raw_columns: ["SpCond uS/cm"]
    rules:
      numeric_required: true
      decimal_max: 2
      min_value: 0
      max_value: 1000
      nonnegative_required: true
      max_delta_per_step: 5
      streak_threshold: 3

  - key: Turbidity
    origin: Sonde
    raw_columns: ["Turbidity"]
    rules:
      numeric_required: true
      allow_nulls: true
      decimal_max: 2
      min_value: 0
      max_value: 4000

  - key: Sample_Numb
    origin: Biosensor
    raw_columns: ["Sample Numb"]
    rules:
      allowed_values: [0]
"#;

fn rule_set() -> RuleSet {
    serde_yaml::from_str(RULES).unwrap()
}

fn param<'a>(rule_set: &'a RuleSet, key: &str) -> &'a ParameterRule {
    rule_set
        .parameters
        .iter()
        .find(|param| param.key == key)
        .unwrap()
}

fn evaluate(values: Vec<&str>, key: &str, metadata_index: Option<usize>) -> ParameterFlags {
    let rules = rule_set();
    let series = Series::new("value".into(), values);
    evaluate_parameter(series.str().unwrap(), param(&rules, key), &rules, metadata_index)
}

fn flags<'a>(result: &'a ParameterFlags, column: &str) -> &'a [String] {
    &result
        .flag_columns
        .iter()
        .find(|(name, _)| name == column)
        .unwrap()
        .1
}

#[test]
fn missing_predicate_and_parsers() {
    assert!(is_missing(""));
    assert!(is_missing("   "));
    assert!(is_missing("NA"));
    assert!(is_missing("NaN"));
    assert!(is_missing("none"));
    assert!(!is_missing("0"));

    assert_eq!(to_float(" 1.50 "), Some(1.5));
    assert_eq!(to_float("abc"), None);
    assert_eq!(to_float("nan"), None);

    assert_eq!(count_decimals("1.234"), 3);
    assert_eq!(count_decimals("1."), 0);
    assert_eq!(count_decimals("42"), 0);
}

#[test]
fn range_outlier_fails_value_and_aggregate() {
    let result = evaluate(vec!["31402.00"], "SpCond_uScm", None);
    assert_eq!(flags(&result, "SpCond_uScm_range_flag"), ["FAIL"]);
    assert_eq!(result.qc_flags, ["FAIL"]);
}

#[test]
fn format_respects_the_decimal_budget() {
    let result = evaluate(vec!["1.23", "1.234", "7"], "SpCond_uScm", None);
    assert_eq!(
        flags(&result, "SpCond_uScm_format_flag"),
        ["PASS", "FAIL", "PASS"]
    );
}

#[test]
fn spike_flags_jumps_in_both_directions() {
    let result = evaluate(vec!["1", "7", "2"], "SpCond_uScm", None);
    assert_eq!(
        flags(&result, "SpCond_uScm_spike_flag"),
        ["PASS", "FAIL", "PASS"]
    );
}

#[test]
fn spike_reference_survives_missing_and_non_numeric_cells() {
    let result = evaluate(vec!["10", "", "abc", "14"], "SpCond_uScm", None);
    assert_eq!(
        flags(&result, "SpCond_uScm_spike_flag"),
        ["PASS", "PASS", "PASS", "PASS"]
    );
    // the jump from 10 to 16 exceeds the threshold even across the gap
    let result = evaluate(vec!["10", "", "16"], "SpCond_uScm", None);
    assert_eq!(
        flags(&result, "SpCond_uScm_spike_flag"),
        ["PASS", "PASS", "FAIL"]
    );
}

#[test]
fn flatline_fails_once_the_run_reaches_the_threshold() {
    let result = evaluate(vec!["5", "5", "5", "5", "6", "6", "6"], "SpCond_uScm", None);
    assert_eq!(
        flags(&result, "SpCond_uScm_flatline_flag"),
        ["PASS", "PASS", "FAIL", "FAIL", "PASS", "PASS", "FAIL"]
    );
}

#[test]
fn flatline_run_breaks_on_missing_values() {
    let result = evaluate(vec!["5", "5", "", "5", "5", "5"], "SpCond_uScm", None);
    assert_eq!(
        flags(&result, "SpCond_uScm_flatline_flag"),
        ["PASS", "PASS", "PASS", "PASS", "PASS", "FAIL"]
    );
}

#[test]
fn allowed_values_match_text_or_numeric_equality() {
    let result = evaluate(vec!["0", "0.0", "1", ""], "Sample_Numb", None);
    assert_eq!(
        flags(&result, "Sample_Numb_allowed_values_flag"),
        ["PASS", "PASS", "FAIL", "FAIL"]
    );
    assert_eq!(result.qc_flags, ["PASS", "PASS", "FAIL", "FAIL"]);
}

#[test]
fn allowed_values_run_without_a_global_toggle() {
    let mut rules = rule_set();
    rules.checks.clear();
    let series = Series::new("value".into(), vec!["1"]);
    let result =
        evaluate_parameter(series.str().unwrap(), param(&rules, "Sample_Numb"), &rules, None);
    assert_eq!(result.flag_columns.len(), 1);
    assert_eq!(result.flag_columns[0].0, "Sample_Numb_allowed_values_flag");
    assert_eq!(result.flag_columns[0].1, ["FAIL"]);
}

#[test]
fn allow_nulls_passes_missing_cells_and_skips_completeness() {
    let result = evaluate(vec![""], "Turbidity", None);
    assert!(result
        .flag_columns
        .iter()
        .all(|(name, _)| name != "Turbidity_completeness_flag"));
    assert_eq!(flags(&result, "Turbidity_numeric_flag"), ["PASS"]);
    assert_eq!(flags(&result, "Turbidity_format_flag"), ["PASS"]);
    assert_eq!(flags(&result, "Turbidity_range_flag"), ["PASS"]);
    assert_eq!(result.qc_flags, ["PASS"]);
}

#[test]
fn metadata_row_gets_empty_flags_and_resets_state() {
    let result = evaluate(vec!["uS/cm", "5", "5", "5"], "SpCond_uScm", Some(0));
    assert_eq!(
        flags(&result, "SpCond_uScm_flatline_flag"),
        ["", "PASS", "PASS", "FAIL"]
    );
    assert_eq!(result.qc_flags[0], "");
    assert_eq!(flags(&result, "SpCond_uScm_numeric_flag")[0], "");
}
