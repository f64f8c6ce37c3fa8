/// Collapse a header to lowercase alphanumerics so loosely formatted raw
/// names ("Temp (C)", "temp c", "Temp_C") compare equal.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Resolve the first candidate (in priority order) that matches one of the
/// actual headers after normalization. Returns the raw header so callers keep
/// addressing the table by its own column names.
pub fn match_raw_column<'a, S: AsRef<str>>(
    actual_columns: &'a [String],
    candidates: &[S],
) -> Option<&'a str> {
    let normalized: Vec<(String, &str)> = actual_columns
        .iter()
        .map(|column| (normalize_name(column), column.as_str()))
        .collect();

    for candidate in candidates {
        let wanted = normalize_name(candidate.as_ref());
        if wanted.is_empty() {
            continue;
        }
        if let Some((_, raw)) = normalized.iter().find(|(norm, _)| *norm == wanted) {
            return Some(raw);
        }
    }
    None
}
