/// Excel's limit on worksheet name length, in characters.
pub const EXCEL_MAX_SHEET_NAME_LEN: usize = 31;

/// Compare sheet names the way Excel does (case-insensitive).
pub fn sheet_name_eq_case_insensitive(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Truncate `name` to at most `max_chars` characters (not bytes).
pub fn truncate_sheet_name(name: &str, max_chars: usize) -> String {
    name.chars().take(max_chars).collect()
}
