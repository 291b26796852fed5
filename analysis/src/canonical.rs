/// Canonical baseline key of a query type.
///
/// Lowercases ASCII letters and maps every character that is not an ASCII
/// letter or digit to `-`, so `"Double Groupby_All"` becomes `"double-groupby-all"`.
/// Baseline derivation and lookup both go through this function.
pub fn metric_key(query_type: &str) -> String {
    query_type
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
