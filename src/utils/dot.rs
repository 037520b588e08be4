//! Helpers for writing Graphviz DOT output.

/// Escapes `s` for use inside a quoted DOT label.
///
/// Quotes, backslashes, line breaks and angle brackets are escaped; carriage returns are
/// dropped.
///
/// # Examples
///
/// ```rust,ignore
/// use flowscope::utils::escape_dot;
///
/// assert_eq!(escape_dot("Map<K, V>"), "Map\\<K, V\\>");
/// ```
#[must_use]
pub fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
        .replace('<', "\\<")
        .replace('>', "\\>")
}
