//! Minimal RFC 4180 field quoting.

const SEPARATOR: char = ',';

/// Quotes `field` when it contains the separator, a quote or a line break.
/// Embedded quotes are doubled.
pub fn escape_field(field: &str) -> String {
    if field.contains([SEPARATOR, '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Joins already-raw fields into one CSV record (no trailing newline).
pub fn record<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}
