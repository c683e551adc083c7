//! Search-key normalisation for names.
//!
//! `"J. R. R. Tolkien"`, `"j.r.r. tolkien"` and `"JRR Tolkien"` all produce the
//! same key. Keys are stored next to the display name when authors are written
//! and the same function is applied to search terms, so the two sides always agree.

/// Lower-case `name` and drop every `.` and whitespace character
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Build a `LIKE` pattern matching `term` anywhere, escaping `%`, `_` and `\`
#[must_use]
pub fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len().saturating_add(2));
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
