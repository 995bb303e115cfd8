/// Canonical form of a distribution name: lowercase, with every run of
/// `-`, `_` and `.` collapsed into a single `-`.
#[must_use]
pub fn canonicalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_separator = false;
        normalized.extend(ch.to_lowercase());
    }
    normalized
}
