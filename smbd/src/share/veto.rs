//! Veto-file filter compilation: `*.ext` becomes an extension match, `*X…`
//! a wildcard, everything else a literal compare.

#[derive(Debug, Clone)]
pub enum VetoFilter {
    Extension(String),
    Wildcard(String),
    Literal(String),
}

impl VetoFilter {
    pub fn compile(pattern: &str) -> Self {
        if let Some(ext) = pattern.strip_prefix("*.") {
            if !ext.contains('*') {
                return Self::Extension(ext.to_ascii_lowercase());
            }
        }
        if pattern.contains('*') {
            return Self::Wildcard(pattern.to_ascii_lowercase());
        }
        Self::Literal(pattern.to_ascii_lowercase())
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        match self {
            Self::Extension(ext) => name.ends_with(&format!(".{ext}")),
            Self::Wildcard(pattern) => wildcard_match(pattern, &name),
            Self::Literal(lit) => &name == lit,
        }
    }
}

/// Minimal `*`-only glob matcher (no `?`), sufficient for the veto-file
/// patterns the share registry compiles.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.is_empty() {
        return true;
    }
    let mut rest = name;
    if let Some(first) = parts.first() {
        if !first.is_empty() {
            if !rest.starts_with(first) {
                return false;
            }
            rest = &rest[first.len()..];
        }
    }
    for part in &parts[1..parts.len().saturating_sub(1)] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    if let Some(last) = parts.last() {
        if !last.is_empty() {
            return rest.ends_with(last);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_matches_regardless_of_stem() {
        let filter = VetoFilter::compile("*.tmp");
        assert!(filter.matches("report.tmp"));
        assert!(!filter.matches("report.doc"));
    }

    #[test]
    fn literal_filter_matches_whole_name_only() {
        let filter = VetoFilter::compile("thumbs.db");
        assert!(filter.matches("Thumbs.db"));
        assert!(!filter.matches("thumbs.db.bak"));
    }

    #[test]
    fn wildcard_filter_matches_substring_pattern() {
        let filter = VetoFilter::compile("*backup*");
        assert!(filter.matches("old-backup-2020.zip"));
        assert!(!filter.matches("archive.zip"));
    }
}
