//! Canonical-key header multimap shared by `RawResponse` and `Event`.
//!
//! Mirrors Go's `textproto.MIMEHeader` / `CanonicalMIMEHeaderKey`: header
//! names are stored dash-segment title-cased (`job-uuid` -> `Job-Uuid`) so
//! lookups are case-insensitive regardless of how the peer sent them.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub(crate) struct HeaderMap(HashMap<String, Vec<String>>);

impl HeaderMap {
    pub(crate) fn new() -> Self {
        Self(HashMap::new())
    }

    /// Appends a value, preserving any existing values for the same header.
    pub(crate) fn append(&mut self, name: &str, value: String) {
        self.0.entry(canonical_header_name(name)).or_default().push(value);
    }

    /// Replaces any existing values for `name` with a single value.
    pub(crate) fn set(&mut self, name: &str, value: String) {
        self.0.insert(canonical_header_name(name), vec![value]);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&canonical_header_name(name))
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub(crate) fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&canonical_header_name(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(&canonical_header_name(name))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

/// Title-cases each dash-separated segment, lowercasing the rest
/// (`content-length` -> `Content-Length`, `job-uuid` -> `Job-Uuid`).
pub(crate) fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut start_of_word = true;
    for c in name.chars() {
        if c == '-' {
            out.push('-');
            start_of_word = true;
        } else if start_of_word {
            out.extend(c.to_uppercase());
            start_of_word = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_dash_segments() {
        assert_eq!(canonical_header_name("job-uuid"), "Job-Uuid");
        assert_eq!(canonical_header_name("CONTENT-LENGTH"), "Content-Length");
        assert_eq!(canonical_header_name("Event-Name"), "Event-Name");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut h = HeaderMap::new();
        h.append("content-type", "text/event-plain".into());
        assert_eq!(h.get("Content-Type"), Some("text/event-plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/event-plain"));
    }
}
