//! Stream header maps
//!
//! Headers are kept in insertion order with case-insensitive lookups.
//! Pseudo-headers (`:method`, `:path`, `:status`, ...) live in the same
//! list as regular headers, exactly as they travel in a header block.

use std::fmt;

/// Connection-management headers that are meaningless on a multiplexed
/// transport and never leave this crate.
pub const CONNECTION_HEADERS: [&str; 4] =
    ["connection", "keep-alive", "proxy-connection", "transfer-encoding"];

/// Ordered name/value collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Append a header, keeping any existing values for the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header, returning how many were dropped
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Remove and return the first value of a header
    pub fn take(&mut self, name: &str) -> Option<String> {
        let pos = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Iterate over headers that are not pseudo-headers
    pub fn regular(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(n, _)| !n.starts_with(':'))
    }

    /// Pairs ready for a header block: keys lower-cased, connection
    /// management headers and caller-supplied pseudo-headers dropped.
    pub fn to_block_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|(n, _)| !n.starts_with(':'))
            .filter(|(n, _)| !is_connection_header(n))
            .map(|(n, v)| (n.to_ascii_lowercase(), v.clone()))
            .collect()
    }
}

/// Whether `name` is a hop-by-hop header that must be stripped
pub fn is_connection_header(name: &str) -> bool {
    CONNECTION_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Headers {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Headers {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("x-custom", "value");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get("X-Custom"), Some("value"));
        assert_eq!(headers.get("missing"), None);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_multiple_values_and_set() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("set-cookie", "b=2");
        assert_eq!(headers.get_all("SET-COOKIE"), vec!["a=1", "b=2"]);

        headers.set("Set-Cookie", "c=3");
        assert_eq!(headers.get_all("set-cookie"), vec!["c=3"]);
    }

    #[test]
    fn test_remove_and_take() {
        let mut headers = Headers::from([(":path", "/"), ("a", "b"), ("A", "c")]);
        assert_eq!(headers.take(":path"), Some("/".to_string()));
        assert_eq!(headers.remove("a"), 2);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_block_pairs_strip_connection_headers() {
        let headers = Headers::from([
            ("Connection", "keep-alive"),
            ("KEEP-ALIVE", "timeout=5"),
            ("Proxy-Connection", "close"),
            ("Transfer-Encoding", "chunked"),
            ("X-Forwarded-Proto", "https"),
            (":method", "GET"),
        ]);

        let pairs = headers.to_block_pairs();
        assert_eq!(
            pairs,
            vec![("x-forwarded-proto".to_string(), "https".to_string())]
        );
    }

    #[test]
    fn test_regular_skips_pseudo() {
        let headers = Headers::from([(":status", "200"), ("ohai", "yes")]);
        let regular: Vec<_> = headers.regular().collect();
        assert_eq!(regular, vec![("ohai", "yes")]);
    }
}
