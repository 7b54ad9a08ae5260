pub const CONTENT_TYPE: &str = "Content-Type";
pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain";

/// Request headers, one value per name.
///
/// Names compare case-insensitively; [`set`](HeaderMap::set) replaces an
/// existing value under any casing. Insertion order is preserved for
/// iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, returning the previous value if any.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.set(name, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_case_insensitive() {
        let mut map = HeaderMap::new();
        map.set(CONTENT_TYPE, APPLICATION_JSON);
        assert_eq!(map.get("content-type"), Some(APPLICATION_JSON));
        assert!(map.contains("CONTENT-TYPE"));
    }

    #[test]
    fn set_replaces_existing_value() {
        let mut map = HeaderMap::new();
        assert_eq!(map.set("Accept", "*/*"), None);
        assert_eq!(map.set("accept", "text/html").as_deref(), Some("*/*"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("Accept"), Some("text/html"));
    }

    #[test]
    fn remove_header() {
        let mut map: HeaderMap = [("Host", "localhost"), ("X-Trace", "1")].into_iter().collect();
        assert_eq!(map.remove("host").as_deref(), Some("localhost"));
        assert_eq!(map.remove("host"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn iteration_keeps_insertion_order() {
        let map: HeaderMap = [("B", "2"), ("A", "1")].into_iter().collect();
        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn empty_map() {
        let map = HeaderMap::new();
        assert!(map.is_empty());
        assert_eq!(map.get("X-Missing"), None);
    }
}
