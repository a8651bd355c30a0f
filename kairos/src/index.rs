//! Label index abstraction and an in-memory implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Secondary index from labels to series keys.
pub trait LabelIndex {
    /// Records that `key` carries `labels`.
    fn index(&mut self, key: &str, labels: &[(String, String)]);

    /// Forgets that `key` carries `labels`.
    fn unindex(&mut self, key: &str, labels: &[(String, String)]);

    /// Returns the keys carrying every label required by `matcher`, sorted.
    fn query(&self, matcher: &LabelMatcher) -> Vec<String>;
}

/// Label requirements for an index query.
///
/// A series matches if every required label is present with exactly the
/// required value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelMatcher {
    labels: BTreeMap<String, String>,
}

impl LabelMatcher {
    /// Creates a matcher from `(name, value)` pairs.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kairos::index::LabelMatcher;
    ///
    /// let matcher = LabelMatcher::new([("service", "web"), ("env", "prod")]);
    /// assert_eq!(matcher.len(), 2);
    /// ```
    pub fn new<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Checks labels against the matcher.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kairos::index::LabelMatcher;
    ///
    /// let matcher = LabelMatcher::new([("service", "web")]);
    ///
    /// assert!(matcher.matches(&[("service".to_string(), "web".to_string())]));
    /// assert!(!matcher.matches(&[("service".to_string(), "api".to_string())]));
    /// ```
    pub fn matches(&self, labels: &[(String, String)]) -> bool {
        let label_map: HashMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        self.labels.iter().all(|(required_key, required_value)| {
            label_map.get(required_key.as_str()) == Some(&required_value.as_str())
        })
    }

    /// Iterates the required `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of required labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if the matcher requires nothing.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// In-memory posting lists keyed by `(name, value)`.
#[derive(Debug, Default)]
pub struct MemoryLabelIndex {
    postings: HashMap<(String, String), BTreeSet<String>>,
}

impl MemoryLabelIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the keys carrying `name=value`.
    pub fn lookup(&self, name: &str, value: &str) -> Vec<String> {
        self.postings
            .get(&(name.to_string(), value.to_string()))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl LabelIndex for MemoryLabelIndex {
    fn index(&mut self, key: &str, labels: &[(String, String)]) {
        for label in labels {
            self.postings
                .entry(label.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    fn unindex(&mut self, key: &str, labels: &[(String, String)]) {
        for label in labels {
            if let Some(keys) = self.postings.get_mut(label) {
                keys.remove(key);
                if keys.is_empty() {
                    self.postings.remove(label);
                }
            }
        }
    }

    /// An empty matcher selects nothing.
    fn query(&self, matcher: &LabelMatcher) -> Vec<String> {
        let mut result: Option<BTreeSet<String>> = None;
        for (name, value) in matcher.iter() {
            let Some(keys) = self.postings.get(&(name.to_string(), value.to_string())) else {
                return Vec::new();
            };
            result = Some(match result {
                Some(acc) => acc.intersection(keys).cloned().collect(),
                None => keys.clone(),
            });
        }
        result.map(|keys| keys.into_iter().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_index_and_query() {
        let mut index = MemoryLabelIndex::new();
        index.index("cpu.web", &labels(&[("service", "web"), ("metric", "cpu")]));
        index.index("mem.web", &labels(&[("service", "web"), ("metric", "mem")]));
        index.index("cpu.api", &labels(&[("service", "api"), ("metric", "cpu")]));

        assert_eq!(
            index.query(&LabelMatcher::new([("service", "web")])),
            vec!["cpu.web", "mem.web"]
        );
        assert_eq!(
            index.query(&LabelMatcher::new([("metric", "cpu"), ("service", "api")])),
            vec!["cpu.api"]
        );
        assert!(index.query(&LabelMatcher::new([("service", "db")])).is_empty());
        assert!(index.query(&LabelMatcher::default()).is_empty());
    }

    #[test]
    fn test_unindex_removes_postings() {
        let mut index = MemoryLabelIndex::new();
        let l = labels(&[("host", "a")]);
        index.index("s1", &l);
        index.index("s2", &l);

        index.unindex("s1", &l);
        assert_eq!(index.lookup("host", "a"), vec!["s2"]);

        index.unindex("s2", &l);
        assert!(index.lookup("host", "a").is_empty());
        assert!(index.postings.is_empty());
    }

    #[test]
    fn test_matcher() {
        let matcher = LabelMatcher::new([("a", "1"), ("b", "2")]);
        assert!(matcher.matches(&labels(&[("a", "1"), ("b", "2"), ("c", "3")])));
        assert!(!matcher.matches(&labels(&[("a", "1")])));
        assert!(LabelMatcher::default().matches(&[]));
    }
}
