use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Label set attached to pods and used as a job selector.
///
/// Keys are unique and kept in key order, so the rendered selector string is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(pub BTreeMap<String, String>);

impl Labels {
    /// Create an empty label set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Create a label set containing a single key-value pair.
    pub fn single<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels = Self::new();
        labels.insert(key, value);
        labels
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert a pair, replacing any previous value for the key.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render the label query used by the watch API: `k1=v1,k2=v2`, sorted by key.
    ///
    /// An empty set renders as the empty string, which selects everything.
    pub fn selector(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse an equality-based label query produced by [`Labels::selector`].
    pub fn parse_selector(s: &str) -> Result<Self, ModelError> {
        let mut labels = Self::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| ModelError::InvalidSelector(s.to_string()))?;
            let k = k.trim();
            if k.is_empty() {
                return Err(ModelError::InvalidSelector(s.to_string()));
            }
            labels.insert(k, v.trim());
        }
        Ok(labels)
    }

    /// Returns `true` if every pair of `self` is present in `other`.
    pub fn matches(&self, other: &Labels) -> bool {
        self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V> FromIterator<(K, V)> for Labels
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
