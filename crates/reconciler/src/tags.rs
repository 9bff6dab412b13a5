//! Resource tags.

use std::collections::BTreeSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Tags on a resource. Equality ignores order and duplicates; iteration
/// keeps insertion order.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Tags(Vec<String>);

impl Tags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            tags.into_iter()
                .map(Into::<String>::into)
                .unique()
                .collect(),
        )
    }

    /// The tag used to filter listings.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_set(&self) -> BTreeSet<&str> {
        self.iter().collect()
    }
}

impl PartialEq for Tags {
    fn eq(&self, other: &Self) -> bool {
        self.as_set() == other.as_set()
    }
}

impl From<Vec<String>> for Tags {
    fn from(tags: Vec<String>) -> Self {
        Self::new(tags)
    }
}

impl From<Tags> for Vec<String> {
    fn from(tags: Tags) -> Self {
        tags.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_order() {
        assert_eq!(Tags::new(["a", "b"]), Tags::new(["b", "a"]));
        assert_ne!(Tags::new(["a"]), Tags::new(["a", "b"]));
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let tags = Tags::new(["InstanceName:nodes-1", "cluster.example.com", "InstanceName:nodes-1"]);
        assert_eq!(tags.first(), Some("InstanceName:nodes-1"));
        assert_eq!(tags.len(), 2);
        assert_eq!(
            tags.iter().collect::<Vec<_>>(),
            vec!["InstanceName:nodes-1", "cluster.example.com"]
        );
    }
}
