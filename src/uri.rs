//! Dotted-label URIs and the [`SplitUri`] token sequence used to key the
//! [`crate::trie::TokenTrie`].
//!
//! A WAMP URI is a string such as `"com.example.test"`. For matching
//! purposes it's split into its `.`-separated labels; an empty label is a
//! wildcard position (see spec §4.2).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A procedure or topic URI, as carried on the wire.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct URI {
    pub uri: String,
}

impl URI {
    pub fn new<S: Into<String>>(uri: S) -> URI {
        URI { uri: uri.into() }
    }

    /// Splits this URI into its label sequence.
    pub fn split(&self) -> SplitUri {
        SplitUri::new(&self.uri)
    }
}

impl fmt::Display for URI {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

impl From<&str> for URI {
    fn from(s: &str) -> URI {
        URI::new(s)
    }
}

impl From<String> for URI {
    fn from(s: String) -> URI {
        URI::new(s)
    }
}

struct URIVisitor;

impl Serialize for URI {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.uri)
    }
}

impl<'de> Deserialize<'de> for URI {
    fn deserialize<D>(deserializer: D) -> Result<URI, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(URIVisitor)
    }
}

impl<'de> serde::de::Visitor<'de> for URIVisitor {
    type Value = URI;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a URI string")
    }

    fn visit_str<E>(self, value: &str) -> Result<URI, E>
    where
        E: serde::de::Error,
    {
        Ok(URI::new(value))
    }
}

/// A finite ordered sequence of label tokens, each possibly empty.
///
/// Splitting `""` yields `[""]`; splitting `"."` yields `["", ""]`;
/// consecutive dots produce empty labels in between.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub struct SplitUri(Vec<String>);

impl SplitUri {
    pub fn new(uri: &str) -> SplitUri {
        SplitUri(uri.split('.').map(|s| s.to_string()).collect())
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    /// Any label in the sequence is empty (a wildcard position).
    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(|l| l.is_empty())
    }

    /// Reassembles the dotted URI string.
    pub fn to_uri_string(&self) -> String {
        self.0.join(".")
    }
}

impl From<&str> for SplitUri {
    fn from(s: &str) -> SplitUri {
        SplitUri::new(s)
    }
}

impl From<Vec<String>> for SplitUri {
    fn from(labels: Vec<String>) -> SplitUri {
        SplitUri(labels)
    }
}

impl<'a> IntoIterator for &'a SplitUri {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod test {
    use super::SplitUri;

    #[test]
    fn splits_empty_string_to_single_empty_label() {
        assert_eq!(SplitUri::new("").labels(), &[String::new()]);
    }

    #[test]
    fn splits_single_dot_to_two_empty_labels() {
        assert_eq!(
            SplitUri::new(".").labels(),
            &[String::new(), String::new()]
        );
    }

    #[test]
    fn splits_plain_uri() {
        assert_eq!(
            SplitUri::new("a.b.c").labels(),
            &["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn consecutive_dots_are_significant() {
        assert_eq!(
            SplitUri::new("a..c").labels(),
            &["a".to_string(), String::new(), "c".to_string()]
        );
        assert!(SplitUri::new("a..c").has_wildcard());
        assert!(!SplitUri::new("a.b.c").has_wildcard());
    }
}
