//! Channel key and source reference value objects.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Maximum length of a normalized channel key.
pub const MAX_KEY_LEN: usize = 64;

/// Maximum length of a source reference in bytes.
pub const MAX_SOURCE_LEN: usize = 2048;

/// A normalized channel key.
///
/// Keys are lowercase and limited to `[a-z0-9-]`, starting with an
/// alphanumeric character. They name the channel's store directory, its
/// playlist and its segment files, so `_` is reserved as the segment
/// sequence separator and never appears in a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Normalize a user supplied channel name and validate the result.
    pub fn new(name: impl AsRef<str>) -> Result<Self, Error> {
        let normalized = Self::normalize(name.as_ref());
        Self::validate(&normalized)?;
        Ok(Self(normalized))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trim, lowercase, and fold runs of whitespace or `_` into a single `-`.
    fn normalize(name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        let mut pending_dash = false;

        for c in name.trim().chars() {
            if c.is_whitespace() || c == '_' {
                pending_dash = true;
                continue;
            }
            if pending_dash {
                out.push('-');
                pending_dash = false;
            }
            out.extend(c.to_lowercase());
        }

        out
    }

    fn validate(key: &str) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::validation("channel key cannot be empty"));
        }

        if key.len() > MAX_KEY_LEN {
            return Err(Error::validation(format!(
                "channel key cannot exceed {} characters",
                MAX_KEY_LEN
            )));
        }

        if !key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::validation(format!(
                "channel key '{}' may only contain a-z, 0-9 and '-'",
                key
            )));
        }

        if key.starts_with('-') {
            return Err(Error::validation("channel key must start with a letter or digit"));
        }

        Ok(())
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ChannelKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChannelKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChannelKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelKey> for String {
    fn from(key: ChannelKey) -> Self {
        key.0
    }
}

/// An opaque reference to a live source, such as a page URL.
///
/// The reference is handed to the external resolver untouched; only
/// obviously malformed values are rejected here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceReference(String);

impl SourceReference {
    /// Create a new source reference, validating it.
    pub fn new(reference: impl AsRef<str>) -> Result<Self, Error> {
        let reference = reference.as_ref().trim();

        if reference.is_empty() {
            return Err(Error::validation("source reference cannot be empty"));
        }

        if reference.len() > MAX_SOURCE_LEN {
            return Err(Error::validation(format!(
                "source reference cannot exceed {} bytes",
                MAX_SOURCE_LEN
            )));
        }

        if reference
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(Error::validation(
                "source reference cannot contain whitespace or control characters",
            ));
        }

        Ok(Self(reference.to_string()))
    }

    /// Create a reference without validation (for trusted sources like the record store).
    pub fn from_trusted(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Get the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        assert_eq!(ChannelKey::new("gma7").unwrap().as_str(), "gma7");
        assert_eq!(ChannelKey::new("  GMA7 ").unwrap().as_str(), "gma7");
        assert_eq!(ChannelKey::new("News  Live").unwrap().as_str(), "news-live");
        assert_eq!(ChannelKey::new("news__live_2").unwrap().as_str(), "news-live-2");
        assert_eq!(ChannelKey::new("a-b").unwrap().as_str(), "a-b");
    }

    #[test]
    fn test_key_rejects_malformed() {
        assert!(ChannelKey::new("").is_err());
        assert!(ChannelKey::new("   ").is_err());
        assert!(ChannelKey::new("../etc").is_err());
        assert!(ChannelKey::new("a/b").is_err());
        assert!(ChannelKey::new("-lead").is_err());
        assert!(ChannelKey::new("caf\u{e9}").is_err());
        assert!(ChannelKey::new("x".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(ChannelKey::new("x".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn test_key_serde_roundtrip_validates() {
        let key: ChannelKey = serde_json::from_str("\"GMA7\"").unwrap();
        assert_eq!(key.as_str(), "gma7");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"gma7\"");
        assert!(serde_json::from_str::<ChannelKey>("\"a/b\"").is_err());
    }

    #[test]
    fn test_source_reference_validation() {
        let source = SourceReference::new(" https://example/live1 ").unwrap();
        assert_eq!(source.as_str(), "https://example/live1");

        assert!(SourceReference::new("").is_err());
        assert!(SourceReference::new("https://example/a b").is_err());
        assert!(SourceReference::new("https://example/\u{0}").is_err());
        assert!(SourceReference::new("x".repeat(MAX_SOURCE_LEN + 1)).is_err());
    }
}
