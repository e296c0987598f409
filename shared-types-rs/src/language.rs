// shared-types-rs/src/language.rs
// Supported conversation languages

use serde::{Deserialize, Serialize};
use std::fmt;

/// Languages the agent has a timing profile for.
///
/// Any tag that does not start with `ja` falls back to English, which is
/// also the profile used for unknown languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Japanese,
    English,
}

impl Language {
    /// Resolves a BCP-47 style tag such as `ja-JP`, `ja` or `en-US`.
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim().to_ascii_lowercase().starts_with("ja") {
            Language::Japanese
        } else {
            Language::English
        }
    }

    /// Canonical tag for the language profile.
    pub fn tag(&self) -> &'static str {
        match self {
            Language::Japanese => "ja-JP",
            Language::English => "en-US",
        }
    }

    pub fn is_japanese(&self) -> bool {
        matches!(self, Language::Japanese)
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::English
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag() {
        assert_eq!(Language::from_tag("ja-JP"), Language::Japanese);
        assert_eq!(Language::from_tag("JA"), Language::Japanese);
        assert_eq!(Language::from_tag("en-US"), Language::English);
        assert_eq!(Language::from_tag("fr-FR"), Language::English);
        assert_eq!(Language::from_tag(""), Language::English);
    }

    #[test]
    fn test_canonical_tag() {
        assert_eq!(Language::Japanese.tag(), "ja-JP");
        assert_eq!(Language::English.to_string(), "en-US");
    }
}
