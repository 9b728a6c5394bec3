// ABOUTME: DNS-label-like site identifier validation.
// ABOUTME: Names the proxy site file, the compose project and the single-image container.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SiteIdError {
    #[error("site identifier cannot be empty")]
    Empty,

    #[error("site identifier exceeds maximum length of 63 characters")]
    TooLong,

    #[error("site identifier cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("site identifier cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("site identifier must be lowercase")]
    NotLowercase,

    #[error("invalid character in site identifier: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(value: &str) -> Result<Self, SiteIdError> {
        if value.is_empty() {
            return Err(SiteIdError::Empty);
        }

        if value.len() > 63 {
            return Err(SiteIdError::TooLong);
        }

        if value.starts_with('-') {
            return Err(SiteIdError::StartsWithHyphen);
        }

        if value.ends_with('-') {
            return Err(SiteIdError::EndsWithHyphen);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(SiteIdError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(SiteIdError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_labels() {
        assert_eq!(SiteId::new("my-app2").unwrap().as_str(), "my-app2");
    }

    #[test]
    fn rejects_bad_labels() {
        assert_eq!(SiteId::new(""), Err(SiteIdError::Empty));
        assert_eq!(SiteId::new("-app"), Err(SiteIdError::StartsWithHyphen));
        assert_eq!(SiteId::new("app-"), Err(SiteIdError::EndsWithHyphen));
        assert_eq!(SiteId::new("MyApp"), Err(SiteIdError::NotLowercase));
        assert_eq!(SiteId::new("my_app"), Err(SiteIdError::InvalidChar('_')));
        assert_eq!(SiteId::new(&"a".repeat(64)), Err(SiteIdError::TooLong));
    }
}
