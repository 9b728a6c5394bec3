// ABOUTME: Git branch names as used for checkout and release directory naming.
// ABOUTME: Rejects refs git would refuse; sanitises slashes for directory names.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BranchError {
    #[error("branch name cannot be empty")]
    Empty,

    #[error("branch name cannot contain whitespace or control characters")]
    Whitespace,

    #[error("branch name cannot contain '..'")]
    DoubleDot,

    #[error("invalid character in branch name: '{0}'")]
    InvalidChar(char),

    #[error("branch name cannot start or end with '/' or '-'")]
    BadEdge,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Branch(String);

impl Branch {
    pub fn new(value: &str) -> Result<Self, BranchError> {
        if value.is_empty() {
            return Err(BranchError::Empty);
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(BranchError::Whitespace);
        }
        if value.contains("..") {
            return Err(BranchError::DoubleDot);
        }
        if let Some(c) = value.chars().find(|c| "~^:?*[\\'\"`$;&|<>".contains(*c)) {
            return Err(BranchError::InvalidChar(c));
        }
        if value.starts_with(['/', '-']) || value.ends_with('/') {
            return Err(BranchError::BadEdge);
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Form used inside release directory names: `feature/login` becomes `feature-login`.
    pub fn slug(&self) -> String {
        self.0.replace('/', "-")
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
