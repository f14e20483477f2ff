//! Identifier types used across the analytics engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TraitError;

/// Company identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CompanyId(pub String);

impl CompanyId {
    /// Create a new company ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CompanyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CompanyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Bid identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BidId(pub String);

impl BidId {
    /// Create a new bid ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BidId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Project category label.
///
/// Labels are normalized to lowercase and restricted to `[a-z0-9_-]`,
/// 1 to 64 characters. The set of known labels is owned by the ledger.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectType(String);

impl ProjectType {
    /// Maximum label length.
    pub const MAX_LEN: usize = 64;

    /// Parse and normalize a project type label.
    pub fn parse(raw: &str) -> Result<Self, TraitError> {
        let label = raw.trim().to_lowercase();
        if label.is_empty() {
            return Err(TraitError::InvalidInput("project type is empty".into()));
        }
        if label.len() > Self::MAX_LEN {
            return Err(TraitError::InvalidInput(format!(
                "project type longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(TraitError::InvalidInput(format!(
                "project type '{}' contains unsupported characters",
                raw
            )));
        }
        Ok(Self(label))
    }

    /// Get the label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectType {
    type Err = TraitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProjectType {
    type Error = TraitError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ProjectType> for String {
    fn from(p: ProjectType) -> Self {
        p.0
    }
}
