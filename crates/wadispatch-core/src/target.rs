//! Target resolution: raw phone numbers / group ids to canonical addresses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DispatchError;

/// Address suffix for individual contacts.
pub const CONTACT_SUFFIX: &str = "s.whatsapp.net";

/// Address suffix for groups.
pub const GROUP_SUFFIX: &str = "g.us";

/// Whether targets are individual contacts or groups.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Individual,
    Group,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Group => "group",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Self::Individual => CONTACT_SUFFIX,
            Self::Group => GROUP_SUFFIX,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "individual" => Ok(Self::Individual),
            "group" => Ok(Self::Group),
            other => Err(DispatchError::Validation(format!(
                "invalid target type '{other}', expected 'individual' or 'group'"
            ))),
        }
    }
}

/// A single delivery destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub raw: String,
    pub address: String,
    pub kind: TargetKind,
}

impl Target {
    /// Build a target, deriving the canonical address from `raw` and `kind`.
    pub fn new(raw: &str, kind: TargetKind) -> Self {
        Self {
            raw: raw.to_string(),
            address: canonical_address(raw, kind),
            kind,
        }
    }
}

/// Strip every non-digit and append the suffix for `kind`.
pub fn canonical_address(raw: &str, kind: TargetKind) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}@{}", kind.suffix())
}

/// Resolve a newline-delimited block into targets, in input order.
///
/// Blank lines are skipped and duplicates are kept. An empty block resolves
/// to the fallback alone (self-send).
pub fn resolve_targets(raw: &str, fallback: &str, kind: TargetKind) -> Vec<Target> {
    let targets: Vec<Target> = raw
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(|line| Target::new(line, kind))
        .collect();

    if targets.is_empty() {
        return vec![Target::new(fallback, kind)];
    }
    targets
}
