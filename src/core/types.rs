//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`BranchName`] - Validated single path segment
//! - [`BranchPath`] - Validated `/`-delimited branch path rooted at `MAIN`
//! - [`Timestamp`] - Point on a branch timeline
//! - [`Metadata`] - Opaque key/value map carried by every branch version
//! - [`UtcTimestamp`] - RFC3339 wall-clock timestamp
//! - [`Fingerprint`] - Stable hash over a branch snapshot
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use branchline::core::types::{BranchName, BranchPath};
//!
//! let name = BranchName::new("project-42").unwrap();
//! let path = BranchPath::main().child(&name);
//! assert_eq!(path.as_str(), "MAIN/project-42");
//!
//! assert!(BranchName::new("has space").is_err());
//! assert!(BranchPath::new("OTHER/x").is_err());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Literal name of the root branch.
pub const MAIN_PATH: &str = "MAIN";

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Maximum length of a single branch name.
pub const MAX_NAME_LENGTH: usize = 50;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid branch path: {0}")]
    InvalidBranchPath(String),
}

/// A validated branch name (one path segment).
///
/// Names match `[A-Za-z0-9_-]{1,50}`.
///
/// # Example
///
/// ```
/// use branchline::core::types::BranchName;
///
/// assert!(BranchName::new("task-7").is_ok());
/// assert!(BranchName::new("a_b_C_9").is_ok());
///
/// assert!(BranchName::new("").is_err());
/// assert!(BranchName::new("with/slash").is_err());
/// assert!(BranchName::new("x".repeat(51)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name is empty, longer
    /// than 50 characters, or contains characters outside `[A-Za-z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be empty".into(),
            ));
        }

        if name.len() > MAX_NAME_LENGTH {
            return Err(TypeError::InvalidBranchName(format!(
                "branch name '{name}' exceeds {MAX_NAME_LENGTH} characters"
            )));
        }

        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(TypeError::InvalidBranchName(format!(
                "branch name '{name}' contains invalid character {c:?}"
            )));
        }

        Ok(())
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated, absolute branch path.
///
/// The first segment is always the root literal `MAIN`; every following
/// segment is a valid [`BranchName`].
///
/// # Example
///
/// ```
/// use branchline::core::types::BranchPath;
///
/// let path = BranchPath::new("MAIN/project-42/task-7").unwrap();
/// assert_eq!(path.name(), "task-7");
/// assert_eq!(path.parent().unwrap().as_str(), "MAIN/project-42");
/// assert!(BranchPath::main().parent().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchPath(String);

impl BranchPath {
    /// Create a new validated branch path.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchPath` if the path does not start
    /// with `MAIN` or any later segment is not a valid branch name.
    pub fn new(path: impl Into<String>) -> Result<Self, TypeError> {
        let path = path.into();
        Self::validate(&path)?;
        Ok(Self(path))
    }

    /// The root branch path.
    pub fn main() -> Self {
        Self(MAIN_PATH.to_string())
    }

    fn validate(path: &str) -> Result<(), TypeError> {
        let mut segments = path.split(SEPARATOR);
        match segments.next() {
            Some(MAIN_PATH) => {}
            _ => {
                return Err(TypeError::InvalidBranchPath(format!(
                    "path '{path}' must start with '{MAIN_PATH}'"
                )))
            }
        }
        for segment in segments {
            BranchName::new(segment).map_err(|e| {
                TypeError::InvalidBranchPath(format!("path '{path}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Build the path of a direct child of this path.
    pub fn child(&self, name: &BranchName) -> Self {
        Self(format!("{}{}{}", self.0, SEPARATOR, name))
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rfind(SEPARATOR)
            .map(|idx| Self(self.0[..idx].to_string()))
    }

    /// The last segment of the path.
    pub fn name(&self) -> &str {
        match self.0.rfind(SEPARATOR) {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Check if this is the root path.
    pub fn is_main(&self) -> bool {
        self.0 == MAIN_PATH
    }

    /// Number of segments below the root (root has depth 0).
    pub fn depth(&self) -> usize {
        self.0.matches(SEPARATOR).count()
    }

    /// Check if `self` is a strict descendant of `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &BranchPath) -> bool {
        self.0
            .strip_prefix(ancestor.as_str())
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
    }

    /// Prefix matching every strict descendant (`<path>/`).
    pub fn descendant_prefix(&self) -> String {
        format!("{}{}", self.0, SEPARATOR)
    }

    /// Get the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchPath {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchPath> for String {
    fn from(path: BranchPath) -> Self {
        path.0
    }
}

impl AsRef<str> for BranchPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point on a branch timeline.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from its raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque key/value metadata carried across all versions of a branch.
///
/// Keys are kept ordered so serialized output and fingerprints are stable.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A UTC timestamp in RFC3339 format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtcTimestamp(chrono::DateTime<chrono::Utc>);

impl UtcTimestamp {
    /// Create a timestamp for the current moment.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Get the underlying datetime.
    pub fn as_datetime(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.0
    }
}

impl std::fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// A stable hash over a branch snapshot.
///
/// Two snapshots produce the same fingerprint exactly when their path,
/// timestamps and deletion flag agree. Reviews use this to detect that a
/// branch moved after the review was opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute a fingerprint over the state-relevant parts of a branch.
    pub fn compute(path: &BranchPath, base: Timestamp, head: Timestamp, deleted: bool) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(base.get().to_be_bytes());
        hasher.update(head.get().to_be_bytes());
        hasher.update([u8::from(deleted)]);
        Self(hex::encode(hasher.finalize()))
    }

    /// Get the fingerprint as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod branch_name {
        use super::*;

        #[test]
        fn valid_branch_names() {
            assert!(BranchName::new("main").is_ok());
            assert!(BranchName::new("project-42").is_ok());
            assert!(BranchName::new("task_7").is_ok());
            assert!(BranchName::new("CamelCase").is_ok());
            assert!(BranchName::new("x".repeat(50)).is_ok());
        }

        #[test]
        fn empty_name_rejected() {
            assert!(BranchName::new("").is_err());
        }

        #[test]
        fn too_long_rejected() {
            assert!(BranchName::new("x".repeat(51)).is_err());
        }

        #[test]
        fn special_chars_rejected() {
            for bad in ["a/b", "a.b", "has space", "a~b", "a:b", "ümlaut", "a@b"] {
                assert!(BranchName::new(bad).is_err(), "{bad} should be rejected");
            }
        }

        #[test]
        fn serde_rejects_invalid() {
            let parsed: Result<BranchName, _> = serde_json::from_str("\"bad name\"");
            assert!(parsed.is_err());
        }
    }

    mod branch_path {
        use super::*;

        #[test]
        fn main_is_valid() {
            let main = BranchPath::new("MAIN").unwrap();
            assert!(main.is_main());
            assert_eq!(main, BranchPath::main());
            assert_eq!(main.depth(), 0);
            assert_eq!(main.name(), "MAIN");
        }

        #[test]
        fn must_start_with_main() {
            assert!(BranchPath::new("").is_err());
            assert!(BranchPath::new("main").is_err());
            assert!(BranchPath::new("OTHER/a").is_err());
            assert!(BranchPath::new("/MAIN").is_err());
        }

        #[test]
        fn segments_validated() {
            assert!(BranchPath::new("MAIN/a/b").is_ok());
            assert!(BranchPath::new("MAIN/").is_err());
            assert!(BranchPath::new("MAIN//a").is_err());
            assert!(BranchPath::new("MAIN/a b").is_err());
        }

        #[test]
        fn child_and_parent() {
            let a = BranchName::new("a").unwrap();
            let path = BranchPath::main().child(&a);
            assert_eq!(path.as_str(), "MAIN/a");
            assert_eq!(path.parent(), Some(BranchPath::main()));
            assert_eq!(path.name(), "a");
            assert_eq!(path.depth(), 1);
        }

        #[test]
        fn descendant_check_is_segment_aware() {
            let a = BranchPath::new("MAIN/a").unwrap();
            let ab = BranchPath::new("MAIN/a/b").unwrap();
            let abc = BranchPath::new("MAIN/abc").unwrap();
            assert!(ab.is_descendant_of(&a));
            assert!(ab.is_descendant_of(&BranchPath::main()));
            assert!(!abc.is_descendant_of(&a));
            assert!(!a.is_descendant_of(&a));
        }
    }

    mod fingerprint {
        use super::*;

        #[test]
        fn deterministic() {
            let path = BranchPath::new("MAIN/a").unwrap();
            let fp1 = Fingerprint::compute(&path, Timestamp::new(1), Timestamp::new(2), false);
            let fp2 = Fingerprint::compute(&path, Timestamp::new(1), Timestamp::new(2), false);
            assert_eq!(fp1, fp2);
            assert_eq!(fp1.as_str().len(), 64);
        }

        #[test]
        fn head_change_changes_fingerprint() {
            let path = BranchPath::new("MAIN/a").unwrap();
            let fp1 = Fingerprint::compute(&path, Timestamp::new(1), Timestamp::new(2), false);
            let fp2 = Fingerprint::compute(&path, Timestamp::new(1), Timestamp::new(3), false);
            let fp3 = Fingerprint::compute(&path, Timestamp::new(1), Timestamp::new(2), true);
            assert_ne!(fp1, fp2);
            assert_ne!(fp1, fp3);
        }
    }

    #[test]
    fn utc_timestamp_serde_roundtrip() {
        let ts = UtcTimestamp::now();
        let json = serde_json::to_string(&ts).unwrap();
        let parsed: UtcTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, parsed);
    }
}
