//! core::branch::schema
//!
//! Serialized branch document (v1).
//!
//! # Schema Design
//!
//! - Self-describing with `kind` and `schema_version`
//! - The branch body is a tagged union discriminated by `type`
//!   (`main` or `child`), decoded into the single [`Branch`] value
//! - Strictly parsed (unknown top-level fields are rejected)
//!
//! # Example
//!
//! ```
//! use branchline::core::branch::schema::{parse_branch, to_canonical_json};
//! use branchline::core::branch::Branch;
//! use branchline::core::types::Timestamp;
//!
//! let main = Branch::main(Timestamp::new(0), Timestamp::new(10)).unwrap();
//! let json = to_canonical_json(&main).unwrap();
//! assert!(json.contains("\"type\": \"main\""));
//! assert_eq!(parse_branch(&json).unwrap(), main);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Branch, InvariantError, StorageHandle};
use crate::core::types::{BranchName, BranchPath, Metadata, Timestamp, TypeError};

/// The kind identifier for branch documents.
pub const DOCUMENT_KIND: &str = "branchline.branch";

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from decoding branch documents.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse branch document: {0}")]
    ParseError(String),

    #[error("invalid kind '{found}', expected '{}'", DOCUMENT_KIND)]
    InvalidKind { found: String },

    #[error("unsupported schema version {0}, supported: {SCHEMA_VERSION}")]
    UnsupportedVersion(u32),

    #[error("invalid branch document: {0}")]
    InvalidValue(String),

    #[error("type validation failed: {0}")]
    TypeError(#[from] TypeError),

    #[error("branch invariant violated: {0}")]
    Invariant(#[from] InvariantError),
}

/// Envelope for version dispatch before full parsing.
#[derive(Debug, Deserialize)]
struct DocumentEnvelope {
    kind: String,
    schema_version: u32,
}

/// A stored branch version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BranchDocument {
    /// Kind identifier (always "branchline.branch")
    pub kind: String,

    /// Schema version (always 1 for this struct)
    pub schema_version: u32,

    /// Variant-specific body
    pub branch: BranchBody,
}

/// Branch body, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchBody {
    Main {
        base_timestamp: Timestamp,
        head_timestamp: Timestamp,
        #[serde(default)]
        metadata: Metadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle: Option<StorageHandle>,
    },
    Child {
        parent_path: String,
        name: String,
        base_timestamp: Timestamp,
        head_timestamp: Timestamp,
        #[serde(default)]
        deleted: bool,
        #[serde(default)]
        metadata: Metadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle: Option<StorageHandle>,
    },
}

impl BranchDocument {
    /// Build the document for a branch version.
    pub fn from_branch(branch: &Branch) -> Self {
        let body = match branch.parent_path() {
            None => BranchBody::Main {
                base_timestamp: branch.base,
                head_timestamp: branch.head,
                metadata: branch.metadata.clone(),
                handle: branch.handle.clone(),
            },
            Some(parent) => BranchBody::Child {
                parent_path: parent.to_string(),
                name: branch.name().to_string(),
                base_timestamp: branch.base,
                head_timestamp: branch.head,
                deleted: branch.deleted,
                metadata: branch.metadata.clone(),
                handle: branch.handle.clone(),
            },
        };
        Self {
            kind: DOCUMENT_KIND.to_string(),
            schema_version: SCHEMA_VERSION,
            branch: body,
        }
    }

    /// Validate and decode into a [`Branch`].
    ///
    /// # Errors
    ///
    /// Returns an error if the kind or version is wrong, a path or name is
    /// malformed, or the timestamps violate `head >= base`.
    pub fn into_branch(self) -> Result<Branch, SchemaError> {
        if self.kind != DOCUMENT_KIND {
            return Err(SchemaError::InvalidKind { found: self.kind });
        }
        if self.schema_version != SCHEMA_VERSION {
            return Err(SchemaError::UnsupportedVersion(self.schema_version));
        }

        let branch = match self.branch {
            BranchBody::Main {
                base_timestamp,
                head_timestamp,
                metadata,
                handle,
            } => Branch::from_parts(
                BranchPath::main(),
                base_timestamp,
                head_timestamp,
                false,
                metadata,
                handle,
            )?,
            BranchBody::Child {
                parent_path,
                name,
                base_timestamp,
                head_timestamp,
                deleted,
                metadata,
                handle,
            } => {
                let parent = BranchPath::new(parent_path)?;
                let name = BranchName::new(name)?;
                Branch::from_parts(
                    parent.child(&name),
                    base_timestamp,
                    head_timestamp,
                    deleted,
                    metadata,
                    handle,
                )?
            }
        };
        Ok(branch)
    }
}

/// Parse a branch document with version dispatch.
///
/// # Errors
///
/// Returns an error if:
/// - The JSON is malformed
/// - The `kind` field doesn't match [`DOCUMENT_KIND`]
/// - The `schema_version` is not supported
/// - Any field values are invalid
pub fn parse_branch(json: &str) -> Result<Branch, SchemaError> {
    let envelope: DocumentEnvelope =
        serde_json::from_str(json).map_err(|e| SchemaError::ParseError(e.to_string()))?;

    if envelope.kind != DOCUMENT_KIND {
        return Err(SchemaError::InvalidKind {
            found: envelope.kind,
        });
    }

    match envelope.schema_version {
        1 => {
            let doc: BranchDocument =
                serde_json::from_str(json).map_err(|e| SchemaError::ParseError(e.to_string()))?;
            doc.into_branch()
        }
        v => Err(SchemaError::UnsupportedVersion(v)),
    }
}

/// Serialize a branch to pretty, key-ordered JSON.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidValue`] if serialization fails.
pub fn to_canonical_json(branch: &Branch) -> Result<String, SchemaError> {
    serde_json::to_string_pretty(&BranchDocument::from_branch(branch))
        .map_err(|e| SchemaError::InvalidValue(e.to_string()))
}
