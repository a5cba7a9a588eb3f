//! Store error taxonomy
//!
//! One error enum covers every backend and the router; errors cross backend
//! boundaries unchanged and the router never wraps them. We use `thiserror`
//! for automatic `Display` and `Error` trait implementations.

use modulestore_keys::KeyError;
use std::io;
use thiserror::Error;

use crate::types::StoreType;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the modulestore and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// A key string failed to parse or validate.
    #[error("malformed key: {0}")]
    MalformedKey(#[from] KeyError),

    /// The requested block or course does not exist in the selected branch.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// A key-value operation targeted a scope the binding does not support.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// The operation was applied to the wrong revision, e.g. convert-to-draft
    /// on a direct-only category.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// An insert would create a second block at an existing id.
    #[error("duplicate item: {0}")]
    DuplicateItem(String),

    /// A course with the same (org, course, run) already exists.
    #[error("duplicate course: {0}")]
    DuplicateCourse(String),

    /// The revision argument is outside the allowed set for the call.
    #[error("unsupported revision: {0}")]
    UnsupportedRevision(String),

    /// A write was attempted on a read-only backend.
    #[error("store '{0}' is read-only")]
    ReadOnlyStore(StoreType),

    /// A write was attempted on a read-only asset attribute.
    #[error("attribute '{0}' is read-only")]
    ReadOnlyAttribute(String),

    /// More than one course matched where exactly one was required.
    #[error("ambiguous course key: {0}")]
    AmbiguousCourseKey(String),

    /// A children write would make a block its own ancestor.
    #[error("circular reference: {0}")]
    CircularReference(String),

    /// The caller canceled the operation or its deadline passed.
    #[error("operation aborted: {0}")]
    OperationAborted(String),

    /// The requested asset does not exist.
    #[error("asset not found: {0}")]
    AssetNotFound(String),

    /// A field name is not declared for the block's category.
    #[error("unknown field '{field}' for category '{category}'")]
    UnknownField {
        /// The undeclared field name.
        field: String,
        /// The category whose field set was consulted.
        category: String,
    },

    /// The store configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The underlying document store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file operations on tree and content stores).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Not-found constructor from any displayable key.
    pub fn not_found(key: impl std::fmt::Display) -> Self {
        Error::ItemNotFound(key.to_string())
    }

    /// Duplicate-item constructor from any displayable key.
    pub fn duplicate(key: impl std::fmt::Display) -> Self {
        Error::DuplicateItem(key.to_string())
    }

    /// True for the not-found variants (blocks, courses, assets).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ItemNotFound(_) | Error::AssetNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modulestore_keys::CourseKey;

    #[test]
    fn test_display_malformed_key() {
        let key_err = CourseKey::parse("only-one-segment").unwrap_err();
        let err: Error = key_err.into();
        let msg = err.to_string();
        assert!(msg.contains("malformed key"), "got: {}", msg);
    }

    #[test]
    fn test_display_item_not_found() {
        let err = Error::not_found("i4x://edX/toy/problem/p1");
        assert_eq!(err.to_string(), "item not found: i4x://edX/toy/problem/p1");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_display_read_only_store() {
        let err = Error::ReadOnlyStore(StoreType::TreeOfFiles);
        assert_eq!(err.to_string(), "store 'tree_of_files' is read-only");
    }

    #[test]
    fn test_display_unknown_field() {
        let err = Error::UnknownField {
            field: "nope".to_string(),
            category: "problem".to_string(),
        };
        assert_eq!(err.to_string(), "unknown field 'nope' for category 'problem'");
    }

    #[test]
    fn test_display_duplicate_course() {
        let err = Error::DuplicateCourse("edX/toy/2012_Fall".to_string());
        assert!(err.to_string().contains("duplicate course"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn ok() -> Result<i32> {
            Ok(7)
        }
        fn fails() -> Result<i32> {
            Err(Error::InvalidVersion("direct-only category".to_string()))
        }
        assert_eq!(ok().unwrap(), 7);
        assert!(fails().is_err());
    }

    #[test]
    fn test_asset_not_found_is_not_found() {
        assert!(Error::AssetNotFound("c4x://edX/toy/asset/x.png".into()).is_not_found());
        assert!(!Error::Storage("disk gone".into()).is_not_found());
    }
}
