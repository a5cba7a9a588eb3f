//! Opaque keys for the modulestore
//!
//! This crate defines the identifier types used throughout the system:
//! - CourseKey: names a course run (org/course/run), optionally pinned to a
//!   branch or a structure version
//! - UsageKey: names one block within a course
//! - AssetKey: names one binary asset within a course
//! - DefinitionKey: names a shared definition document (versioned backend)
//! - BlockType: block category with the direct-only / detached policy sets
//! - Branch: the draft/published revision channel
//!
//! All keys are plain value types: cheap to clone, comparable, hashable, and
//! usable as map keys. String forms are canonical and round-trip exactly; see
//! each type for its grammar.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod asset;
pub mod block_type;
pub mod course;
pub mod definition;
pub mod error;
pub mod usage;

pub use asset::AssetKey;
pub use block_type::BlockType;
pub use course::{Branch, CourseKey, VersionGuid};
pub use definition::DefinitionKey;
pub use error::{KeyError, KeyResult};
pub use usage::UsageKey;

/// Tag prefix of the deprecated usage-key string form.
pub const USAGE_TAG: &str = "i4x";

/// Tag prefix of the asset-key string form.
pub const ASSET_TAG: &str = "c4x";
