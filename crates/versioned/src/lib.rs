//! Versioned structure backend
//!
//! Every save produces a new immutable structure document holding one
//! whole course version; branch pointers in a course index select the
//! draft and published heads, and course keys can pin any historical
//! version for read. The pieces:
//! - stored documents: structures, shared definition payloads, and the
//!   per-course index of branch pointers
//! - VersionedStore: branch and version resolution, reads, request
//!   caching
//! - write operations: copy-on-write structure edits committed by
//!   advancing a branch pointer
//! - branch lifecycle: publish grafts with source-version lineage,
//!   unpublish, revert, and publish-state queries

#![warn(missing_docs)]
#![warn(clippy::all)]

mod branches;
mod document;
mod store;
mod writes;

#[cfg(test)]
pub(crate) mod testing;

pub use document::{
    CourseIndexDoc, DefinitionDoc, StructureBlock, StructureDoc, COURSE_INDEXES, DEFINITIONS,
    STRUCTURES,
};
pub use store::VersionedStore;
