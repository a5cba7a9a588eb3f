//! Per-block document backend
//!
//! Every block revision is one JSON document in a docstore collection;
//! the draft copy sits beside the published copy under an id suffixed
//! `@draft`. The pieces:
//! - BlockDocument: the stored shape and its XBlock conversions
//! - PerBlockStore: revision resolution, reads, inheritance and request
//!   caching
//! - write operations: create/update/delete with auto-draft and
//!   static-tab synchronization
//! - lifecycle transitions: publish, unpublish, convert_to_draft,
//!   revert_to_published

#![warn(missing_docs)]
#![warn(clippy::all)]

mod document;
mod draft;
mod store;
mod writes;

#[cfg(test)]
pub(crate) mod testing;

pub use document::{BlockDocument, Definition, COLLECTION};
pub use store::PerBlockStore;
