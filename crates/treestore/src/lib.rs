//! Tree-of-files backend
//!
//! Serves bundled and demo courses from a directory tree of JSON
//! files, one sub-directory per course. Everything is parsed at open
//! and held resident:
//! - loader: manifest, block file and policy parsing into snapshots
//! - TreeStore: the read-only ModuleStore over the loaded courses
//!
//! There is no draft branch and no write path; every write operation
//! fails with `Error::ReadOnlyStore` and loaded blocks reject field
//! mutation.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod loader;
mod store;

pub use loader::{LoadError, COURSE_MANIFEST, POLICY_FILE};
pub use store::TreeStore;
