//! Embedded JSON document store
//!
//! The persistence substrate shared by the writable backends:
//! - DocumentDatabase / Collection: named collections of JSON documents
//!   keyed by string id, in memory or snapshot-backed on disk
//! - Query: conjunctive conditions over dotted paths (equality with
//!   array-contains semantics, membership, regex, existence)
//! - QueryStats: operation counters for cache-effectiveness tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod query;
pub mod stats;

pub use database::{Collection, DocumentDatabase};
pub use query::{path_value, Cond, Query};
pub use stats::QueryStats;
