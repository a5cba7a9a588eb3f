//! Core model shared by every modulestore backend
//!
//! This crate defines everything the backends and the router have in common:
//! - Error: the store error taxonomy and Result alias
//! - Enums: PublishState, BranchSetting, RevisionOption, StoreType
//! - Field model: scopes, descriptors, typed codecs, mixin bundles
//! - KeyValueStore: the per-backend storage-binding contract
//! - XBlock: the runtime block record served by every backend
//! - Inheritance: downward settings closure plus its cache chain
//! - StoreContext: the per-operation context (branch, request caches,
//!   cancellation)
//! - ModuleStore: the uniform backend trait the router dispatches to

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod context;
pub mod error;
pub mod fields;
pub mod inheritance;
pub mod kvs;
pub mod mixin;
pub mod store;
pub mod types;

pub use block::{ScopeIds, XBlock};
pub use context::{CancelToken, RequestScope, StoreContext};
pub use error::{Error, Result};
pub use fields::{FieldDescriptor, FieldType, FieldValue, Scope};
pub use inheritance::{
    compute_inheritance, InProcessInheritanceCache, InheritanceMap, InheritanceSeed,
    InheritedSettings, SeedNode, SharedInheritanceCache,
};
pub use kvs::{DocumentKvs, KeyValueStore, KvsKey, KvsSnapshot};
pub use mixin::{FieldBundle, FieldSet, FieldSetRegistry};
pub use store::{check_revision, ModuleStore, Qualifiers, ValueMatch};
pub use types::{BranchSetting, EditInfo, PublishState, RevisionOption, StoreType, UserId};
