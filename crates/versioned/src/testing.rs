//! Shared fixtures for the versioned store tests.

use crate::store::VersionedStore;
use modulestore_core::{ModuleStore, StoreContext, UserId};
use modulestore_keys::{BlockType, CourseKey, UsageKey};
use serde_json::{Map as JsonMap, Value as Json};

pub(crate) fn user() -> UserId {
    UserId(42)
}

pub(crate) fn course_key() -> CourseKey {
    CourseKey::new("edX", "toy", "2012_Fall").unwrap()
}

pub(crate) fn vertical_key() -> UsageKey {
    course_key()
        .make_usage_key(BlockType::new("vertical").unwrap(), "v1")
        .unwrap()
}

pub(crate) fn fields(pairs: &[(&str, Json)]) -> JsonMap<String, Json> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// In-memory store seeded with one course on the draft branch:
///
/// ```text
/// course (2012_Fall)
/// └── chapter ch1        "Week 1", graded=true
///     └── sequential s1  "Lesson 1"
///         └── vertical v1 "Unit 1"
/// ```
///
/// Nothing is published; tests exercising the published branch publish
/// what they need, usually starting with [`publish_spine`].
pub(crate) fn populated_store() -> (VersionedStore, StoreContext) {
    let store = VersionedStore::in_memory();
    let ctx = StoreContext::draft_preferred();
    store
        .create_course(
            &ctx,
            user(),
            "edX",
            "toy",
            "2012_Fall",
            &fields(&[("display_name", serde_json::json!("Toy Course"))]),
        )
        .unwrap();
    let root = course_key().course_root_usage().unwrap();
    let chapter = store
        .create_child(
            &ctx,
            user(),
            &root,
            &BlockType::new("chapter").unwrap(),
            Some("ch1"),
            &fields(&[
                ("display_name", serde_json::json!("Week 1")),
                ("graded", serde_json::json!(true)),
            ]),
        )
        .unwrap();
    let sequential = store
        .create_child(
            &ctx,
            user(),
            chapter.location(),
            &BlockType::new("sequential").unwrap(),
            Some("s1"),
            &fields(&[("display_name", serde_json::json!("Lesson 1"))]),
        )
        .unwrap();
    store
        .create_child(
            &ctx,
            user(),
            sequential.location(),
            &BlockType::new("vertical").unwrap(),
            Some("v1"),
            &fields(&[("display_name", serde_json::json!("Unit 1"))]),
        )
        .unwrap();
    (store, ctx)
}

/// Publish the course root, chapter, and sequential of the seeded
/// course, top down, so leaf publishes find their parent chain on the
/// published branch. This mirrors what the router's auto-publish does
/// for direct-only categories.
pub(crate) fn publish_spine(store: &VersionedStore, ctx: &StoreContext) {
    let root = course_key().course_root_usage().unwrap();
    let chapter = course_key()
        .make_usage_key(BlockType::new("chapter").unwrap(), "ch1")
        .unwrap();
    let sequential = course_key()
        .make_usage_key(BlockType::new("sequential").unwrap(), "s1")
        .unwrap();
    for key in [root, chapter, sequential] {
        store.publish(ctx, &key, user()).unwrap();
    }
}
