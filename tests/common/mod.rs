//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use modulestore::{
    BlockType, CourseKey, MixedRouter, ModuleStore, StoreContext, StoreType, UsageKey, UserId,
    XBlock,
};
use serde_json::{Map as JsonMap, Value as Json};
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Route tracing output through the test harness once per process.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub fn user() -> UserId {
    UserId(7)
}

pub fn fields(pairs: &[(&str, Json)]) -> JsonMap<String, Json> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn category(name: &str) -> BlockType {
    BlockType::new(name).unwrap()
}

/// One course with the standard container spine and a leaf problem:
///
/// ```text
/// course (edX/toy/2012_Fall)
/// └── chapter ch1          direct-only
///     └── sequential s1    direct-only
///         └── vertical v1  draft-capable
///             └── problem p1
/// ```
pub struct Spine {
    pub course: CourseKey,
    pub root: UsageKey,
    pub chapter: UsageKey,
    pub sequential: UsageKey,
    pub vertical: UsageKey,
    pub problem: UsageKey,
}

/// Build the spine in whichever store currently receives new courses.
pub fn build_spine(
    store: &MixedRouter,
    ctx: &StoreContext,
    course_fields: &JsonMap<String, Json>,
) -> Spine {
    let root_block = store
        .create_course(ctx, user(), "edX", "toy", "2012_Fall", course_fields)
        .unwrap();
    let root = root_block.location().clone();
    let course = root.course_key().for_branch(None);
    let chapter = create_under(store, ctx, &root, "chapter", "ch1", "Week 1");
    let sequential = create_under(store, ctx, &chapter, "sequential", "s1", "Lesson 1");
    let vertical = create_under(store, ctx, &sequential, "vertical", "v1", "Unit 1");
    let problem = create_under(store, ctx, &vertical, "problem", "p1", "Quiz");
    Spine {
        course,
        root,
        chapter,
        sequential,
        vertical,
        problem,
    }
}

pub fn create_under(
    store: &MixedRouter,
    ctx: &StoreContext,
    parent: &UsageKey,
    block_type: &str,
    name: &str,
    display_name: &str,
) -> UsageKey {
    store
        .create_child(
            ctx,
            user(),
            parent,
            &category(block_type),
            Some(name),
            &fields(&[("display_name", Json::String(display_name.to_string()))]),
        )
        .unwrap()
        .location()
        .clone()
}

pub fn rename(store: &MixedRouter, ctx: &StoreContext, key: &UsageKey, display_name: &str) {
    let mut block = store.get_item(ctx, key, None, None).unwrap();
    block
        .set("display_name", &Json::String(display_name.to_string()))
        .unwrap();
    store.update_item(ctx, &block, user(), false).unwrap();
}

pub fn display_name(store: &MixedRouter, ctx: &StoreContext, key: &UsageKey) -> String {
    store
        .get_item(ctx, key, None, None)
        .unwrap()
        .display_name()
        .unwrap_or_default()
}

pub fn get_block(store: &MixedRouter, ctx: &StoreContext, key: &UsageKey) -> XBlock {
    store.get_item(ctx, key, None, None).unwrap()
}

/// Run a scenario once against each writable backend.
///
/// Each invocation gets a fresh router whose default store is scoped to
/// the backend under test, so `create_course` lands there while probing
/// and dispatch still cross the full mixed surface.
pub fn for_each_writable_store(scenario: impl Fn(&MixedRouter, StoreType)) {
    init_logging();
    for store_type in [StoreType::PerBlock, StoreType::Versioned] {
        let store = MixedRouter::in_memory();
        let _scope = store.default_store(store_type).unwrap();
        scenario(&store, store_type);
    }
}
