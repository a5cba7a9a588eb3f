//! Orphan detection across both writable backends.

mod common;

use common::{build_spine, category, fields, for_each_writable_store, get_block, user};
use modulestore::{ModuleStore, UsageKey};

fn orphan_names(orphans: &[UsageKey]) -> Vec<&str> {
    orphans.iter().map(|key| key.name()).collect()
}

#[test]
fn test_fresh_course_has_no_orphans() {
    for_each_writable_store(|store, _| {
        let ctx = store.ctx();
        let spine = build_spine(store, &ctx, &fields(&[]));

        // the seeded about/overview block is detached, not an orphan
        assert!(store.get_orphans(&ctx, &spine.course).unwrap().is_empty());
    });
}

#[test]
fn test_unlinked_block_is_an_orphan_until_linked() {
    for_each_writable_store(|store, _| {
        let ctx = store.ctx();
        let spine = build_spine(store, &ctx, &fields(&[]));

        let orph = store
            .create_item(
                &ctx,
                user(),
                &spine.course,
                &category("chapter"),
                Some("orph"),
                &fields(&[]),
            )
            .unwrap();
        let orphans = store.get_orphans(&ctx, &spine.course).unwrap();
        assert_eq!(orphan_names(&orphans), vec!["orph"]);

        // linking under the root clears it
        let mut root = get_block(store, &ctx, &spine.root);
        let mut children = root.children().unwrap();
        children.push(orph.location().with_revision(None));
        root.set_children(&children).unwrap();
        store.update_item(&ctx, &root, user(), false).unwrap();

        assert!(store.get_orphans(&ctx, &spine.course).unwrap().is_empty());
    });
}

#[test]
fn test_detached_categories_are_never_orphans() {
    for_each_writable_store(|store, _| {
        let ctx = store.ctx();
        let spine = build_spine(store, &ctx, &fields(&[]));

        store
            .create_item(
                &ctx,
                user(),
                &spine.course,
                &category("static_tab"),
                Some("syllabus"),
                &fields(&[]),
            )
            .unwrap();
        store
            .create_item(
                &ctx,
                user(),
                &spine.course,
                &category("course_info"),
                Some("updates"),
                &fields(&[]),
            )
            .unwrap();

        assert!(store.get_orphans(&ctx, &spine.course).unwrap().is_empty());
    });
}

#[test]
fn test_detaching_a_subtree_orphans_its_root_only() {
    for_each_writable_store(|store, _| {
        let ctx = store.ctx();
        let spine = build_spine(store, &ctx, &fields(&[]));

        // drop the sequential from the chapter's child list without
        // deleting it
        let mut chapter = get_block(store, &ctx, &spine.chapter);
        chapter.set_children(&[]).unwrap();
        store.update_item(&ctx, &chapter, user(), false).unwrap();

        let orphans = store.get_orphans(&ctx, &spine.course).unwrap();
        // the vertical and problem stay reachable from the sequential
        assert_eq!(orphan_names(&orphans), vec!["s1"]);
    });
}
