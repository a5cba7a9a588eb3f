//! Draft/published lifecycle transitions
//!
//! Four operations move blocks between the two document revisions:
//! - `publish`: draft subtree becomes the published subtree, children
//!   first; drafts are dropped afterwards
//! - `unpublish`: published subtree becomes draft; the published root
//!   document is removed
//! - `convert_to_draft`: published subtree copied into draft documents
//! - `revert_to_published`: draft subtree dropped, published untouched
//!
//! Direct-only categories refuse all four (publish is a no-op, the rest
//! fail with InvalidVersion): they only ever exist published.

use crate::store::PerBlockStore;
use chrono::{DateTime, Utc};
use modulestore_core::{Error, ModuleStore, Result, RevisionOption, StoreContext, UserId, XBlock};
use modulestore_keys::UsageKey;
use rustc_hash::FxHashSet;
use serde_json::json;
use tracing::{debug, info};

impl PerBlockStore {
    pub(crate) fn do_publish(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<()> {
        ctx.check_cancelled()?;
        let logical = key.as_published();
        let draft_exists =
            !logical.is_direct_only() && self.get_doc(&logical.as_draft())?.is_some();
        if self.get_doc(&logical)?.is_none() && !draft_exists {
            return Err(Error::not_found(&logical));
        }

        let now = Utc::now();
        let mut visited = FxHashSet::default();
        self.publish_subtree(ctx, &logical, user, now, &mut visited)?;
        self.invalidate_course(ctx, logical.course_key());
        info!(target: "modulestore::perblock", block = %logical, user = %user, "Published subtree");
        Ok(())
    }

    /// Children first, then this node. Direct-only nodes and nodes
    /// without a draft are no-ops, which makes a retried publish
    /// idempotent.
    fn publish_subtree(
        &self,
        ctx: &StoreContext,
        logical: &UsageKey,
        user: UserId,
        now: DateTime<Utc>,
        visited: &mut FxHashSet<UsageKey>,
    ) -> Result<()> {
        if !visited.insert(logical.clone()) {
            return Ok(());
        }
        ctx.check_cancelled()?;
        if logical.is_direct_only() {
            return Ok(());
        }
        let Some(draft) = self.get_doc(&logical.as_draft())? else {
            return Ok(());
        };
        let course = logical.course_key();

        for child in draft.child_keys(course)? {
            self.publish_subtree(ctx, &child.as_published(), user, now, visited)?;
        }

        let published = self.get_doc(logical)?;
        if let Some(published) = &published {
            // children dropped by the draft lose their published copy
            // when this node was their only remaining parent
            let kept: FxHashSet<&String> = draft.definition.children.iter().collect();
            for dropped in published
                .definition
                .children
                .iter()
                .filter(|c| !kept.contains(c))
            {
                let child_key =
                    UsageKey::parse_deprecated(dropped)?.map_into_course(course.clone());
                if self.parent_count(&child_key)? <= 1 {
                    let mut pruned = FxHashSet::default();
                    self.delete_subtree(&child_key, false, true, &mut pruned)?;
                    debug!(target: "modulestore::perblock", block = %child_key.as_published(), "Pruned published copy dropped by draft");
                }
            }
        }

        let unchanged = published
            .as_ref()
            .map(|p| p.content_equal(&draft))
            .unwrap_or(false);
        if !unchanged {
            let mut doc = draft;
            doc.stamp_published(user, now);
            self.put_doc(logical, &doc)?;
        }
        self.remove_doc(&logical.as_draft())?;
        Ok(())
    }

    /// Documents of either revision whose child list names `child`.
    fn parent_count(&self, child: &UsageKey) -> Result<usize> {
        let course = child.course_key().for_branch(None);
        let child_ref = child.as_published().to_deprecated_string();
        let query = Self::course_query(&course).eq("definition.children", json!(child_ref));
        Ok(self.collection.find_ids(&query).len())
    }

    pub(crate) fn do_unpublish(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        user: UserId,
    ) -> Result<()> {
        ctx.check_cancelled()?;
        let logical = key.as_published();
        if logical.is_direct_only() {
            return Err(Error::InvalidVersion(format!(
                "cannot unpublish direct-only category '{}'",
                logical.block_type()
            )));
        }
        self.convert_subtree_to_draft(ctx, &logical, user, true)?;
        self.remove_doc(&logical)?;
        self.invalidate_course(ctx, logical.course_key());
        info!(target: "modulestore::perblock", block = %logical, user = %user, "Unpublished block");
        Ok(())
    }

    pub(crate) fn do_convert_to_draft(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        user: UserId,
    ) -> Result<XBlock> {
        ctx.check_cancelled()?;
        let logical = key.as_published();
        self.convert_subtree_to_draft(ctx, &logical, user, false)?;
        self.invalidate_course(ctx, logical.course_key());
        info!(target: "modulestore::perblock", block = %logical, user = %user, "Converted subtree to draft");
        self.get_item(ctx, &logical, Some(0), Some(RevisionOption::DraftOnly))
    }

    /// Copy published documents into draft documents across the subtree.
    /// Direct-only descendants are skipped. With `ignore_existing`,
    /// nodes that already have a draft keep it; otherwise an existing
    /// draft at any node fails with DuplicateItem.
    pub(crate) fn convert_subtree_to_draft(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        _user: UserId,
        ignore_existing: bool,
    ) -> Result<()> {
        let logical = key.as_published();
        if logical.is_direct_only() {
            return Err(Error::InvalidVersion(format!(
                "cannot convert direct-only category '{}' to draft",
                logical.block_type()
            )));
        }
        let course = logical.course_key().clone();
        let mut visited: FxHashSet<UsageKey> = FxHashSet::default();
        let mut stack = vec![logical.clone()];
        let mut copied = 0usize;
        while let Some(node) = stack.pop() {
            ctx.check_cancelled()?;
            let node = node.as_published();
            if !visited.insert(node.clone()) {
                continue;
            }
            if node.is_direct_only() {
                continue;
            }
            let Some(published) = self.get_doc(&node)? else {
                if node == logical {
                    return Err(Error::not_found(&logical));
                }
                continue;
            };
            stack.extend(published.child_keys(&course)?);

            let draft_key = node.as_draft();
            if self.get_doc(&draft_key)?.is_some() {
                if ignore_existing {
                    continue;
                }
                return Err(Error::duplicate(draft_key.to_deprecated_string()));
            }
            // stamps travel with the copy, so the draft remembers when
            // its source was published
            self.put_doc(&draft_key, &published)?;
            copied += 1;
        }
        debug!(target: "modulestore::perblock", root = %logical, copied, "Copied published documents to draft");
        Ok(())
    }

    pub(crate) fn do_revert_to_published(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        user: UserId,
    ) -> Result<()> {
        ctx.check_cancelled()?;
        let logical = key.as_published();
        if logical.is_direct_only() {
            return Err(Error::InvalidVersion(format!(
                "cannot revert direct-only category '{}'",
                logical.block_type()
            )));
        }
        if self.get_doc(&logical)?.is_none() {
            return Err(Error::InvalidVersion(format!(
                "no published version to revert to: {}",
                logical.to_deprecated_string()
            )));
        }
        let mut visited = FxHashSet::default();
        self.drop_draft_subtree(&logical, &mut visited)?;
        self.invalidate_course(ctx, logical.course_key());
        info!(target: "modulestore::perblock", block = %logical, user = %user, "Reverted to published");
        Ok(())
    }

    /// Remove draft documents below `key`. The walk follows both the
    /// draft and published child lists: drafts created since the last
    /// publish only appear in the former, while a drafted leaf under a
    /// published-only parent only appears in the latter.
    fn drop_draft_subtree(
        &self,
        key: &UsageKey,
        visited: &mut FxHashSet<UsageKey>,
    ) -> Result<()> {
        let logical = key.as_published();
        if !visited.insert(logical.clone()) {
            return Ok(());
        }
        if logical.is_direct_only() {
            return Ok(());
        }
        let draft = self.get_doc(&logical.as_draft())?;
        let published = self.get_doc(&logical)?;
        for doc in [draft.as_ref(), published.as_ref()].into_iter().flatten() {
            for child in doc.child_keys(logical.course_key())? {
                self.drop_draft_subtree(&child, visited)?;
            }
        }
        if draft.is_some() {
            self.remove_doc(&logical.as_draft())?;
        }
        Ok(())
    }
}
