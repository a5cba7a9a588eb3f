//! Branch lifecycle
//!
//! Publishing grafts block copies from the draft structure into a new
//! published structure. Each copy records the draft version it came from
//! in `source_version`; a block is "current" while the published copy's
//! source still equals the draft copy's `update_version`, which is what
//! publish-state and has-changes queries compare.
//!
//! Direct-only categories graft one node at a time with child references
//! filtered to blocks the published branch will actually hold; other
//! categories carry their whole draft subtree. After every graft a sweep
//! drops published blocks nothing reachable references anymore, keeping
//! detached categories aside.

use crate::document::{block_id, StructureDoc};
use crate::store::VersionedStore;
use crate::writes::StructureEdit;
use chrono::Utc;
use modulestore_core::{
    EditInfo, Error, ModuleStore, PublishState, Result, RevisionOption, StoreContext, UserId,
    XBlock,
};
use modulestore_keys::{BlockType, Branch, UsageKey};
use rustc_hash::FxHashSet;
use serde_json::Value as Json;
use tracing::{debug, info};

impl VersionedStore {
    // ------------------------------------------------------------------
    // publish / unpublish
    // ------------------------------------------------------------------

    pub(crate) fn do_publish(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<()> {
        ctx.check_cancelled()?;
        let logical = key.as_published();
        let identity = logical.course_key().for_branch(None);
        let id = block_id(&logical);
        let index = self.require_index(&identity)?;
        let draft_head = index
            .branch_version(Branch::Draft)
            .ok_or_else(|| Error::not_found(&logical))?;
        let draft = self.require_structure(ctx, &identity, Branch::Draft, draft_head)?;
        if !draft.contains(&id) {
            return Err(Error::not_found(&logical));
        }

        let now = Utc::now();
        let previous = index.branch_version(Branch::Published);
        let base = match previous {
            Some(guid) => self.require_structure(ctx, &identity, Branch::Published, guid)?,
            None => StructureDoc::new(draft.root.clone(), user, now),
        };
        let mut edit = StructureEdit::new(base);

        // direct-only categories graft just the node; everything else
        // carries its whole draft subtree
        let subtree: Vec<String> = if logical.is_direct_only() {
            vec![id.clone()]
        } else {
            draft.subtree_ids(&id)
        };
        let subtree_set: FxHashSet<String> = subtree.iter().cloned().collect();

        for src_id in &subtree {
            let Some(src) = draft.get(src_id) else {
                continue;
            };
            let prior_update = edit.block(src_id).and_then(|b| b.edit_info.update_version);
            let mut copy = src.clone();
            copy.inherited_settings = serde_json::Map::new();
            copy.children.retain(|r| match UsageKey::parse_deprecated(r) {
                Ok(child) => {
                    let child_id = block_id(&child);
                    subtree_set.contains(&child_id) || edit.contains(&child_id)
                }
                Err(_) => false,
            });
            copy.edit_info = EditInfo {
                edited_by: Some(user),
                edited_on: Some(now),
                published_by: Some(user),
                published_date: Some(now),
                previous_version: prior_update,
                update_version: Some(edit.version()),
                source_version: src.edit_info.update_version,
                subtree_edited_by: None,
                subtree_edited_on: None,
            };
            edit.carry(src_id, copy);
        }

        // link the graft into the published tree through the block's
        // draft parent; detached categories stand outside the tree
        if id != draft.root && !logical.block_type().is_detached() {
            let Some(parent_id) = draft.parent_id(&id) else {
                return Err(Error::InvalidVersion(format!(
                    "cannot publish '{logical}': detached from the course tree"
                )));
            };
            if !edit.contains(&parent_id) {
                return Err(Error::InvalidVersion(format!(
                    "cannot publish '{logical}': parent '{parent_id}' is not on the published branch"
                )));
            }
            let desired: Vec<String> = draft
                .get(&parent_id)
                .map(|p| p.children.clone())
                .unwrap_or_default()
                .into_iter()
                .filter(|r| match UsageKey::parse_deprecated(r) {
                    Ok(child) => edit.contains(&block_id(&child)),
                    Err(_) => false,
                })
                .collect();
            let current = edit
                .block(&parent_id)
                .map(|p| p.children.clone())
                .unwrap_or_default();
            if current != desired {
                edit.touch(&parent_id)?.children = desired;
            }
        }

        // sweep published blocks the graft made unreachable
        let reachable = edit.structure().reachable_ids();
        let swept: Vec<String> = edit
            .structure()
            .blocks
            .iter()
            .filter(|(bid, block)| {
                if reachable.contains(bid.as_str()) {
                    return false;
                }
                match BlockType::new(&block.block_type) {
                    Ok(category) => !category.is_detached(),
                    Err(_) => false,
                }
            })
            .map(|(bid, _)| bid.clone())
            .collect();
        for bid in &swept {
            edit.remove(bid);
        }

        if *logical.block_type() == BlockType::static_tab() {
            let root_id = edit.structure().root.clone();
            if edit.contains(&root_id) {
                let display_name = draft
                    .get(&id)
                    .and_then(|b| b.fields.get("display_name"))
                    .and_then(Json::as_str)
                    .map(str::to_string);
                Self::tab_upserted(&mut edit, &logical, display_name)?;
            }
        }

        let committed = self.commit(ctx, user, &identity, Branch::Published, previous, edit)?;
        info!(target: "modulestore::versioned", block = %logical, user = %user, version = %committed.version, swept = swept.len(), "Published subtree");
        Ok(())
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
        let identity = logical.course_key().for_branch(None);
        let id = block_id(&logical);
        let index = self.require_index(&identity)?;
        let Some(head) = index.branch_version(Branch::Published) else {
            return Err(Error::not_found(&logical));
        };
        let published = self.require_structure(ctx, &identity, Branch::Published, head)?;
        if !published.contains(&id) {
            return Err(Error::not_found(&logical));
        }

        let mut edit = StructureEdit::new(published);
        Self::remove_subtree(&mut edit, &id)?;
        let committed = self.commit(ctx, user, &identity, Branch::Published, Some(head), edit)?;
        info!(target: "modulestore::versioned", block = %logical, user = %user, version = %committed.version, "Unpublished block");
        Ok(())
    }

    // ------------------------------------------------------------------
    // draft restoration
    // ------------------------------------------------------------------

    /// Draft edits land on the draft branch as they happen, so there is
    /// nothing to convert; the call reduces to a draft read.
    pub(crate) fn do_convert_to_draft(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        _user: UserId,
    ) -> Result<XBlock> {
        debug!(target: "modulestore::versioned", block = %key, "convert_to_draft is a read on versioned courses");
        self.get_item(ctx, key, None, Some(RevisionOption::DraftOnly))
    }

    pub(crate) fn do_revert_to_published(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        user: UserId,
    ) -> Result<()> {
        ctx.check_cancelled()?;
        let logical = key.as_published();
        let identity = logical.course_key().for_branch(None);
        let id = block_id(&logical);
        let index = self.require_index(&identity)?;
        let published = match index.branch_version(Branch::Published) {
            Some(guid) => self.require_structure(ctx, &identity, Branch::Published, guid)?,
            None => {
                return Err(Error::InvalidVersion(format!(
                    "no published version to revert to: {logical}"
                )))
            }
        };
        if !published.contains(&id) {
            return Err(Error::InvalidVersion(format!(
                "no published version to revert to: {logical}"
            )));
        }

        let restored = published.subtree_ids(&id);
        let restored_set: FxHashSet<String> = restored.iter().cloned().collect();
        let (_, committed) = self.mutate_draft(ctx, user, &identity, |edit| {
            let doomed = edit.structure().subtree_ids(&id);
            for gone_id in &doomed {
                edit.remove(gone_id);
            }
            for rid in &restored {
                let Some(src) = published.get(rid) else {
                    continue;
                };
                let mut copy = src.clone();
                // pointing the copy's update version back at the draft
                // version the publish was grafted from restores lineage
                if let Some(source) = copy.edit_info.source_version {
                    copy.edit_info.update_version = Some(source);
                }
                copy.edit_info.source_version = None;
                edit.carry(rid, copy);
            }
            let gone: FxHashSet<String> = doomed
                .into_iter()
                .filter(|gone_id| !restored_set.contains(gone_id))
                .collect();
            Self::detach_refs(edit, &gone)
        })?;
        info!(target: "modulestore::versioned", block = %logical, user = %user, version = %committed.version, "Reverted draft to published");
        Ok(())
    }

    // ------------------------------------------------------------------
    // publish inspection
    // ------------------------------------------------------------------

    pub(crate) fn publish_state_of(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
    ) -> Result<PublishState> {
        ctx.check_cancelled()?;
        let logical = key.as_published();
        let identity = logical.course_key().for_branch(None);
        let id = block_id(&logical);
        let index = self.require_index(&identity)?;
        let draft = match index.branch_version(Branch::Draft) {
            Some(guid) => Some(self.require_structure(ctx, &identity, Branch::Draft, guid)?),
            None => None,
        };
        let published = match index.branch_version(Branch::Published) {
            Some(guid) => Some(self.require_structure(ctx, &identity, Branch::Published, guid)?),
            None => None,
        };

        let draft_copy = draft.as_ref().and_then(|s| s.get(&id));
        let published_copy = published.as_ref().and_then(|s| s.get(&id));
        match (draft_copy, published_copy) {
            (None, None) => Err(Error::not_found(&logical)),
            (Some(_), None) => Ok(PublishState::Private),
            (None, Some(_)) => Ok(PublishState::Public),
            (Some(d), Some(p)) => Ok(if Self::lineage_current(d, p) {
                PublishState::Public
            } else {
                PublishState::Draft
            }),
        }
    }

    pub(crate) fn do_has_changes(&self, ctx: &StoreContext, key: &UsageKey) -> Result<bool> {
        ctx.check_cancelled()?;
        let logical = key.as_published();
        let identity = logical.course_key().for_branch(None);
        let id = block_id(&logical);
        let index = self.require_index(&identity)?;
        let published = match index.branch_version(Branch::Published) {
            Some(guid) => Some(self.require_structure(ctx, &identity, Branch::Published, guid)?),
            None => None,
        };
        let draft = match index.branch_version(Branch::Draft) {
            Some(guid) => Some(self.require_structure(ctx, &identity, Branch::Draft, guid)?),
            None => None,
        };

        let draft = match draft {
            Some(draft) if draft.contains(&id) => draft,
            // no draft copy: nothing pending unless the block is gone
            // from both branches
            _ => {
                return match published.as_ref().and_then(|s| s.get(&id)) {
                    Some(_) => Ok(false),
                    None => Err(Error::not_found(&logical)),
                }
            }
        };
        let Some(published) = published else {
            return Ok(true);
        };
        for sid in draft.subtree_ids(&id) {
            let Some(d) = draft.get(&sid) else {
                continue;
            };
            match published.get(&sid) {
                Some(p) if Self::lineage_current(d, p) => {}
                _ => return Ok(true),
            }
        }
        Ok(false)
    }
}
