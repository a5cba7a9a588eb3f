//! Stored document shapes
//!
//! Three collections back this store:
//! - `structures`: one immutable document per course version, holding
//!   every block of that version under its `category/name` id
//! - `definitions`: immutable content payloads, shared by reference
//!   across versions until a content edit mints a new one
//! - `course_indexes`: one document per course naming the head structure
//!   of each branch
//!
//! Structure and definition documents are never rewritten after insert;
//! all mutation happens by deriving a new structure and advancing a
//! branch pointer in the course index.

use chrono::{DateTime, Utc};
use modulestore_core::{EditInfo, Error, KvsSnapshot, Result, UserId};
use modulestore_keys::{Branch, BlockType, CourseKey, DefinitionKey, UsageKey, VersionGuid};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::BTreeMap;

/// Collection holding one immutable document per course version.
pub const STRUCTURES: &str = "structures";
/// Collection holding immutable content payloads.
pub const DEFINITIONS: &str = "definitions";
/// Collection holding one pointer document per course.
pub const COURSE_INDEXES: &str = "course_indexes";

/// The `category/name` id a block carries inside a structure document.
pub(crate) fn block_id(key: &UsageKey) -> String {
    format!("{}/{}", key.block_type(), key.name())
}

/// Rebuild the usage key behind a structure-internal block id.
pub(crate) fn block_usage(course: &CourseKey, id: &str) -> Result<UsageKey> {
    let (category, name) = id.split_once('/').ok_or_else(|| {
        Error::Serialization(format!("malformed block id '{id}': expected category/name"))
    })?;
    Ok(course
        .for_branch(None)
        .make_usage_key(BlockType::new(category)?, name)?)
}

// ------------------------------------------------------------------
// Structure documents
// ------------------------------------------------------------------

/// One block inside a structure document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBlock {
    /// Block category.
    pub block_type: String,
    /// Definition this block draws content from, as `category@guid`.
    pub definition: String,
    /// Explicitly-set settings fields.
    #[serde(default)]
    pub fields: JsonMap<String, Json>,
    /// Ordered children, as branch-agnostic deprecated usage strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    /// Settings materialized from ancestors when this version was written.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub inherited_settings: JsonMap<String, Json>,
    /// Authorship and lineage stamps.
    #[serde(default)]
    pub edit_info: EditInfo,
}

impl StructureBlock {
    /// A block with empty fields pointing at `definition`.
    pub fn new(block_type: &BlockType, definition: &DefinitionKey) -> Self {
        Self {
            block_type: block_type.to_string(),
            definition: definition.to_string(),
            fields: JsonMap::new(),
            children: Vec::new(),
            inherited_settings: JsonMap::new(),
            edit_info: EditInfo::default(),
        }
    }

    /// The definition reference as a typed key.
    pub fn definition_key(&self) -> Result<DefinitionKey> {
        Ok(DefinitionKey::parse(&self.definition)?)
    }

    /// Children as structure-internal block ids. References that fail to
    /// parse are skipped; `child_keys` is the strict form.
    pub fn child_ids(&self) -> Vec<String> {
        self.children
            .iter()
            .filter_map(|r| UsageKey::parse_deprecated(r).ok())
            .map(|key| block_id(&key))
            .collect()
    }

    /// Children as usage keys inside `course`.
    pub fn child_keys(&self, course: &CourseKey) -> Result<Vec<UsageKey>> {
        self.children
            .iter()
            .map(|r| Ok(UsageKey::parse_deprecated(r)?.map_into_course(course.for_branch(None))))
            .collect()
    }

    /// Assemble the key-value snapshot backing a block instance.
    pub fn snapshot(&self, content: JsonMap<String, Json>) -> KvsSnapshot {
        KvsSnapshot {
            settings: self.fields.clone(),
            content,
            children: self.children.clone(),
            parent: None,
        }
    }
}

/// One immutable course version: the root pointer plus every block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureDoc {
    /// Structure this version was derived from; `None` for the first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<VersionGuid>,
    /// Whose write produced this version.
    pub edited_by: UserId,
    /// When this version was produced.
    pub edited_on: DateTime<Utc>,
    /// Block id of the course root.
    pub root: String,
    /// Every block of this version, keyed `category/name`.
    #[serde(default)]
    pub blocks: BTreeMap<String, StructureBlock>,
}

impl StructureDoc {
    /// Collection id of the structure stored under `guid`.
    pub fn doc_id(guid: VersionGuid) -> String {
        guid.to_string()
    }

    /// An empty structure rooted at `root`.
    pub fn new(root: String, user: UserId, now: DateTime<Utc>) -> Self {
        Self {
            previous_version: None,
            edited_by: user,
            edited_on: now,
            root,
            blocks: BTreeMap::new(),
        }
    }

    /// Decode a stored structure.
    pub fn from_json(value: Json) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode for storage.
    pub fn to_json(&self) -> Result<Json> {
        Ok(serde_json::to_value(self)?)
    }

    /// The block stored under `id`.
    pub fn get(&self, id: &str) -> Option<&StructureBlock> {
        self.blocks.get(id)
    }

    /// Whether a block exists under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    /// Ids of the subtree rooted at `id`, root first. References to
    /// absent blocks are skipped; an absent root yields an empty list.
    pub fn subtree_ids(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(block) = self.blocks.get(&current) else {
                continue;
            };
            stack.extend(block.child_ids());
            out.push(current);
        }
        out
    }

    /// Every id reachable from the root via child lists.
    pub fn reachable_ids(&self) -> FxHashSet<String> {
        let mut reachable: FxHashSet<String> = FxHashSet::default();
        let mut stack = vec![self.root.clone()];
        while let Some(current) = stack.pop() {
            if !reachable.insert(current.clone()) {
                continue;
            }
            if let Some(block) = self.blocks.get(&current) {
                stack.extend(block.child_ids());
            }
        }
        reachable
    }

    /// The first block, in id order, whose child list names `id`.
    pub fn parent_id(&self, id: &str) -> Option<String> {
        self.blocks
            .iter()
            .find(|(_, block)| block.child_ids().iter().any(|child| child == id))
            .map(|(pid, _)| pid.clone())
    }

    /// Latest edit stamp across the subtree rooted at `id`.
    pub fn subtree_edited(&self, id: &str) -> (Option<UserId>, Option<DateTime<Utc>>) {
        let mut latest: Option<(DateTime<Utc>, Option<UserId>)> = None;
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(block) = self.blocks.get(&current) else {
                continue;
            };
            if let Some(on) = block.edit_info.edited_on {
                if latest.map_or(true, |(best, _)| on > best) {
                    latest = Some((on, block.edit_info.edited_by));
                }
            }
            stack.extend(block.child_ids());
        }
        match latest {
            Some((on, by)) => (by, Some(on)),
            None => (None, None),
        }
    }
}

// ------------------------------------------------------------------
// Definition documents
// ------------------------------------------------------------------

/// One immutable content payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDoc {
    /// Category the payload belongs to.
    pub block_type: String,
    /// Explicitly-set content fields.
    #[serde(default)]
    pub fields: JsonMap<String, Json>,
}

impl DefinitionDoc {
    /// A payload for `block_type` carrying `fields`.
    pub fn new(block_type: &BlockType, fields: JsonMap<String, Json>) -> Self {
        Self {
            block_type: block_type.to_string(),
            fields,
        }
    }

    /// Decode a stored payload.
    pub fn from_json(value: Json) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode for storage.
    pub fn to_json(&self) -> Result<Json> {
        Ok(serde_json::to_value(self)?)
    }
}

// ------------------------------------------------------------------
// Course index documents
// ------------------------------------------------------------------

/// One course: identity plus the head structure of each branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseIndexDoc {
    /// Organization component of the course key.
    pub org: String,
    /// Course component of the course key.
    pub course: String,
    /// Run component of the course key.
    pub run: String,
    /// Head structure guid per branch name.
    #[serde(default)]
    pub branches: BTreeMap<String, VersionGuid>,
    /// Whose write last advanced a pointer.
    pub edited_by: UserId,
    /// When a pointer last advanced.
    pub edited_on: DateTime<Utc>,
}

impl CourseIndexDoc {
    /// Collection id of the index for `course`: the branch-agnostic
    /// course string.
    pub fn doc_id(course: &CourseKey) -> String {
        course.for_branch(None).to_string()
    }

    /// An index for `course` with no branches yet.
    pub fn new(course: &CourseKey, user: UserId, now: DateTime<Utc>) -> Self {
        Self {
            org: course.org().to_string(),
            course: course.course().to_string(),
            run: course.run().to_string(),
            branches: BTreeMap::new(),
            edited_by: user,
            edited_on: now,
        }
    }

    /// Decode a stored index.
    pub fn from_json(value: Json) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode for storage.
    pub fn to_json(&self) -> Result<Json> {
        Ok(serde_json::to_value(self)?)
    }

    /// The course key this index describes, in stored casing.
    pub fn course_key(&self) -> Result<CourseKey> {
        Ok(CourseKey::new(&self.org, &self.course, &self.run)?)
    }

    /// Head structure of `branch`, if the branch exists.
    pub fn branch_version(&self, branch: Branch) -> Option<VersionGuid> {
        self.branches.get(branch.as_str()).copied()
    }

    /// Point `branch` at `guid`, creating the branch if needed.
    pub fn set_branch(&mut self, branch: Branch, guid: VersionGuid) {
        self.branches.insert(branch.as_str().to_string(), guid);
    }

    /// Drop `branch` entirely.
    pub fn remove_branch(&mut self, branch: Branch) {
        self.branches.remove(branch.as_str());
    }
}
