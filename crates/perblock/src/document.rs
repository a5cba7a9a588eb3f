//! Stored document shape
//!
//! Every block revision is one document in the `modulestore` collection,
//! keyed by the deprecated usage string (the draft copy carries the
//! `@draft` suffix). The document splits into the definition payload
//! (content and children), the explicit settings map, and edit info.

use chrono::{DateTime, Utc};
use modulestore_core::{EditInfo, Error, KvsSnapshot, Result, UserId};
use modulestore_keys::{CourseKey, UsageKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};

/// Collection holding every block document of this backend.
pub const COLLECTION: &str = "modulestore";

/// The definition slice: content payload plus ordered child references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    /// Content payload (`data` field).
    #[serde(default)]
    pub data: Json,
    /// Ordered children, in deprecated string form without revision.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

/// One stored block revision.
///
/// `org` and `course` repeat the key's course identity so course-scoped
/// queries can filter on document fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDocument {
    /// Owning organization.
    #[serde(default)]
    pub org: String,
    /// Owning course (no run; per-block course identity is org+course).
    #[serde(default)]
    pub course: String,
    /// Block category.
    pub category: String,
    /// Content payload and children.
    #[serde(default)]
    pub definition: Definition,
    /// Explicitly-set settings fields.
    #[serde(default)]
    pub metadata: JsonMap<String, Json>,
    /// Authorship stamps.
    #[serde(default)]
    pub edit_info: EditInfo,
}

impl BlockDocument {
    /// An empty document for a block key.
    pub fn new(key: &UsageKey) -> Self {
        Self {
            org: key.course_key().org().to_string(),
            course: key.course_key().course().to_string(),
            category: key.block_type().to_string(),
            definition: Definition::default(),
            metadata: JsonMap::new(),
            edit_info: EditInfo::default(),
        }
    }

    /// The document id for a usage key. The revision rides in the id:
    /// `i4x://org/course/category/name` vs `...@draft`.
    pub fn doc_id(key: &UsageKey) -> String {
        key.to_deprecated_string()
    }

    /// Decode a stored document.
    pub fn from_json(value: Json) -> Result<Self> {
        serde_json::from_value(value).map_err(Error::from)
    }

    /// The storable JSON form.
    pub fn to_json(&self) -> Result<Json> {
        serde_json::to_value(self).map_err(Error::from)
    }

    /// Capture a block's explicit fields and edit info into a document.
    pub fn from_block(block: &modulestore_core::XBlock) -> Self {
        let snapshot = block.snapshot();
        let data = snapshot
            .content
            .get("data")
            .cloned()
            .unwrap_or(Json::Null);
        Self {
            org: block.course_key().org().to_string(),
            course: block.course_key().course().to_string(),
            category: block.category().to_string(),
            definition: Definition {
                data,
                children: snapshot.children,
            },
            metadata: snapshot.settings,
            edit_info: block.edit_info().clone(),
        }
    }

    /// The field snapshot a [`DocumentKvs`](modulestore_core::DocumentKvs)
    /// hydrates from.
    pub fn snapshot(&self) -> KvsSnapshot {
        let mut content = JsonMap::new();
        if !self.definition.data.is_null() {
            content.insert("data".to_string(), self.definition.data.clone());
        }
        KvsSnapshot {
            settings: self.metadata.clone(),
            content,
            children: self.definition.children.clone(),
            parent: None,
        }
    }

    /// Child keys with the course identity restored.
    pub fn child_keys(&self, course: &CourseKey) -> Result<Vec<UsageKey>> {
        self.definition
            .children
            .iter()
            .map(|s| {
                let parsed = UsageKey::parse_deprecated(s)?;
                Ok(parsed.map_into_course(course.clone()))
            })
            .collect()
    }

    /// Replace the child list.
    pub fn set_children(&mut self, children: &[UsageKey]) {
        self.definition.children = children
            .iter()
            .map(|key| key.as_published().to_deprecated_string())
            .collect();
    }

    /// True when the revisions carry the same authored content: category,
    /// definition, and settings compare; edit stamps do not.
    pub fn content_equal(&self, other: &Self) -> bool {
        self.category == other.category
            && self.definition == other.definition
            && self.metadata == other.metadata
    }

    /// Stamp an edit.
    pub fn stamp_edited(&mut self, user: UserId, now: DateTime<Utc>) {
        self.edit_info.touch(user, now);
    }

    /// Stamp a publish.
    pub fn stamp_published(&mut self, user: UserId, now: DateTime<Utc>) {
        self.edit_info.mark_published(user, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modulestore_keys::BlockType;
    use serde_json::json;

    fn course() -> CourseKey {
        CourseKey::new("edX", "toy", "2012_Fall").unwrap()
    }

    fn key(category: &str, name: &str) -> UsageKey {
        UsageKey::new(course(), BlockType::new(category).unwrap(), name).unwrap()
    }

    fn sample() -> BlockDocument {
        let mut doc = BlockDocument::new(&key("vertical", "v1"));
        doc.metadata
            .insert("display_name".to_string(), json!("Unit 1"));
        doc.definition.children = vec!["i4x://edX/toy/html/h1".to_string()];
        doc
    }

    // ========================================
    // Doc Id Tests
    // ========================================

    #[test]
    fn test_doc_id_carries_revision() {
        let k = key("problem", "p1");
        assert_eq!(BlockDocument::doc_id(&k), "i4x://edX/toy/problem/p1");
        assert_eq!(
            BlockDocument::doc_id(&k.as_draft()),
            "i4x://edX/toy/problem/p1@draft"
        );
    }

    // ========================================
    // Serialization Tests
    // ========================================

    #[test]
    fn test_json_roundtrip() {
        let doc = sample();
        let json = doc.to_json().unwrap();
        let back = BlockDocument::from_json(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_minimal_document_decodes() {
        let doc = BlockDocument::from_json(json!({"category": "html"})).unwrap();
        assert_eq!(doc.category, "html");
        assert!(doc.definition.children.is_empty());
        assert!(doc.metadata.is_empty());
    }

    #[test]
    fn test_new_carries_course_identity() {
        let doc = BlockDocument::new(&key("problem", "p1"));
        assert_eq!(doc.org, "edX");
        assert_eq!(doc.course, "toy");
        assert_eq!(doc.category, "problem");
    }

    // ========================================
    // Content Equality Tests
    // ========================================

    #[test]
    fn test_content_equal_ignores_edit_stamps() {
        let mut a = sample();
        let mut b = sample();
        a.stamp_edited(UserId(1), Utc::now());
        b.stamp_published(UserId(2), Utc::now());
        assert!(a.content_equal(&b));
    }

    #[test]
    fn test_content_equal_sees_field_changes() {
        let a = sample();
        let mut b = sample();
        b.metadata
            .insert("display_name".to_string(), json!("Renamed"));
        assert!(!a.content_equal(&b));

        let mut c = sample();
        c.definition.children.push("i4x://edX/toy/html/h2".to_string());
        assert!(!a.content_equal(&c));
    }

    // ========================================
    // Children Tests
    // ========================================

    #[test]
    fn test_child_keys_restore_course() {
        let doc = sample();
        let children = doc.child_keys(&course()).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0], key("html", "h1"));
    }

    #[test]
    fn test_set_children_strips_revision() {
        let mut doc = sample();
        doc.set_children(&[key("html", "h2").as_draft()]);
        assert_eq!(doc.definition.children, vec!["i4x://edX/toy/html/h2"]);
    }

    // ========================================
    // Snapshot Tests
    // ========================================

    #[test]
    fn test_snapshot_splits_scopes() {
        let mut doc = sample();
        doc.definition.data = json!("<p>body</p>");
        let snapshot = doc.snapshot();
        assert_eq!(snapshot.settings.get("display_name"), Some(&json!("Unit 1")));
        assert_eq!(snapshot.content.get("data"), Some(&json!("<p>body</p>")));
        assert_eq!(snapshot.children, vec!["i4x://edX/toy/html/h1"]);
    }

    #[test]
    fn test_snapshot_omits_null_data() {
        let snapshot = sample().snapshot();
        assert!(!snapshot.content.contains_key("data"));
    }
}
