//! The block: field set + key-value storage + identity
//!
//! An [`XBlock`] is the unit every store hands out and accepts back. It
//! owns no persistence logic: reads resolve through the attached
//! [`KeyValueStore`] (explicit value, then inherited value, then the
//! declared default) and writes validate through the field's codec before
//! landing in the store.

use crate::error::{Error, Result};
use crate::fields::{FieldDescriptor, FieldValue, Scope};
use crate::mixin::FieldSet;
use crate::kvs::{KeyValueStore, KvsKey, KvsSnapshot};
use crate::types::EditInfo;
use modulestore_keys::{BlockType, CourseKey, DefinitionKey, UsageKey};
use serde_json::{Map as JsonMap, Value as Json};
use std::sync::Arc;

/// The identity pair a block runs under: its usage key and, in the
/// versioned backend, the definition document it draws content from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeIds {
    usage_id: UsageKey,
    definition_id: Option<DefinitionKey>,
}

impl ScopeIds {
    /// Identity for a block with no separate definition document.
    pub fn new(usage_id: UsageKey) -> Self {
        Self {
            usage_id,
            definition_id: None,
        }
    }

    /// Identity including the definition document.
    pub fn with_definition(usage_id: UsageKey, definition_id: DefinitionKey) -> Self {
        Self {
            usage_id,
            definition_id: Some(definition_id),
        }
    }

    /// The block's usage key.
    pub fn usage_id(&self) -> &UsageKey {
        &self.usage_id
    }

    /// The definition document this block draws content from, if any.
    pub fn definition_id(&self) -> Option<&DefinitionKey> {
        self.definition_id.as_ref()
    }

    /// The block category.
    pub fn block_type(&self) -> &BlockType {
        self.usage_id.block_type()
    }
}

/// One block: identity, declared fields, and field storage.
#[derive(Debug)]
pub struct XBlock {
    scope_ids: ScopeIds,
    field_set: Arc<FieldSet>,
    kvs: Box<dyn KeyValueStore>,
    edit_info: EditInfo,
    is_draft: bool,
}

impl XBlock {
    /// Assemble a block from its parts.
    pub fn new(scope_ids: ScopeIds, field_set: Arc<FieldSet>, kvs: Box<dyn KeyValueStore>) -> Self {
        Self {
            scope_ids,
            field_set,
            kvs,
            edit_info: EditInfo::default(),
            is_draft: false,
        }
    }

    /// Attach edit info restored from the stored document.
    pub fn with_edit_info(mut self, edit_info: EditInfo) -> Self {
        self.edit_info = edit_info;
        self
    }

    /// Mark whether this instance was hydrated from a draft document.
    pub fn with_draft(mut self, is_draft: bool) -> Self {
        self.is_draft = is_draft;
        self
    }

    /// The block's identity pair.
    pub fn scope_ids(&self) -> &ScopeIds {
        &self.scope_ids
    }

    /// The block's usage key.
    pub fn location(&self) -> &UsageKey {
        self.scope_ids.usage_id()
    }

    /// Rewrite the block's usage key, keeping everything else.
    pub fn set_location(&mut self, location: UsageKey) {
        self.scope_ids.usage_id = location;
    }

    /// The block category.
    pub fn category(&self) -> &BlockType {
        self.scope_ids.block_type()
    }

    /// The owning course.
    pub fn course_key(&self) -> &CourseKey {
        self.location().course_key()
    }

    /// The declared fields for this category.
    pub fn field_set(&self) -> &Arc<FieldSet> {
        &self.field_set
    }

    /// Authorship and lineage metadata.
    pub fn edit_info(&self) -> &EditInfo {
        &self.edit_info
    }

    /// Mutable authorship and lineage metadata.
    pub fn edit_info_mut(&mut self) -> &mut EditInfo {
        &mut self.edit_info
    }

    /// Whether this instance was hydrated from a draft document.
    pub fn is_draft(&self) -> bool {
        self.is_draft
    }

    fn descriptor(&self, name: &str) -> Result<&FieldDescriptor> {
        self.field_set.get(name).ok_or_else(|| Error::UnknownField {
            field: name.to_string(),
            category: self.category().to_string(),
        })
    }

    fn kvs_key(descriptor: &FieldDescriptor) -> KvsKey {
        match descriptor.scope() {
            Scope::Children => KvsKey::children(),
            scope => KvsKey::new(scope, descriptor.name()),
        }
    }

    /// Read a field in canonical JSON form.
    ///
    /// Resolution order: explicitly-set value, inherited value from an
    /// ancestor, declared default.
    pub fn get_json(&self, name: &str) -> Result<Json> {
        let descriptor = self.descriptor(name)?;
        let key = Self::kvs_key(descriptor);
        if let Some(value) = self.kvs.get(&key) {
            return Ok(value);
        }
        if let Some(value) = self.kvs.default(&key) {
            return Ok(value);
        }
        Ok(descriptor.default().clone())
    }

    /// Read a field as a typed value.
    pub fn get(&self, name: &str) -> Result<FieldValue> {
        let descriptor = self.descriptor(name)?;
        let raw = self.get_json(name)?;
        descriptor.field_type().decode(&raw)
    }

    /// Write a field. The value is validated and normalized by the
    /// field's codec before it lands in storage.
    ///
    /// # Errors
    /// `Error::UnknownField` for an undeclared name,
    /// `Error::Serialization` when the codec rejects the value,
    /// `Error::ReadOnlyStore` on a frozen store.
    pub fn set(&mut self, name: &str, value: &Json) -> Result<()> {
        let descriptor = self.descriptor(name)?;
        let normalized = descriptor.field_type().normalize(value)?;
        let key = Self::kvs_key(descriptor);
        self.kvs.set(&key, normalized)
    }

    /// Remove the explicitly-set value of a field, restoring default or
    /// inherited resolution.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let descriptor = self.descriptor(name)?;
        let key = Self::kvs_key(descriptor);
        self.kvs.delete(&key)
    }

    /// True when the field has an explicitly-set value.
    pub fn is_set(&self, name: &str) -> bool {
        match self.descriptor(name) {
            Ok(descriptor) => self.kvs.has(&Self::kvs_key(descriptor)),
            Err(_) => false,
        }
    }

    /// Apply a batch of field writes, validating each one.
    pub fn update_fields(&mut self, fields: &JsonMap<String, Json>) -> Result<()> {
        for (name, value) in fields {
            self.set(name, value)?;
        }
        Ok(())
    }

    /// The ordered child keys, with the course identity restored from
    /// this block's own key.
    pub fn children(&self) -> Result<Vec<UsageKey>> {
        let raw = match self.kvs.get(&KvsKey::children()) {
            Some(value) => value,
            None => return Ok(Vec::new()),
        };
        let refs: Vec<String> = serde_json::from_value(raw)
            .map_err(|_| Error::Serialization("children must be a list of strings".to_string()))?;
        let course = self.course_key().clone();
        refs.iter()
            .map(|s| {
                let parsed = UsageKey::parse_deprecated(s)?;
                Ok(parsed.map_into_course(course.clone()))
            })
            .collect()
    }

    /// Replace the ordered child list.
    pub fn set_children(&mut self, children: &[UsageKey]) -> Result<()> {
        let refs: Vec<Json> = children
            .iter()
            .map(|key| Json::String(key.as_published().to_deprecated_string()))
            .collect();
        self.kvs.set(&KvsKey::children(), Json::Array(refs))
    }

    /// True when the block has at least one child.
    pub fn has_children(&self) -> bool {
        matches!(
            self.kvs.get(&KvsKey::children()),
            Some(Json::Array(items)) if !items.is_empty()
        )
    }

    /// The parent key hydrated by the backend, with the course identity
    /// restored.
    pub fn parent(&self) -> Option<UsageKey> {
        let raw = self.kvs.get(&KvsKey::parent())?;
        let s = raw.as_str()?;
        let parsed = UsageKey::parse_deprecated(s).ok()?;
        Some(parsed.map_into_course(self.course_key().clone()))
    }

    /// The explicit display name, if one is set.
    pub fn display_name(&self) -> Option<String> {
        match self.get_json("display_name") {
            Ok(Json::String(s)) => Some(s),
            _ => None,
        }
    }

    /// The display name, falling back to the block name.
    pub fn display_name_with_default(&self) -> String {
        self.display_name()
            .unwrap_or_else(|| self.location().name().to_string())
    }

    /// The explicitly-set values, for write-back.
    pub fn snapshot(&self) -> KvsSnapshot {
        self.kvs.snapshot()
    }

    /// The explicitly-set settings values (never inherited ones), the
    /// payload persisted to the settings slice of a document.
    pub fn explicit_settings(&self) -> JsonMap<String, Json> {
        self.kvs.snapshot().settings
    }
}
