//! Field bundles and the per-category field registry
//!
//! Block categories do not declare fields ad hoc. Fields come in named,
//! ordered bundles (display fields, inheritable policy, platform flags,
//! structure, content) and a [`FieldSetRegistry`] assembles the bundle
//! stack for each category. When two bundles declare the same name, the
//! earlier bundle in the stack wins.

use crate::fields::{FieldDescriptor, FieldType, Scope};
use modulestore_keys::BlockType;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::json;
use std::sync::Arc;

/// A named, ordered group of field declarations.
#[derive(Debug, Clone)]
pub struct FieldBundle {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl FieldBundle {
    /// Create an empty bundle.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field declaration.
    pub fn with(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Bundle name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields, in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }
}

/// The merged, ordered field declarations for one category.
#[derive(Debug, Clone)]
pub struct FieldSet {
    fields: Vec<FieldDescriptor>,
    by_name: FxHashMap<String, usize>,
}

impl FieldSet {
    /// Merge bundles in precedence order. The first bundle declaring a
    /// name owns it; later declarations of the same name are dropped.
    pub fn from_bundles<'a>(bundles: impl IntoIterator<Item = &'a FieldBundle>) -> Self {
        let mut fields = Vec::new();
        let mut by_name = FxHashMap::default();
        for bundle in bundles {
            for field in bundle.fields() {
                if by_name.contains_key(field.name()) {
                    continue;
                }
                by_name.insert(field.name().to_string(), fields.len());
                fields.push(field.clone());
            }
        }
        Self { fields, by_name }
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&idx| &self.fields[idx])
    }

    /// True when the set declares `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All declarations, in precedence order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Names of all fields in a given scope, in precedence order.
    pub fn names_in_scope(&self, scope: Scope) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(move |f| f.scope() == scope)
            .map(|f| f.name())
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Display fields shared by every block.
pub fn common_bundle() -> FieldBundle {
    FieldBundle::new("common").with(FieldDescriptor::settings(
        "display_name",
        FieldType::Text,
        json!(null),
    ))
}

/// The definition payload.
pub fn content_bundle() -> FieldBundle {
    FieldBundle::new("content").with(FieldDescriptor::content("data", FieldType::Json, json!("")))
}

/// The ordered child list.
pub fn structure_bundle() -> FieldBundle {
    FieldBundle::new("structure").with(FieldDescriptor::new(
        "children",
        Scope::Children,
        FieldType::ReferenceList,
        json!([]),
    ))
}

/// Platform runtime flags attached to every block.
pub fn platform_bundle() -> FieldBundle {
    FieldBundle::new("platform")
        .with(FieldDescriptor::settings(
            "hide_from_toc",
            FieldType::Boolean,
            json!(false),
        ))
        .with(FieldDescriptor::settings(
            "format",
            FieldType::Text,
            json!(null),
        ))
        // deprecated, kept for imported content
        .with(FieldDescriptor::settings(
            "source_file",
            FieldType::Text,
            json!(null),
        ))
        // deprecated, kept for imported content
        .with(FieldDescriptor::settings(
            "ispublic",
            FieldType::Boolean,
            json!(null),
        ))
}

/// Policy settings that inherit downward from ancestors.
pub fn inheritance_bundle() -> FieldBundle {
    FieldBundle::new("inheritance")
        .with(FieldDescriptor::settings(
            "graded",
            FieldType::Boolean,
            json!(false),
        ))
        .with(FieldDescriptor::settings(
            "start",
            FieldType::DateTime,
            json!("2030-01-01T00:00:00Z"),
        ))
        .with(FieldDescriptor::settings(
            "due",
            FieldType::DateTime,
            json!(null),
        ))
        .with(FieldDescriptor::settings(
            "extended_due",
            FieldType::DateTime,
            json!(null),
        ))
        .with(FieldDescriptor::settings(
            "graceperiod",
            FieldType::Timedelta,
            json!(null),
        ))
        .with(FieldDescriptor::settings(
            "showanswer",
            FieldType::Text,
            json!("finished"),
        ))
        .with(FieldDescriptor::settings(
            "rerandomize",
            FieldType::Text,
            json!("never"),
        ))
        .with(FieldDescriptor::settings(
            "days_early_for_beta",
            FieldType::Float,
            json!(null),
        ))
        .with(FieldDescriptor::settings(
            "static_asset_path",
            FieldType::Text,
            json!(""),
        ))
        .with(FieldDescriptor::settings(
            "text_customization",
            FieldType::Dict,
            json!({}),
        ))
        .with(FieldDescriptor::settings(
            "use_latex_compiler",
            FieldType::Boolean,
            json!(false),
        ))
        .with(FieldDescriptor::settings(
            "max_attempts",
            FieldType::Integer,
            json!(null),
        ))
        .with(FieldDescriptor::settings(
            "matlab_api_key",
            FieldType::Text,
            json!(null),
        ))
        .with(FieldDescriptor::settings(
            "annotation_storage_url",
            FieldType::Text,
            json!("http://your_annotation_storage.com"),
        ))
        .with(FieldDescriptor::settings(
            "annotation_token_secret",
            FieldType::Text,
            json!("xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"),
        ))
        .with(FieldDescriptor::settings(
            "user_partitions",
            FieldType::List,
            json!([]),
        ))
        // deprecated, kept for imported content
        .with(FieldDescriptor::settings(
            "course_edit_method",
            FieldType::Text,
            json!("Studio"),
        ))
        // deprecated, kept for imported content
        .with(FieldDescriptor::settings(
            "giturl",
            FieldType::Text,
            json!(null),
        ))
        // deprecated, kept for imported content
        .with(FieldDescriptor::settings(
            "xqa_key",
            FieldType::Text,
            json!(null),
        ))
}

/// Fields declared only on course roots.
pub fn course_bundle() -> FieldBundle {
    FieldBundle::new("course")
        .with(FieldDescriptor::settings("tabs", FieldType::List, json!([])))
        .with(FieldDescriptor::settings(
            "wiki_slug",
            FieldType::Text,
            json!(null),
        ))
}

/// Category to field-set mapping, plus the inheritable-name set.
#[derive(Debug, Clone)]
pub struct FieldSetRegistry {
    by_category: FxHashMap<String, Arc<FieldSet>>,
    default_set: Arc<FieldSet>,
    inheritable: FxHashSet<String>,
}

impl FieldSetRegistry {
    /// The standard registry: every category gets the common, content,
    /// structure, platform, and inheritance bundles; course roots
    /// additionally get the course bundle with top precedence.
    pub fn standard() -> Self {
        let common = common_bundle();
        let content = content_bundle();
        let structure = structure_bundle();
        let platform = platform_bundle();
        let inheritance = inheritance_bundle();
        let course = course_bundle();

        let default_stack = [&common, &content, &structure, &platform, &inheritance];
        let default_set = Arc::new(FieldSet::from_bundles(default_stack));
        let course_set = Arc::new(FieldSet::from_bundles([
            &course,
            &common,
            &content,
            &structure,
            &platform,
            &inheritance,
        ]));

        let inheritable = inheritance
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();

        let mut by_category = FxHashMap::default();
        by_category.insert("course".to_string(), course_set);

        Self {
            by_category,
            default_set,
            inheritable,
        }
    }

    /// The field set for a category. Unknown categories get the default
    /// stack.
    pub fn for_category(&self, category: &BlockType) -> Arc<FieldSet> {
        self.by_category
            .get(category.as_str())
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_set))
    }

    /// Register a custom field set for a category.
    pub fn register(&mut self, category: impl Into<String>, set: FieldSet) {
        self.by_category.insert(category.into(), Arc::new(set));
    }

    /// Names of settings that inherit downward.
    pub fn inheritable_names(&self) -> &FxHashSet<String> {
        &self.inheritable
    }

    /// True when `name` is an inheritable setting.
    pub fn is_inheritable(&self, name: &str) -> bool {
        self.inheritable.contains(name)
    }
}

impl Default for FieldSetRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
