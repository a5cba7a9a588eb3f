//! Key-value storage behind a block's fields
//!
//! An [`XBlock`](crate::block::XBlock) never touches documents directly.
//! It reads and writes through a [`KeyValueStore`] keyed by (scope, field
//! name). Backends hydrate a [`DocumentKvs`] from whatever document shape
//! they persist and take a [`KvsSnapshot`] back when writing.

use crate::error::{Error, Result};
use crate::fields::Scope;
use crate::types::StoreType;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use std::fmt;

/// Address of one stored field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KvsKey {
    /// Which slice of the block the field lives in.
    pub scope: Scope,
    /// Field name. Empty for the children and parent scopes.
    pub field: String,
}

impl KvsKey {
    /// Address a field in an arbitrary scope.
    pub fn new(scope: Scope, field: impl Into<String>) -> Self {
        Self {
            scope,
            field: field.into(),
        }
    }

    /// Address a settings field.
    pub fn settings(field: impl Into<String>) -> Self {
        Self::new(Scope::Settings, field)
    }

    /// Address a content field.
    pub fn content(field: impl Into<String>) -> Self {
        Self::new(Scope::Content, field)
    }

    /// Address the child list.
    pub fn children() -> Self {
        Self::new(Scope::Children, "children")
    }

    /// Address the derived parent pointer.
    pub fn parent() -> Self {
        Self::new(Scope::Parent, "parent")
    }
}

impl fmt::Display for KvsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scope, self.field)
    }
}

/// Explicitly-set field values of one block, by scope.
///
/// This is the write-back unit: backends turn a snapshot into their
/// document shape. Inherited values never appear here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvsSnapshot {
    /// Explicitly-set settings fields.
    #[serde(default)]
    pub settings: JsonMap<String, Json>,
    /// Explicitly-set content fields.
    #[serde(default)]
    pub content: JsonMap<String, Json>,
    /// The ordered child list, in deprecated string form.
    #[serde(default)]
    pub children: Vec<String>,
    /// Parent pointer as hydrated by the backend, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Field storage contract between an [`XBlock`](crate::block::XBlock) and
/// its backend.
pub trait KeyValueStore: fmt::Debug + Send {
    /// The explicitly-set value at `key`, if any.
    fn get(&self, key: &KvsKey) -> Option<Json>;

    /// Set the value at `key`.
    fn set(&mut self, key: &KvsKey, value: Json) -> Result<()>;

    /// Remove the explicitly-set value at `key`.
    fn delete(&mut self, key: &KvsKey) -> Result<()>;

    /// True when a value is explicitly set at `key`.
    fn has(&self, key: &KvsKey) -> bool;

    /// The inherited value at `key`, when an ancestor set one.
    ///
    /// Only settings-scope keys ever have inherited values.
    fn default(&self, key: &KvsKey) -> Option<Json>;

    /// The explicitly-set values, for write-back.
    fn snapshot(&self) -> KvsSnapshot;
}

/// In-memory [`KeyValueStore`] hydrated from a stored document.
#[derive(Debug, Clone, Default)]
pub struct DocumentKvs {
    settings: JsonMap<String, Json>,
    content: JsonMap<String, Json>,
    children: Option<Vec<String>>,
    parent: Option<String>,
    inherited: JsonMap<String, Json>,
    frozen: Option<StoreType>,
}

impl DocumentKvs {
    /// An empty store for a brand-new block.
    pub fn new() -> Self {
        <Self as Default>::default()
    }

    /// Hydrate from a snapshot.
    pub fn from_snapshot(snapshot: KvsSnapshot) -> Self {
        let children = if snapshot.children.is_empty() {
            None
        } else {
            Some(snapshot.children)
        };
        Self {
            settings: snapshot.settings,
            content: snapshot.content,
            children,
            parent: snapshot.parent,
            inherited: JsonMap::new(),
            frozen: None,
        }
    }

    /// Attach inherited settings values resolved from ancestors.
    pub fn with_inherited(mut self, inherited: JsonMap<String, Json>) -> Self {
        self.inherited = inherited;
        self
    }

    /// Mark the store read-only on behalf of `store`. Writes then fail
    /// with `Error::ReadOnlyStore`.
    pub fn frozen(mut self, store: StoreType) -> Self {
        self.frozen = Some(store);
        self
    }

    fn check_writable(&self) -> Result<()> {
        match self.frozen {
            Some(store) => Err(Error::ReadOnlyStore(store)),
            None => Ok(()),
        }
    }

    fn children_json(children: &[String]) -> Json {
        Json::Array(children.iter().cloned().map(Json::String).collect())
    }

    fn parse_children(value: Json) -> Result<Vec<String>> {
        serde_json::from_value(value)
            .map_err(|_| Error::Serialization("children must be a list of strings".to_string()))
    }
}

impl KeyValueStore for DocumentKvs {
    fn get(&self, key: &KvsKey) -> Option<Json> {
        match key.scope {
            Scope::Settings => self.settings.get(&key.field).cloned(),
            Scope::Content => self.content.get(&key.field).cloned(),
            Scope::Children => self.children.as_deref().map(Self::children_json),
            Scope::Parent => self.parent.clone().map(Json::String),
        }
    }

    fn set(&mut self, key: &KvsKey, value: Json) -> Result<()> {
        self.check_writable()?;
        match key.scope {
            Scope::Settings => {
                self.settings.insert(key.field.clone(), value);
                Ok(())
            }
            Scope::Content => {
                self.content.insert(key.field.clone(), value);
                Ok(())
            }
            Scope::Children => {
                self.children = Some(Self::parse_children(value)?);
                Ok(())
            }
            Scope::Parent => Err(Error::InvalidScope(
                "parent is derived and cannot be written".to_string(),
            )),
        }
    }

    fn delete(&mut self, key: &KvsKey) -> Result<()> {
        self.check_writable()?;
        match key.scope {
            Scope::Settings => {
                self.settings.remove(&key.field);
                Ok(())
            }
            Scope::Content => {
                self.content.remove(&key.field);
                Ok(())
            }
            Scope::Children => {
                self.children = None;
                Ok(())
            }
            Scope::Parent => Err(Error::InvalidScope(
                "parent is derived and cannot be deleted".to_string(),
            )),
        }
    }

    fn has(&self, key: &KvsKey) -> bool {
        match key.scope {
            Scope::Settings => self.settings.contains_key(&key.field),
            Scope::Content => self.content.contains_key(&key.field),
            Scope::Children => self.children.is_some(),
            Scope::Parent => self.parent.is_some(),
        }
    }

    fn default(&self, key: &KvsKey) -> Option<Json> {
        match key.scope {
            Scope::Settings => self.inherited.get(&key.field).cloned(),
            _ => None,
        }
    }

    fn snapshot(&self) -> KvsSnapshot {
        KvsSnapshot {
            settings: self.settings.clone(),
            content: self.content.clone(),
            children: self.children.clone().unwrap_or_default(),
            parent: self.parent.clone(),
        }
    }
}
