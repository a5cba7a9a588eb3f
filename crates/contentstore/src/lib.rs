//! Binary asset storage
//!
//! Assets (images, PDFs, subtitle files) live outside the course tree,
//! keyed by [`AssetKey`]. Each stored asset carries its payload, a content
//! type, and an open attribute map; the store stamps a digest and upload
//! time on save. The reserved attributes `_id` and `md5` are maintained by
//! the store and refuse external writes.

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::Utc;
use dashmap::DashMap;
use modulestore_core::{Error, Result};
use modulestore_keys::{AssetKey, CourseKey};
use serde_json::{Map as JsonMap, Value as Json};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_128;

/// Attribute names the store maintains itself.
pub const RESERVED_ATTRS: &[&str] = &["_id", "md5"];

/// One stored asset: payload plus metadata.
#[derive(Debug, Clone)]
pub struct StaticContent {
    key: AssetKey,
    content_type: String,
    data: Vec<u8>,
    attrs: JsonMap<String, Json>,
}

impl StaticContent {
    /// The asset key.
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    /// MIME type recorded at save time.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload size in bytes.
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// All attributes, reserved ones included.
    pub fn attrs(&self) -> &JsonMap<String, Json> {
        &self.attrs
    }

    /// The payload digest stamped at save time.
    pub fn digest(&self) -> Option<&str> {
        self.attrs.get("md5").and_then(Json::as_str)
    }

    /// Whether the asset is locked against anonymous download.
    pub fn locked(&self) -> bool {
        self.attrs
            .get("locked")
            .and_then(Json::as_bool)
            .unwrap_or(false)
    }
}

fn digest_hex(data: &[u8]) -> String {
    format!("{:032x}", xxh3_128(data))
}

fn course_norm(course: &CourseKey) -> CourseKey {
    course.for_branch(None)
}

/// Process-wide asset store.
///
/// Thread-safe; handles are cheap clones sharing one store.
#[derive(Debug, Clone, Default)]
pub struct ContentStore {
    assets: std::sync::Arc<DashMap<AssetKey, StaticContent>>,
}

impl ContentStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an asset, replacing any previous payload under the same
    /// key. Caller attributes are kept except for the reserved names,
    /// which the store recomputes.
    pub fn save(
        &self,
        key: &AssetKey,
        content_type: &str,
        data: Vec<u8>,
        attrs: JsonMap<String, Json>,
    ) -> Result<StaticContent> {
        let mut attrs: JsonMap<String, Json> = attrs
            .into_iter()
            .filter(|(name, _)| !RESERVED_ATTRS.contains(&name.as_str()))
            .collect();
        attrs.insert("_id".to_string(), Json::String(key.to_string()));
        attrs.insert("md5".to_string(), Json::String(digest_hex(&data)));
        attrs.insert("contentType".to_string(), Json::String(content_type.to_string()));
        attrs.insert(
            "uploadDate".to_string(),
            Json::String(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        );
        attrs
            .entry("displayname".to_string())
            .or_insert_with(|| Json::String(key.name().to_string()));

        let content = StaticContent {
            key: key.clone(),
            content_type: content_type.to_string(),
            data,
            attrs,
        };
        debug!(target: "modulestore::contentstore", asset = %key, bytes = content.data.len(), "Saved asset");
        self.assets.insert(key.clone(), content.clone());
        Ok(content)
    }

    /// Load an asset.
    ///
    /// # Errors
    /// `Error::AssetNotFound` when no asset exists under the key.
    pub fn find(&self, key: &AssetKey) -> Result<StaticContent> {
        self.assets
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::AssetNotFound(key.to_string()))
    }

    /// Delete an asset.
    ///
    /// # Errors
    /// `Error::AssetNotFound` when no asset exists under the key.
    pub fn delete(&self, key: &AssetKey) -> Result<()> {
        self.assets
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::AssetNotFound(key.to_string()))
    }

    /// One attribute of an asset.
    ///
    /// # Errors
    /// `Error::AssetNotFound` for a missing asset or attribute.
    pub fn get_attr(&self, key: &AssetKey, name: &str) -> Result<Json> {
        let content = self.find(key)?;
        content
            .attrs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AssetNotFound(format!("{} has no attribute '{}'", key, name)))
    }

    /// All attributes of an asset.
    pub fn get_attrs(&self, key: &AssetKey) -> Result<JsonMap<String, Json>> {
        Ok(self.find(key)?.attrs.clone())
    }

    /// Set one attribute of an asset.
    ///
    /// # Errors
    /// `Error::ReadOnlyAttribute` for a reserved name,
    /// `Error::AssetNotFound` for a missing asset.
    pub fn set_attr(&self, key: &AssetKey, name: &str, value: Json) -> Result<()> {
        let mut attrs = JsonMap::new();
        attrs.insert(name.to_string(), value);
        self.set_attrs(key, attrs)
    }

    /// Set several attributes of an asset at once.
    ///
    /// # Errors
    /// `Error::ReadOnlyAttribute` when any name is reserved (nothing is
    /// written), `Error::AssetNotFound` for a missing asset.
    pub fn set_attrs(&self, key: &AssetKey, attrs: JsonMap<String, Json>) -> Result<()> {
        for name in attrs.keys() {
            if RESERVED_ATTRS.contains(&name.as_str()) {
                return Err(Error::ReadOnlyAttribute(name.clone()));
            }
        }
        let mut entry = self
            .assets
            .get_mut(key)
            .ok_or_else(|| Error::AssetNotFound(key.to_string()))?;
        for (name, value) in attrs {
            entry.attrs.insert(name, value);
        }
        Ok(())
    }

    /// Every asset of a course, sorted by asset name.
    pub fn get_all_content_for_course(&self, course: &CourseKey) -> Vec<StaticContent> {
        let norm = course_norm(course);
        let mut assets: Vec<StaticContent> = self
            .assets
            .iter()
            .filter(|entry| course_norm(entry.key().course_key()) == norm)
            .map(|entry| entry.value().clone())
            .collect();
        assets.sort_by(|a, b| a.key.name().cmp(b.key.name()));
        assets
    }

    /// Delete every asset of a course. Returns how many were removed.
    pub fn delete_all_course_assets(&self, course: &CourseKey) -> Result<usize> {
        let norm = course_norm(course);
        let keys: Vec<AssetKey> = self
            .assets
            .iter()
            .filter(|entry| course_norm(entry.key().course_key()) == norm)
            .map(|entry| entry.key().clone())
            .collect();
        for key in &keys {
            self.assets.remove(key);
        }
        debug!(target: "modulestore::contentstore", course = %course, removed = keys.len(), "Deleted course assets");
        Ok(keys.len())
    }

    /// Copy every asset of `src_course` into `dst_course`, re-keying
    /// each asset. Returns how many were copied.
    pub fn copy_all_course_assets(
        &self,
        src_course: &CourseKey,
        dst_course: &CourseKey,
    ) -> Result<usize> {
        let assets = self.get_all_content_for_course(src_course);
        let count = assets.len();
        for asset in assets {
            let dst_key = asset.key.map_into_course(dst_course.clone());
            let mut attrs = asset.attrs.clone();
            for name in RESERVED_ATTRS {
                attrs.remove(*name);
            }
            self.save(&dst_key, &asset.content_type, asset.data.clone(), attrs)?;
        }
        Ok(count)
    }

    /// Number of stored assets across all courses.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// True when no assets are stored.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
