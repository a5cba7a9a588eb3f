//! Course loading from a data directory
//!
//! A data directory holds one sub-directory per course:
//!
//! ```text
//! data_dir/
//!   toy/
//!     course.json              course manifest: identity, fields, children
//!     policy.json              optional per-block settings overrides
//!     chapter/Overview.json    one file per block
//!     sequential/Lesson1.json
//! ```
//!
//! `course.json` is the course root block plus the `(org, course, run)`
//! identity. Every other block lives at `<category>/<name>.json` and is
//! referenced from a child list as `"category/name"`. `policy.json` maps
//! those same references (the root is addressed as `course/<run>`) to
//! settings objects merged over the block's own metadata, policy winning.
//!
//! Loading is strict about the manifest and lenient about the tree: a
//! child reference with no matching file stays in the child list and is
//! logged, while an unparseable manifest or block file fails the whole
//! course directory.

use modulestore_core::{
    compute_inheritance, Error, InheritanceMap, InheritanceSeed, KvsSnapshot, Result,
};
use modulestore_keys::{BlockType, CourseKey, UsageKey};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as Json};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Manifest file name inside a course directory.
pub const COURSE_MANIFEST: &str = "course.json";

/// Optional policy file name inside a course directory.
pub const POLICY_FILE: &str = "policy.json";

#[derive(Debug, Deserialize)]
struct CourseManifest {
    org: String,
    course: String,
    run: String,
    #[serde(default)]
    metadata: JsonMap<String, Json>,
    #[serde(default)]
    data: Json,
    #[serde(default)]
    children: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BlockFile {
    #[serde(default)]
    metadata: JsonMap<String, Json>,
    #[serde(default)]
    data: Json,
    #[serde(default)]
    children: Vec<String>,
}

/// A block as parsed from disk, before snapshot assembly.
#[derive(Debug)]
struct RawBlock {
    settings: JsonMap<String, Json>,
    data: Json,
    children: Vec<UsageKey>,
}

impl RawBlock {
    fn snapshot(&self) -> KvsSnapshot {
        let mut content = JsonMap::new();
        if !self.data.is_null() {
            content.insert("data".to_string(), self.data.clone());
        }
        KvsSnapshot {
            settings: self.settings.clone(),
            content,
            children: self
                .children
                .iter()
                .map(UsageKey::to_deprecated_string)
                .collect(),
            parent: None,
        }
    }
}

/// One fully loaded, immutable course.
#[derive(Debug)]
pub(crate) struct LoadedCourse {
    /// Canonical course key in stored casing, branch-agnostic.
    pub(crate) key: CourseKey,
    /// The course root usage.
    pub(crate) root: UsageKey,
    /// Every block of the course, keyed by usage key.
    pub(crate) blocks: FxHashMap<UsageKey, KvsSnapshot>,
    /// Inherited settings, computed once at load.
    pub(crate) inheritance: InheritanceMap,
}

/// Why a course directory was skipped at open.
#[derive(Debug, Clone)]
pub struct LoadError {
    /// Directory name under the data directory.
    pub course_dir: String,
    /// What went wrong.
    pub message: String,
}

/// Load every course directory under `data_dir`. Directories that fail
/// to load are reported, not fatal.
pub(crate) fn load_data_dir(
    data_dir: &Path,
    inheritable: &FxHashSet<String>,
) -> Result<(Vec<LoadedCourse>, Vec<LoadError>)> {
    let mut dirs: Vec<_> = fs::read_dir(data_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.path())
        .collect();
    dirs.sort();

    let mut courses = Vec::new();
    let mut errors = Vec::new();
    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with('.') {
            continue;
        }
        match load_course_dir(&dir, inheritable) {
            Ok(course) => {
                debug!(
                    target: "modulestore::treestore",
                    course = %course.key,
                    blocks = course.blocks.len(),
                    dir = %name,
                    "Loaded course directory"
                );
                courses.push(course);
            }
            Err(err) => {
                warn!(
                    target: "modulestore::treestore",
                    dir = %name,
                    error = %err,
                    "Skipping course directory"
                );
                errors.push(LoadError {
                    course_dir: name,
                    message: err.to_string(),
                });
            }
        }
    }
    Ok((courses, errors))
}

/// Load one course directory.
fn load_course_dir(dir: &Path, inheritable: &FxHashSet<String>) -> Result<LoadedCourse> {
    let manifest_path = dir.join(COURSE_MANIFEST);
    let manifest: CourseManifest = parse_file(&manifest_path)?;
    let key = CourseKey::new(&manifest.org, &manifest.course, &manifest.run)?;
    let root = key.course_root_usage()?;

    let mut raw: FxHashMap<UsageKey, RawBlock> = FxHashMap::default();
    raw.insert(
        root.clone(),
        RawBlock {
            settings: manifest.metadata,
            data: manifest.data,
            children: resolve_refs(&key, &manifest.children)?,
        },
    );
    scan_block_files(dir, &key, &mut raw)?;
    apply_policy(dir, &key, &mut raw)?;

    for (block, entry) in &raw {
        for child in &entry.children {
            if !raw.contains_key(child) {
                debug!(
                    target: "modulestore::treestore",
                    block = %block,
                    child = %child,
                    "Child reference has no file"
                );
            }
        }
    }

    let mut seed = InheritanceSeed::new(key.for_branch(None), root.clone(), inheritable.clone());
    for (block, entry) in &raw {
        seed.add_block(block, &entry.settings, entry.children.clone());
    }
    let inheritance = compute_inheritance(&seed);

    let blocks = raw
        .into_iter()
        .map(|(block, entry)| (block, entry.snapshot()))
        .collect();
    Ok(LoadedCourse {
        key: key.for_branch(None),
        root,
        blocks,
        inheritance,
    })
}

/// Read `<category>/<name>.json` files into `raw`. The `course` category
/// is reserved for the manifest and skipped here.
fn scan_block_files(
    dir: &Path,
    course: &CourseKey,
    raw: &mut FxHashMap<UsageKey, RawBlock>,
) -> Result<()> {
    let mut category_dirs: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    category_dirs.sort();

    for category_dir in category_dirs {
        let Some(dir_name) = category_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if dir_name.starts_with('.') || dir_name == "course" {
            continue;
        }
        let category = BlockType::new(dir_name)?;

        let mut files: Vec<_> = fs::read_dir(&category_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for file in files {
            let Some(name) = file.file_stem().and_then(|n| n.to_str()) else {
                continue;
            };
            let parsed: BlockFile = parse_file(&file)?;
            let usage = course.make_usage_key(category.clone(), name)?;
            raw.insert(
                usage,
                RawBlock {
                    settings: parsed.metadata,
                    data: parsed.data,
                    children: resolve_refs(course, &parsed.children)?,
                },
            );
        }
    }
    Ok(())
}

/// Merge `policy.json` overrides into block settings. Policy entries
/// address blocks as `category/name` and win over file metadata.
fn apply_policy(
    dir: &Path,
    course: &CourseKey,
    raw: &mut FxHashMap<UsageKey, RawBlock>,
) -> Result<()> {
    let path = dir.join(POLICY_FILE);
    if !path.exists() {
        return Ok(());
    }
    let policy: JsonMap<String, Json> = parse_file(&path)?;
    for (reference, overrides) in policy {
        let usage = resolve_ref(course, &reference)?;
        let Json::Object(overrides) = overrides else {
            return Err(Error::Serialization(format!(
                "policy entry for '{reference}' must be an object"
            )));
        };
        match raw.get_mut(&usage) {
            Some(entry) => {
                for (field, value) in overrides {
                    entry.settings.insert(field, value);
                }
            }
            None => {
                debug!(
                    target: "modulestore::treestore",
                    block = %usage,
                    "Policy entry has no block file"
                );
            }
        }
    }
    Ok(())
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|err| {
        Error::Serialization(format!("{}: {err}", path.display()))
    })
}

/// Resolve a `"category/name"` reference against the owning course.
fn resolve_ref(course: &CourseKey, reference: &str) -> Result<UsageKey> {
    let Some((category, name)) = reference.split_once('/') else {
        return Err(Error::Serialization(format!(
            "block reference '{reference}' is not 'category/name'"
        )));
    };
    if name.is_empty() || name.contains('/') {
        return Err(Error::Serialization(format!(
            "block reference '{reference}' is not 'category/name'"
        )));
    }
    Ok(course.make_usage_key(BlockType::new(category)?, name)?)
}

fn resolve_refs(course: &CourseKey, references: &[String]) -> Result<Vec<UsageKey>> {
    references
        .iter()
        .map(|reference| resolve_ref(course, reference))
        .collect()
}
