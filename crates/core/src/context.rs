//! Per-call store context
//!
//! Every store operation receives a [`StoreContext`]: the branch setting
//! in force, a cancellation token checked before document I/O, and a
//! handle to the per-request cache shared by all operations of one
//! request. The router builds one per public call; tests build their own.

use crate::error::{Error, Result};
use crate::inheritance::InheritanceMap;
use crate::types::BranchSetting;
use modulestore_keys::{CourseKey, UsageKey};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CancelInner {
    flag: AtomicBool,
    deadline: Option<Instant>,
}

/// Cooperative cancellation: a shared flag plus an optional deadline.
///
/// Clones share the flag. Backends call [`check`](CancelToken::check)
/// before each document read or write.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// A token that never cancels on its own.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                deadline: None,
            }),
        }
    }

    /// A token that cancels once `budget` has elapsed.
    pub fn with_deadline(budget: Duration) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                deadline: Some(Instant::now() + budget),
            }),
        }
    }

    /// Cancel all operations holding a clone of this token.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
    }

    /// True when the flag is set or the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.flag.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.inner.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// Fail with `Error::OperationAborted` when cancelled.
    pub fn check(&self) -> Result<()> {
        if self.inner.flag.load(Ordering::SeqCst) {
            return Err(Error::OperationAborted("operation cancelled".to_string()));
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Err(Error::OperationAborted("deadline exceeded".to_string()));
            }
        }
        Ok(())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Caches shared by all operations of one request.
///
/// Two layers live here: computed inheritance maps per course, and raw
/// block documents per usage key. Writers evict both for the touched
/// course.
#[derive(Debug, Default)]
pub struct RequestScope {
    inherited: Mutex<FxHashMap<CourseKey, Arc<InheritanceMap>>>,
    documents: Mutex<FxHashMap<UsageKey, Json>>,
}

impl RequestScope {
    /// An empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    fn course_cache_key(course: &CourseKey) -> CourseKey {
        course.for_branch(None)
    }

    /// The inheritance map cached for `course` in this request.
    pub fn inheritance_map(&self, course: &CourseKey) -> Option<Arc<InheritanceMap>> {
        self.inherited
            .lock()
            .get(&Self::course_cache_key(course))
            .cloned()
    }

    /// Cache a computed inheritance map for the rest of the request.
    pub fn store_inheritance(&self, course: &CourseKey, map: Arc<InheritanceMap>) {
        self.inherited
            .lock()
            .insert(Self::course_cache_key(course), map);
    }

    /// Drop the cached inheritance map for `course`.
    pub fn invalidate_inheritance(&self, course: &CourseKey) {
        self.inherited.lock().remove(&Self::course_cache_key(course));
    }

    /// The raw document cached for `key` in this request.
    pub fn cached_document(&self, key: &UsageKey) -> Option<Json> {
        self.documents.lock().get(key).cloned()
    }

    /// Cache a raw document for the rest of the request.
    pub fn cache_document(&self, key: &UsageKey, document: Json) {
        self.documents.lock().insert(key.clone(), document);
    }

    /// Drop every cached document belonging to `course`, and the course's
    /// inheritance map. Called after any write into the course.
    pub fn evict_course(&self, course: &CourseKey) {
        let norm = Self::course_cache_key(course);
        self.documents
            .lock()
            .retain(|key, _| key.course_key().for_branch(None) != norm);
        self.invalidate_inheritance(course);
    }

    /// Number of cached documents.
    pub fn cached_document_count(&self) -> usize {
        self.documents.lock().len()
    }
}

/// Everything a store operation needs besides its arguments.
#[derive(Debug, Clone)]
pub struct StoreContext {
    branch: BranchSetting,
    cancel: CancelToken,
    request: Arc<RequestScope>,
}

impl StoreContext {
    /// A fresh context with its own request scope and an inert token.
    pub fn new(branch: BranchSetting) -> Self {
        Self {
            branch,
            cancel: CancelToken::new(),
            request: Arc::new(RequestScope::new()),
        }
    }

    /// Shortcut for authoring flows.
    pub fn draft_preferred() -> Self {
        Self::new(BranchSetting::DraftPreferred)
    }

    /// Shortcut for delivery flows.
    pub fn published_only() -> Self {
        Self::new(BranchSetting::PublishedOnly)
    }

    /// The branch setting in force.
    pub fn branch(&self) -> BranchSetting {
        self.branch
    }

    /// A context with another branch setting, sharing this one's request
    /// scope and token.
    pub fn with_branch(&self, branch: BranchSetting) -> Self {
        Self {
            branch,
            cancel: self.cancel.clone(),
            request: Arc::clone(&self.request),
        }
    }

    /// A context with another cancellation token, sharing this one's
    /// request scope.
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            branch: self.branch,
            cancel,
            request: Arc::clone(&self.request),
        }
    }

    /// The cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fail with `Error::OperationAborted` when cancelled. Backends call
    /// this before document I/O.
    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }

    /// The per-request cache.
    pub fn request(&self) -> &Arc<RequestScope> {
        &self.request
    }
}

impl Default for StoreContext {
    fn default() -> Self {
        Self::draft_preferred()
    }
}
