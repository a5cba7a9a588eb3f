//! Scoped router settings
//!
//! [`branch_setting`] and [`default_store`] return RAII guards over
//! instance-level override stacks. Each guard pushes its value on
//! creation and pops it on drop, so lexically nested scopes restore the
//! previous setting. The stacks belong to the router instance, not to a
//! thread: concurrent callers that need isolated settings should build
//! explicit [`StoreContext`] values instead of scoping the shared
//! router.
//!
//! [`branch_setting`]: crate::MixedRouter::branch_setting
//! [`default_store`]: crate::MixedRouter::default_store
//! [`StoreContext`]: modulestore_core::StoreContext

use modulestore_core::BranchSetting;
use parking_lot::Mutex;

/// A base value with a stack of scoped overrides.
///
/// The current value is the most recent un-dropped override, or the
/// base when none is active.
#[derive(Debug)]
pub(crate) struct SettingStack<T: Copy> {
    base: T,
    overrides: Mutex<Vec<T>>,
}

impl<T: Copy> SettingStack<T> {
    pub(crate) fn new(base: T) -> Self {
        Self {
            base,
            overrides: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn current(&self) -> T {
        self.overrides.lock().last().copied().unwrap_or(self.base)
    }

    fn push(&self, value: T) {
        self.overrides.lock().push(value);
    }

    fn pop(&self) {
        self.overrides.lock().pop();
    }
}

/// Keeps a branch setting in force until dropped.
///
/// Returned by [`MixedRouter::branch_setting`]; contexts built while the
/// guard lives carry its setting.
///
/// [`MixedRouter::branch_setting`]: crate::MixedRouter::branch_setting
#[must_use = "the branch override ends when this guard is dropped"]
pub struct BranchSettingGuard<'a> {
    stack: &'a SettingStack<BranchSetting>,
}

impl<'a> BranchSettingGuard<'a> {
    pub(crate) fn new(stack: &'a SettingStack<BranchSetting>, branch: BranchSetting) -> Self {
        stack.push(branch);
        Self { stack }
    }
}

impl Drop for BranchSettingGuard<'_> {
    fn drop(&mut self) {
        self.stack.pop();
    }
}

/// Keeps a default-store choice in force until dropped.
///
/// Returned by [`MixedRouter::default_store`]; while the guard lives,
/// operations on unmapped courses go to the chosen store.
///
/// [`MixedRouter::default_store`]: crate::MixedRouter::default_store
#[must_use = "the default-store override ends when this guard is dropped"]
pub struct DefaultStoreGuard<'a> {
    stack: &'a SettingStack<usize>,
}

impl<'a> DefaultStoreGuard<'a> {
    pub(crate) fn new(stack: &'a SettingStack<usize>, index: usize) -> Self {
        stack.push(index);
        Self { stack }
    }
}

impl Drop for DefaultStoreGuard<'_> {
    fn drop(&mut self) {
        self.stack.pop();
    }
}
