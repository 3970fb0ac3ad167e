//! In-process cache of open datasets, keyed by leaf name.

use std::collections::HashMap;

use crate::types::ElementType;

/// What the container knows about an open dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    pub(crate) path: String,
    pub(crate) element_type: ElementType,
    pub(crate) row_count: usize,
    pub(crate) growth: u64,
}

impl DatasetHandle {
    /// Absolute object path inside the container.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Values per unit, fixed at creation.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Number of units written so far.
    pub fn growth(&self) -> u64 {
        self.growth
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: HashMap<String, DatasetHandle>,
}

impl Registry {
    pub(crate) fn lookup(&self, leaf: &str) -> Option<&DatasetHandle> {
        self.entries.get(leaf)
    }

    pub(crate) fn lookup_mut(&mut self, leaf: &str) -> Option<&mut DatasetHandle> {
        self.entries.get_mut(leaf)
    }

    /// Register a freshly created or opened dataset.
    pub(crate) fn insert(&mut self, leaf: impl Into<String>, handle: DatasetHandle) {
        self.entries.insert(leaf.into(), handle);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}
