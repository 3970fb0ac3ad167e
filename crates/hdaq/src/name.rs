//! Splitting dataset names into group path and leaf.

/// A dataset name split at its last `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetName {
    /// Group path including the trailing `/`; `/` when the name has none.
    pub group: String,
    /// Final path component.
    pub leaf: String,
}

impl DatasetName {
    /// Absolute object path inside the container.
    pub fn path(&self) -> String {
        format!("/{}{}", self.group.trim_start_matches('/'), self.leaf)
    }

    /// Whether the dataset lives directly in the root group.
    pub fn in_root(&self) -> bool {
        self.group.trim_matches('/').is_empty()
    }
}

/// Split `name` at its last `/`. Never fails.
pub fn resolve(name: &str) -> DatasetName {
    match name.rfind('/') {
        Some(i) => DatasetName {
            group: name[..=i].to_string(),
            leaf: name[i + 1..].to_string(),
        },
        None => DatasetName {
            group: "/".to_string(),
            leaf: name.to_string(),
        },
    }
}
