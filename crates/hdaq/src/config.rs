//! Container options.

/// When the in-memory container is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// After every successful insert, attribute write or dataset creation.
    #[default]
    EveryWrite,
    /// Only on [`Container::flush`](crate::Container::flush), close and
    /// drop.
    Manual,
}

/// Container creation properties.
///
/// ```
/// use hdaq::{ContainerOptions, FlushPolicy};
///
/// let opts = ContainerOptions::new()
///     .extension("hdf5")
///     .flush_policy(FlushPolicy::Manual);
/// assert_eq!(opts.extension, "hdf5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOptions {
    /// File extension appended to the base name, without the dot.
    pub extension: String,
    /// When changes reach the disk.
    pub flush_policy: FlushPolicy,
    /// Create missing groups of a dataset name on first insert. When off,
    /// inserting under a missing group fails.
    pub create_intermediate_groups: bool,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            extension: "h5".to_string(),
            flush_policy: FlushPolicy::EveryWrite,
            create_intermediate_groups: true,
        }
    }
}

impl ContainerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    pub fn create_intermediate_groups(mut self, create: bool) -> Self {
        self.create_intermediate_groups = create;
        self
    }
}
