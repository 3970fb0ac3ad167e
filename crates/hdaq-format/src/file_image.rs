//! In-memory object tree of a container file.
//!
//! A [`FileImage`] holds groups, chunked datasets and their attributes.
//! It is edited in memory and converted to and from HDF5 bytes by
//! [`FileImage::to_bytes`] and [`FileImage::from_bytes`].
//!
//! Paths are `/`-separated; the leading `/` is optional and `""` or `"/"`
//! name the root group.

use std::collections::{BTreeMap, BTreeSet};

use crate::attribute::AttributeMessage;
use crate::dataspace::UNLIMITED;
use crate::datatype::Datatype;
use crate::error::FormatError;
use crate::extensible_array::{EaGeometry, EaParams};
use crate::selection::Selection;

/// A group: named children plus attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    pub(crate) children: BTreeMap<String, Node>,
    pub(crate) attributes: Vec<AttributeMessage>,
}

impl Group {
    /// Child objects sorted by name.
    pub fn children(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.children.iter().map(|(name, node)| (name.as_str(), node))
    }

    pub fn attributes(&self) -> &[AttributeMessage] {
        &self.attributes
    }
}

/// An object linked from a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
}

impl Node {
    fn attributes_mut(&mut self) -> &mut Vec<AttributeMessage> {
        match self {
            Node::Group(g) => &mut g.attributes,
            Node::Dataset(d) => &mut d.attributes,
        }
    }

    fn attributes(&self) -> &[AttributeMessage] {
        match self {
            Node::Group(g) => &g.attributes,
            Node::Dataset(d) => &d.attributes,
        }
    }
}

/// A chunked dataset with exactly one unlimited dimension.
///
/// Chunks are kept by their scaled coordinates (element coordinate divided
/// by chunk size per dimension). Chunks never written read as zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub(crate) datatype: Datatype,
    pub(crate) dims: Vec<u64>,
    pub(crate) max_dims: Vec<u64>,
    pub(crate) chunk_dims: Vec<u64>,
    pub(crate) index_params: EaParams,
    pub(crate) chunks: BTreeMap<Vec<u64>, Vec<u8>>,
    pub(crate) attributes: Vec<AttributeMessage>,
}

impl Dataset {
    pub(crate) fn new(
        datatype: Datatype,
        dims: &[u64],
        max_dims: &[u64],
        chunk_dims: &[u64],
        index_params: EaParams,
    ) -> Result<Self, FormatError> {
        let rank = dims.len();
        if rank == 0 {
            return Err(FormatError::InvalidShape("chunked datasets need rank >= 1"));
        }
        for v in [max_dims, chunk_dims] {
            if v.len() != rank {
                return Err(FormatError::RankMismatch {
                    expected: rank,
                    actual: v.len(),
                });
            }
        }
        if datatype.type_size() == 0 {
            return Err(FormatError::InvalidShape("zero-sized element type"));
        }
        if max_dims.iter().filter(|&&m| m == UNLIMITED).count() != 1 {
            return Err(FormatError::InvalidShape("exactly one dimension must be unlimited"));
        }
        for d in 0..rank {
            if chunk_dims[d] == 0 || chunk_dims[d] > u64::from(u32::MAX) {
                return Err(FormatError::InvalidShape("chunk dimension out of range"));
            }
            if max_dims[d] != UNLIMITED && chunk_dims[d] > max_dims[d] {
                return Err(FormatError::InvalidShape("chunk larger than fixed dimension"));
            }
        }
        let mut dataset = Dataset {
            datatype,
            dims: Vec::new(),
            max_dims: max_dims.to_vec(),
            chunk_dims: chunk_dims.to_vec(),
            index_params,
            chunks: BTreeMap::new(),
            attributes: Vec::new(),
        };
        dataset.check_extent(dims)?;
        dataset.dims = dims.to_vec();
        Ok(dataset)
    }

    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    /// Current extent.
    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn max_dims(&self) -> &[u64] {
        &self.max_dims
    }

    pub fn chunk_dims(&self) -> &[u64] {
        &self.chunk_dims
    }

    pub fn attributes(&self) -> &[AttributeMessage] {
        &self.attributes
    }

    /// Number of chunks currently holding data.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn element_size(&self) -> usize {
        self.datatype.type_size() as usize
    }

    pub(crate) fn chunk_len(&self) -> usize {
        self.chunk_dims.iter().product::<u64>() as usize * self.element_size()
    }

    fn unlimited_dim(&self) -> usize {
        self.max_dims
            .iter()
            .position(|&m| m == UNLIMITED)
            .unwrap_or(0)
    }

    /// Chunk counts of the fixed dimensions, in swizzled order (unlimited
    /// dimension moved to the front).
    fn swizzled_max_chunks(&self) -> Vec<u64> {
        let u = self.unlimited_dim();
        let mut out = vec![0];
        for d in (0..self.max_dims.len()).filter(|&d| d != u) {
            out.push(self.max_dims[d].div_ceil(self.chunk_dims[d]));
        }
        out
    }

    /// Position of a chunk in the extensible array: the unlimited
    /// dimension is moved to the front, then row-major over the maximum
    /// chunk counts.
    pub(crate) fn linear_index(&self, scaled: &[u64]) -> u64 {
        let u = self.unlimited_dim();
        let max_chunks = self.swizzled_max_chunks();
        let swizzled = core::iter::once(scaled[u])
            .chain((0..scaled.len()).filter(|&d| d != u).map(|d| scaled[d]));
        let mut index = 0u64;
        for (i, s) in swizzled.enumerate() {
            index = if i == 0 { s } else { index * max_chunks[i] + s };
        }
        index
    }

    /// Inverse of [`Dataset::linear_index`].
    pub(crate) fn scaled_from_index(&self, mut index: u64) -> Vec<u64> {
        let u = self.unlimited_dim();
        let max_chunks = self.swizzled_max_chunks();
        let mut swizzled = vec![0u64; max_chunks.len()];
        for i in (1..max_chunks.len()).rev() {
            swizzled[i] = index % max_chunks[i].max(1);
            index /= max_chunks[i].max(1);
        }
        swizzled[0] = index;

        let mut scaled = vec![0u64; swizzled.len()];
        scaled[u] = swizzled[0];
        let fixed = (0..scaled.len()).filter(|&d| d != u);
        for (d, s) in fixed.zip(&swizzled[1..]) {
            scaled[d] = *s;
        }
        scaled
    }

    fn check_extent(&self, dims: &[u64]) -> Result<(), FormatError> {
        if dims.len() != self.max_dims.len() {
            return Err(FormatError::RankMismatch {
                expected: self.max_dims.len(),
                actual: dims.len(),
            });
        }
        for (d, (&requested, &max)) in dims.iter().zip(&self.max_dims).enumerate() {
            if requested > max {
                return Err(FormatError::ExtentExceedsMax {
                    dim: d,
                    requested,
                    max,
                });
            }
        }
        if dims.iter().all(|&n| n > 0) {
            let last: Vec<u64> = dims
                .iter()
                .zip(&self.chunk_dims)
                .map(|(&n, &c)| (n - 1) / c)
                .collect();
            let capacity = EaGeometry::new(self.index_params)?.capacity();
            if self.linear_index(&last) >= capacity {
                return Err(FormatError::ChunkIndexFull { capacity });
            }
        }
        Ok(())
    }

    /// Change the current extent. Chunks that fall entirely outside the
    /// new extent are dropped; elements of edge chunks outside it are
    /// zeroed so that a later grow exposes fill values.
    pub fn set_extent(&mut self, dims: &[u64]) -> Result<(), FormatError> {
        self.check_extent(dims)?;
        let chunk_dims = self.chunk_dims.clone();
        let esize = self.element_size();
        self.chunks.retain(|scaled, _| {
            scaled
                .iter()
                .zip(&chunk_dims)
                .zip(dims)
                .all(|((&s, &c), &n)| s * c < n)
        });
        for (scaled, data) in self.chunks.iter_mut() {
            let crosses = scaled
                .iter()
                .zip(&chunk_dims)
                .zip(dims)
                .any(|((&s, &c), &n)| (s + 1) * c > n);
            if !crosses {
                continue;
            }
            let origin: Vec<u64> = scaled.iter().zip(&chunk_dims).map(|(&s, &c)| s * c).collect();
            for (i, local) in Selection::All.coordinates(&chunk_dims).enumerate() {
                let outside = local
                    .iter()
                    .zip(&origin)
                    .zip(dims)
                    .any(|((&l, &o), &n)| l + o >= n);
                if outside {
                    data[i * esize..(i + 1) * esize].fill(0);
                }
            }
        }
        self.dims = dims.to_vec();
        Ok(())
    }

    /// Split an element coordinate into chunk key and byte offset inside
    /// the chunk.
    fn locate(&self, coord: &[u64]) -> (Vec<u64>, usize) {
        let mut scaled = Vec::with_capacity(coord.len());
        let mut offset = 0u64;
        for (&c, &chunk) in coord.iter().zip(&self.chunk_dims) {
            scaled.push(c / chunk);
            offset = offset * chunk + c % chunk;
        }
        (scaled, offset as usize * self.element_size())
    }

    /// Write `data` (selected elements in row-major selection order) into
    /// the selection. Untouched parts of newly created chunks are zero.
    pub fn write_selection(&mut self, selection: &Selection, data: &[u8]) -> Result<(), FormatError> {
        selection.validate(&self.dims)?;
        let esize = self.element_size();
        let expected = selection.num_elements(&self.dims) as usize * esize;
        if data.len() != expected {
            return Err(FormatError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let chunk_len = self.chunk_len();
        for (coord, value) in selection.coordinates(&self.dims).zip(data.chunks_exact(esize)) {
            let (key, offset) = self.locate(&coord);
            let chunk = self.chunks.entry(key).or_insert_with(|| vec![0; chunk_len]);
            chunk[offset..offset + esize].copy_from_slice(value);
        }
        Ok(())
    }

    /// Positions in the chunk index of the chunks a selection touches.
    pub fn chunk_indices(&self, selection: &Selection) -> Result<BTreeSet<u64>, FormatError> {
        selection.validate(&self.dims)?;
        Ok(selection
            .coordinates(&self.dims)
            .map(|coord| self.linear_index(&self.locate(&coord).0))
            .collect())
    }

    /// Read the selected elements in row-major selection order.
    pub fn read_selection(&self, selection: &Selection) -> Result<Vec<u8>, FormatError> {
        selection.validate(&self.dims)?;
        let esize = self.element_size();
        let mut out = Vec::with_capacity(selection.num_elements(&self.dims) as usize * esize);
        for coord in selection.coordinates(&self.dims) {
            let (key, offset) = self.locate(&coord);
            match self.chunks.get(&key) {
                Some(chunk) => out.extend_from_slice(&chunk[offset..offset + esize]),
                None => out.resize(out.len() + esize, 0),
            }
        }
        Ok(out)
    }
}

/// Split a path into components, rejecting empty ones.
fn components(path: &str) -> Result<Vec<&str>, FormatError> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
        return Err(FormatError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

/// `/a/b` form of a path; the root is `""`.
pub(crate) fn canonical_path(path: &str) -> Result<String, FormatError> {
    Ok(components(path)?.iter().map(|c| format!("/{c}")).collect())
}

/// An editable container file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileImage {
    pub(crate) root: Group,
}

impl FileImage {
    /// A file holding only an empty root group.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    fn group(&self, parts: &[&str], path: &str) -> Result<&Group, FormatError> {
        let mut group = &self.root;
        for part in parts {
            match group.children.get(*part) {
                Some(Node::Group(g)) => group = g,
                Some(Node::Dataset(_)) => return Err(FormatError::NotAGroup(path.to_string())),
                None => return Err(FormatError::PathNotFound(path.to_string())),
            }
        }
        Ok(group)
    }

    fn group_mut(&mut self, parts: &[&str], path: &str) -> Result<&mut Group, FormatError> {
        let mut group = &mut self.root;
        for part in parts {
            match group.children.get_mut(*part) {
                Some(Node::Group(g)) => group = g,
                Some(Node::Dataset(_)) => return Err(FormatError::NotAGroup(path.to_string())),
                None => return Err(FormatError::PathNotFound(path.to_string())),
            }
        }
        Ok(group)
    }

    fn node(&self, path: &str) -> Result<&Node, FormatError> {
        let parts = components(path)?;
        let (leaf, parents) = parts
            .split_last()
            .ok_or_else(|| FormatError::InvalidPath(path.to_string()))?;
        self.group(parents, path)?
            .children
            .get(*leaf)
            .ok_or_else(|| FormatError::PathNotFound(path.to_string()))
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node, FormatError> {
        let parts = components(path)?;
        let (leaf, parents) = parts
            .split_last()
            .ok_or_else(|| FormatError::InvalidPath(path.to_string()))?;
        self.group_mut(parents, path)?
            .children
            .get_mut(*leaf)
            .ok_or_else(|| FormatError::PathNotFound(path.to_string()))
    }

    /// Whether any object exists at `path`. The root always exists.
    pub fn contains(&self, path: &str) -> bool {
        match components(path) {
            Ok(parts) if parts.is_empty() => true,
            Ok(_) => self.node(path).is_ok(),
            Err(_) => false,
        }
    }

    /// Create the group at `path` and any missing parents. Existing groups
    /// are left alone.
    pub fn create_group_all(&mut self, path: &str) -> Result<(), FormatError> {
        let parts = components(path)?;
        let mut group = &mut self.root;
        for part in parts {
            let node = group
                .children
                .entry(part.to_string())
                .or_insert_with(|| Node::Group(Group::default()));
            match node {
                Node::Group(g) => group = g,
                Node::Dataset(_) => return Err(FormatError::NotAGroup(path.to_string())),
            }
        }
        Ok(())
    }

    /// Create a chunked dataset. The parent group must exist.
    pub fn create_dataset(
        &mut self,
        path: &str,
        datatype: Datatype,
        dims: &[u64],
        max_dims: &[u64],
        chunk_dims: &[u64],
    ) -> Result<(), FormatError> {
        let parts = components(path)?;
        let (leaf, parents) = parts
            .split_last()
            .ok_or_else(|| FormatError::InvalidPath(path.to_string()))?;
        let dataset = Dataset::new(datatype, dims, max_dims, chunk_dims, EaParams::default())?;
        let parent = self.group_mut(parents, path)?;
        if parent.children.contains_key(*leaf) {
            return Err(FormatError::AlreadyExists(path.to_string()));
        }
        parent
            .children
            .insert(leaf.to_string(), Node::Dataset(dataset));
        Ok(())
    }

    pub fn dataset(&self, path: &str) -> Result<&Dataset, FormatError> {
        match self.node(path)? {
            Node::Dataset(d) => Ok(d),
            Node::Group(_) => Err(FormatError::NotADataset(path.to_string())),
        }
    }

    pub fn dataset_mut(&mut self, path: &str) -> Result<&mut Dataset, FormatError> {
        match self.node_mut(path)? {
            Node::Dataset(d) => Ok(d),
            Node::Group(_) => Err(FormatError::NotADataset(path.to_string())),
        }
    }

    /// Unlink the object at `path` together with everything below it.
    pub fn remove(&mut self, path: &str) -> Result<(), FormatError> {
        let parts = components(path)?;
        let (leaf, parents) = parts
            .split_last()
            .ok_or_else(|| FormatError::InvalidPath(path.to_string()))?;
        self.group_mut(parents, path)?
            .children
            .remove(*leaf)
            .map(|_| ())
            .ok_or_else(|| FormatError::PathNotFound(path.to_string()))
    }

    /// Absolute paths of every dataset, in depth-first name order.
    pub fn dataset_paths(&self) -> Vec<String> {
        fn walk(group: &Group, prefix: &str, out: &mut Vec<String>) {
            for (name, node) in &group.children {
                let path = format!("{prefix}/{name}");
                match node {
                    Node::Dataset(_) => out.push(path),
                    Node::Group(g) => walk(g, &path, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, "", &mut out);
        out
    }

    /// Attach an attribute to the group or dataset at `path`.
    pub fn create_attribute(&mut self, path: &str, attribute: AttributeMessage) -> Result<(), FormatError> {
        let attributes = if components(path)?.is_empty() {
            &mut self.root.attributes
        } else {
            self.node_mut(path)?.attributes_mut()
        };
        if attributes.iter().any(|a| a.name == attribute.name) {
            return Err(FormatError::AttributeExists {
                object: path.to_string(),
                name: attribute.name,
            });
        }
        attributes.push(attribute);
        Ok(())
    }

    /// Detach the attribute `name` from the object at `path`.
    pub fn remove_attribute(&mut self, path: &str, name: &str) -> Result<(), FormatError> {
        let attributes = if components(path)?.is_empty() {
            &mut self.root.attributes
        } else {
            self.node_mut(path)?.attributes_mut()
        };
        let before = attributes.len();
        attributes.retain(|a| a.name != name);
        if attributes.len() == before {
            return Err(FormatError::AttributeNotFound {
                object: path.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn attribute(&self, path: &str, name: &str) -> Result<&AttributeMessage, FormatError> {
        let attributes = if components(path)?.is_empty() {
            self.root.attributes()
        } else {
            self.node(path)?.attributes()
        };
        attributes
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| FormatError::AttributeNotFound {
                object: path.to_string(),
                name: name.to_string(),
            })
    }
}
