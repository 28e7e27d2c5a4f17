use std::fmt::{self, Display, Formatter};
use std::io::{self, prelude::*, SeekFrom};

use indexmap::IndexMap;

use crate::dataset::array::{Bytes, ElementType};

/// A reference to a bulk binary payload that was deliberately *not* read
/// while walking the tag tree. Array payloads can run to many megabytes,
/// so the tree walk records where they live and moves on.
///
/// The only way to turn a blob into bytes is [`LazyBlob::materialize`],
/// which takes the open source stream explicitly. Readers materialize every
/// payload a dataset needs before the stream is dropped, so no dataset ever
/// holds a dangling reference into a closed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LazyBlob {
    /// Absolute byte offset of the payload in the source stream
    pub offset: u64,
    /// Total payload length in bytes
    pub byte_len: u64,
    /// Element type of the payload, when the tag definition named a single
    /// scalar type. Struct-typed and nested-array payloads report
    /// [`ElementType::Unknown`].
    pub elem: ElementType,
    /// Size in bytes of one element
    pub item_size: u32,
    /// Number of elements
    pub count: u64,
}

impl LazyBlob {
    /// Read the payload bytes from `source`. The stream position is not
    /// restored afterwards.
    pub fn materialize<R: Read + Seek>(&self, source: &mut R) -> io::Result<Bytes> {
        source.seek(SeekFrom::Start(self.offset))?;
        let mut buf = vec![0u8; self.byte_len as usize];
        source.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Display for LazyBlob {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LazyBlob({} x {:?} @ {}, {} bytes)",
            self.count, self.elem, self.offset, self.byte_len
        )
    }
}

/// A decoded leaf tag value.
///
/// The set of variants is closed: every tag a reader can encounter decodes
/// into one of these, with [`TagValue::Missing`] standing in for type codes
/// the decoder does not understand so that one exotic tag never aborts the
/// rest of the tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TagValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Boolean(bool),
    String(String),
    /// An ordered tuple of heterogeneously typed scalars
    Struct(Vec<TagValue>),
    /// A deferred array payload, see [`LazyBlob`]
    Blob(LazyBlob),
    /// Placeholder for a tag whose type code was not recognized
    Missing,
}

impl TagValue {
    /// Coerce any integral variant to `i64`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            Self::Boolean(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Coerce any non-negative integral variant to `u64`
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            Self::Boolean(v) => Some(*v as u64),
            _ => None,
        }
    }

    /// Coerce any numeric variant to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            Self::Boolean(v) => Some(*v as u8 as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&LazyBlob> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// A node in the decoded tag tree: either a named subgroup or a leaf value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TagNode {
    Group(TagGroup),
    Leaf(TagValue),
}

impl TagNode {
    pub fn as_group(&self) -> Option<&TagGroup> {
        match self {
            Self::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&TagValue> {
        match self {
            Self::Leaf(v) => Some(v),
            _ => None,
        }
    }

    /// Follow a dotted path below this node, e.g. `"ImageData.Dimensions.0"`
    pub fn get_path(&self, path: &str) -> Option<&TagNode> {
        match self {
            Self::Group(g) => g.get_path(path),
            _ => None,
        }
    }
}

impl From<TagValue> for TagNode {
    fn from(value: TagValue) -> Self {
        Self::Leaf(value)
    }
}

impl From<TagGroup> for TagNode {
    fn from(value: TagGroup) -> Self {
        Self::Group(value)
    }
}

/// An ordered collection of named tags, preserving the order the entries
/// were encountered in the file.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagGroup {
    entries: IndexMap<String, TagNode>,
}

impl TagGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a node under `name`, never overwriting an existing sibling.
    /// A colliding name receives a numeric suffix (`Name-2`, `Name-3`, ...)
    /// so both values stay retrievable. Returns the key actually used.
    pub fn insert(&mut self, name: String, node: TagNode) -> String {
        if !self.entries.contains_key(&name) {
            self.entries.insert(name.clone(), node);
            return name;
        }
        let mut nth = 2usize;
        loop {
            let candidate = format!("{}-{}", name, nth);
            if !self.entries.contains_key(&candidate) {
                self.entries.insert(candidate.clone(), node);
                return candidate;
            }
            nth += 1;
        }
    }

    pub fn get(&self, name: &str) -> Option<&TagNode> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Follow a dotted path through nested groups, e.g.
    /// `"ImageList.1.ImageData.Data"`
    pub fn get_path(&self, path: &str) -> Option<&TagNode> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut node = self.entries.get(first)?;
        for part in parts {
            node = node.as_group()?.get(part)?;
        }
        Some(node)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, TagNode> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

impl<'a> IntoIterator for &'a TagGroup {
    type Item = (&'a String, &'a TagNode);
    type IntoIter = indexmap::map::Iter<'a, String, TagNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
