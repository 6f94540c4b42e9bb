use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::metadata::{now_iso, FileMetadata};

/// Placeholder markers for content that is intentionally not held in memory.
/// `size_bytes` on the owning node still reflects the true on-disk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaceholderKind {
    /// File exceeded the load-size threshold.
    LargeFile,
    /// Binary content that could not be preserved.
    Binary,
    /// The file could not be read during hydration.
    ReadError,
}

impl PlaceholderKind {
    pub fn marker(&self) -> &'static str {
        match self {
            PlaceholderKind::LargeFile => "<File Exceeds Size Limit - Content Not Loaded>",
            PlaceholderKind::Binary => "<Binary File - Content Not Loaded>",
            PlaceholderKind::ReadError => "<Error Reading File Content>",
        }
    }
}

/// File content as held by the virtual tree. Text keeps its exact lines,
/// terminators included; archives and small binaries keep raw bytes so a
/// dehydrate can restore them exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileContent {
    Text(Vec<String>),
    #[serde(with = "b64")]
    Binary(Vec<u8>),
    Placeholder(PlaceholderKind),
}

impl FileContent {
    pub fn empty() -> Self {
        FileContent::Text(Vec::new())
    }

    /// Splits text into lines, preserving the original terminators so a
    /// round-trip reproduces the input byte for byte.
    pub fn text_from_str(text: &str) -> Self {
        FileContent::Text(split_keepends(text))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, FileContent::Placeholder(_))
    }

    /// Byte length of the materialized content. Placeholders have no
    /// materializable content and report zero.
    pub fn byte_len(&self) -> u64 {
        match self {
            FileContent::Text(lines) => lines.iter().map(|l| l.len() as u64).sum(),
            FileContent::Binary(bytes) => bytes.len() as u64,
            FileContent::Placeholder(_) => 0,
        }
    }
}

/// Splits a string into lines with their terminators kept, like the lines of
/// a file read in binary mode.
pub fn split_keepends(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            lines.push(text[start..=i].to_string());
            start = i + 1;
        }
    }
    if start < text.len() {
        lines.push(text[start..].to_string());
    }
    lines
}

/// A single file or directory node in the virtual tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    pub is_directory: bool,
    pub content: FileContent,
    pub size_bytes: u64,
    pub last_modified: String,
    pub metadata: FileMetadata,
}

impl FileNode {
    pub fn directory(path: &str) -> Self {
        Self {
            path: path.to_string(),
            is_directory: true,
            content: FileContent::empty(),
            size_bytes: 0,
            last_modified: now_iso(),
            metadata: FileMetadata::default_directory(),
        }
    }

    pub fn file(path: &str, content: FileContent, size_bytes: u64) -> Self {
        Self {
            path: path.to_string(),
            is_directory: false,
            content,
            size_bytes,
            last_modified: now_iso(),
            metadata: FileMetadata::default_file(),
        }
    }
}

/// The in-memory map from normalized absolute path to node. The single source
/// of truth during command execution.
///
/// Inserting a node auto-creates any missing intermediate directory nodes, so
/// the parent-exists invariant holds unconditionally (no orphan files).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualTree {
    nodes: BTreeMap<String, FileNode>,
}

impl VirtualTree {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileNode> {
        self.nodes.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileNode> {
        self.nodes.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// Seeds the workspace root node itself. No ancestors are created:
    /// everything above the workspace root stays outside the tree.
    pub fn insert_root(&mut self, node: FileNode) {
        self.nodes.insert(node.path.clone(), node);
    }

    pub fn insert(&mut self, node: FileNode) {
        let mut parent = parent_of(&node.path);
        while let Some(p) = parent {
            if p == "/" || self.nodes.contains_key(&p) {
                break;
            }
            parent = parent_of(&p);
            self.nodes.insert(p.clone(), FileNode::directory(&p));
        }
        self.nodes.insert(node.path.clone(), node);
    }

    /// Removes a node; for a directory the whole subtree goes with it.
    /// Returns the number of nodes removed.
    pub fn remove(&mut self, path: &str) -> usize {
        let mut removed = 0;
        if self.nodes.remove(path).is_some() {
            removed += 1;
        }
        let prefix = format!("{}/", path);
        let descendants: Vec<String> = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in descendants {
            self.nodes.remove(&key);
            removed += 1;
        }
        removed
    }

    /// Direct children of a directory path, in key order.
    pub fn children(&self, path: &str) -> Vec<&FileNode> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(_, v)| v)
            .collect()
    }

    /// All nodes in key order; parents sort before their children, which is
    /// the ordering dehydration relies on.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileNode)> {
        self.nodes.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

/// Parent path of a normalized absolute path; `None` at the root.
pub fn parent_of(path: &str) -> Option<String> {
    if path == "/" || path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
