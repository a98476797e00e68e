//! Common types used throughout MarkVault.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// This is the timestamp unit of `dateAdded` / `dateModified`.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Opaque per-folder identifier.
///
/// Assigned lazily the first time a folder is asked for it and stable for the
/// lifetime of the in-memory node. Never persisted and never used as the
/// canonical address of a node; that is what [`IndexPath`] is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(String);

impl FolderId {
    /// Generate a new unique folder identifier.
    pub fn generate() -> Self {
        Self(format!("folder_{}", Uuid::new_v4().simple()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a node in the bookmark tree as a sequence of sibling indices.
///
/// Paths are recomputed positions, not identities: any structural edit that
/// comes earlier in traversal order can make a previously valid path point at
/// a different node, or at nothing. Re-resolve before use.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexPath {
    components: Vec<usize>,
}

impl IndexPath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from index components.
    pub fn from_components(components: Vec<usize>) -> Self {
        Self { components }
    }

    /// Parse a path string into an IndexPath.
    ///
    /// Accepts `/` or `,` as separator. An empty string or `/` is the root.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let trimmed = path.trim().trim_matches(|c| c == '/' || c == ',');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let components = trimmed
            .split(['/', ','])
            .map(|part| {
                part.trim().parse::<usize>().map_err(|_| {
                    crate::Error::InvalidInput(format!("Invalid path component '{}'", part))
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(Self { components })
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of components.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Index of the node within its parent (last component).
    pub fn last(&self) -> Option<usize> {
        self.components.last().copied()
    }

    /// Join this path with a child index.
    pub fn child(&self, index: usize) -> Self {
        let mut components = self.components.clone();
        components.push(index);
        Self { components }
    }

    /// Get the path components.
    pub fn components(&self) -> &[usize] {
        &self.components
    }

    /// Whether `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &IndexPath) -> bool {
        other.components.len() > self.components.len()
            && other.components[..self.components.len()] == self.components[..]
    }

    /// Whether `other` equals `self` or lies inside the subtree rooted at `self`.
    pub fn contains(&self, other: &IndexPath) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Where `self` points after the node at `removed` has been spliced out.
    ///
    /// Returns `None` if `self` was `removed` or lived inside it.
    pub fn after_removal(&self, removed: &IndexPath) -> Option<Self> {
        if removed.contains(self) {
            return None;
        }
        let Some((&removed_index, removed_parent)) = removed.components.split_last() else {
            return Some(self.clone());
        };
        let level = removed_parent.len();
        let mut components = self.components.clone();
        if components.len() > level
            && components[..level] == *removed_parent
            && components[level] > removed_index
        {
            components[level] -= 1;
        }
        Some(Self { components })
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            self.components
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join("/")
        }
    }
}

impl From<Vec<usize>> for IndexPath {
    fn from(components: Vec<usize>) -> Self {
        Self::from_components(components)
    }
}

impl From<&[usize]> for IndexPath {
    fn from(components: &[usize]) -> Self {
        Self::from_components(components.to_vec())
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}
