//! Bookmark tree representation.
//!
//! The tree is an ordered forest of folders and bookmarks addressed by
//! [`IndexPath`]. Sibling order is user order and is preserved through
//! serialization. Every successful mutation bumps [`Tree::version`] exactly
//! once, after the tree is structurally complete; failed mutations leave both
//! the nodes and the version untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use markvault_common::{now_millis, Error, FolderId, IndexPath, Result};

/// A bookmark entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub date_added: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<i64>,
}

impl Bookmark {
    /// Create a bookmark stamped with the current time.
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            date_added: now_millis(),
            date_modified: None,
        }
    }

    /// Case-insensitive substring match against title and URL.
    ///
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.title.to_lowercase().contains(needle)
            || self.url.to_lowercase().contains(needle)
    }
}

/// A folder and its ordered children.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub name: String,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default)]
    pub date_added: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<i64>,
    #[serde(skip)]
    id: OnceLock<FolderId>,
}

impl Folder {
    /// Create an empty folder stamped with the current time.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_children(name, Vec::new())
    }

    /// Create a folder holding `children`.
    pub fn with_children(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            children,
            date_added: now_millis(),
            date_modified: None,
            id: OnceLock::new(),
        }
    }

    /// Opaque identifier, assigned on first request.
    pub fn id(&self) -> &FolderId {
        self.id.get_or_init(FolderId::generate)
    }

    /// Identifier if one has been assigned already.
    pub fn assigned_id(&self) -> Option<&FolderId> {
        self.id.get()
    }
}

// Identity is bookkeeping, not content.
impl PartialEq for Folder {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.children == other.children
            && self.date_added == other.date_added
            && self.date_modified == other.date_modified
    }
}

impl Eq for Folder {}

/// A node of the bookmark tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Bookmark(Bookmark),
    Folder(Folder),
}

impl Node {
    pub fn is_folder(&self) -> bool {
        matches!(self, Node::Folder(_))
    }

    pub fn is_bookmark(&self) -> bool {
        matches!(self, Node::Bookmark(_))
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Node::Folder(folder) => Some(folder),
            Node::Bookmark(_) => None,
        }
    }

    pub fn as_bookmark(&self) -> Option<&Bookmark> {
        match self {
            Node::Bookmark(bookmark) => Some(bookmark),
            Node::Folder(_) => None,
        }
    }

    /// Folder name or bookmark title.
    pub fn label(&self) -> &str {
        match self {
            Node::Bookmark(bookmark) => &bookmark.title,
            Node::Folder(folder) => &folder.name,
        }
    }

    /// Children of a folder; empty for a bookmark.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Folder(folder) => &folder.children,
            Node::Bookmark(_) => &[],
        }
    }

    fn touch(&mut self, at: i64) {
        match self {
            Node::Bookmark(bookmark) => bookmark.date_modified = Some(at),
            Node::Folder(folder) => folder.date_modified = Some(at),
        }
    }
}

impl From<Bookmark> for Node {
    fn from(bookmark: Bookmark) -> Self {
        Node::Bookmark(bookmark)
    }
}

impl From<Folder> for Node {
    fn from(folder: Folder) -> Self {
        Node::Folder(folder)
    }
}

/// Where a moved node lands relative to the destination node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Sibling, immediately before the destination.
    Before,
    /// Sibling, immediately after the destination.
    After,
    /// Last child of the destination folder.
    Inside,
}

impl FromStr for Position {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "before" => Ok(Position::Before),
            "after" => Ok(Position::After),
            "inside" | "into" => Ok(Position::Inside),
            other => Err(Error::InvalidInput(format!(
                "Unknown position '{}'. Use: before, after, or inside",
                other
            ))),
        }
    }
}

/// Subject of counting and listing queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The whole tree.
    #[default]
    All,
    /// Everything below one folder.
    Folder(IndexPath),
}

impl Scope {
    /// Parse `all` (or an empty string) or a folder path.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Scope::All);
        }
        Ok(Scope::from(IndexPath::parse(s)?))
    }
}

impl From<IndexPath> for Scope {
    fn from(path: IndexPath) -> Self {
        if path.is_root() {
            Scope::All
        } else {
            Scope::Folder(path)
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => write!(f, "all"),
            Scope::Folder(path) => write!(f, "{}", path),
        }
    }
}

/// Plaintext document as persisted inside the encrypted blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub folders: Vec<Node>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    folders: &'a [Node],
}

/// Pre-order traversal with an explicit stack, children in stored order.
pub struct PreOrder<'a> {
    stack: Vec<(IndexPath, &'a Node)>,
}

impl<'a> PreOrder<'a> {
    fn new(base: &IndexPath, nodes: &'a [Node]) -> Self {
        let mut walk = Self { stack: Vec::new() };
        walk.push_children(base, nodes);
        walk
    }

    fn push_children(&mut self, base: &IndexPath, nodes: &'a [Node]) {
        for (index, node) in nodes.iter().enumerate().rev() {
            self.stack.push((base.child(index), node));
        }
    }
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = (IndexPath, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, node) = self.stack.pop()?;
        if let Node::Folder(folder) = node {
            self.push_children(&path, &folder.children);
        }
        Some((path, node))
    }
}

fn not_found(path: &IndexPath) -> Error {
    Error::PathNotFound(path.to_string())
}

fn clean_label(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{} cannot be empty", what)));
    }
    Ok(trimmed.to_string())
}

/// Sort, deduplicate and drop paths nested inside another selected path.
fn normalize_selection(paths: &[IndexPath]) -> Vec<IndexPath> {
    let mut sorted = paths.to_vec();
    sorted.sort();
    let mut selection: Vec<IndexPath> = Vec::with_capacity(sorted.len());
    for path in sorted {
        if !selection.iter().any(|kept| kept.contains(&path)) {
            selection.push(path);
        }
    }
    selection
}

/// The bookmark tree of an unlocked session.
#[derive(Debug, Default)]
pub struct Tree {
    roots: Vec<Node>,
    version: u64,
}

impl Tree {
    /// Create a new empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a decrypted document.
    pub fn from_document(document: Document) -> Self {
        Self {
            roots: document.folders,
            version: 0,
        }
    }

    /// Parse the plaintext JSON document.
    ///
    /// # Errors
    /// - `MalformedPersistedData` if the bytes are not a valid document
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let document: Document = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedPersistedData(format!("Invalid bookmark document: {}", e)))?;
        Ok(Self::from_document(document))
    }

    /// Serialize to the plaintext JSON document.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&DocumentRef {
            folders: &self.roots,
        })
        .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Copy of the tree as a document.
    pub fn to_document(&self) -> Document {
        Document {
            folders: self.roots.clone(),
        }
    }

    /// Monotonic mutation counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Top-level nodes.
    pub fn roots(&self) -> &[Node] {
        &self.roots
    }

    /// Whether the tree has no nodes at all.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Pre-order walk over the whole tree.
    pub fn walk(&self) -> PreOrder<'_> {
        PreOrder::new(&IndexPath::root(), &self.roots)
    }

    /// Pre-order walk over everything below the scope's folder.
    ///
    /// # Errors
    /// - `PathNotFound` / `NotAFolder` if the scope does not name a folder
    pub fn walk_scope(&self, scope: &Scope) -> Result<PreOrder<'_>> {
        match scope {
            Scope::All => Ok(self.walk()),
            Scope::Folder(path) => Ok(PreOrder::new(path, self.children_at(path)?)),
        }
    }

    /// Look up the node at `path`.
    ///
    /// # Errors
    /// - `PathNotFound` if any component is out of bounds or descends into
    ///   a bookmark
    pub fn resolve(&self, path: &IndexPath) -> Result<&Node> {
        let (last, prefix) = path
            .components()
            .split_last()
            .ok_or_else(|| not_found(path))?;

        let mut siblings: &[Node] = &self.roots;
        for &index in prefix {
            siblings = match siblings.get(index) {
                Some(Node::Folder(folder)) => &folder.children,
                _ => return Err(not_found(path)),
            };
        }
        siblings.get(*last).ok_or_else(|| not_found(path))
    }

    fn resolve_mut(&mut self, path: &IndexPath) -> Result<&mut Node> {
        let (last, prefix) = path
            .components()
            .split_last()
            .ok_or_else(|| not_found(path))?;

        let mut siblings: &mut Vec<Node> = &mut self.roots;
        for &index in prefix {
            siblings = match siblings.get_mut(index) {
                Some(Node::Folder(folder)) => &mut folder.children,
                _ => return Err(not_found(path)),
            };
        }
        siblings.get_mut(*last).ok_or_else(|| not_found(path))
    }

    /// Children of the folder at `path`, or the roots for the empty path.
    ///
    /// # Errors
    /// - `PathNotFound` if nothing is at `path`
    /// - `NotAFolder` if `path` is a bookmark
    pub fn children_at(&self, path: &IndexPath) -> Result<&[Node]> {
        if path.is_root() {
            return Ok(&self.roots);
        }
        match self.resolve(path)? {
            Node::Folder(folder) => Ok(&folder.children),
            Node::Bookmark(_) => Err(Error::NotAFolder(path.to_string())),
        }
    }

    fn children_at_mut(&mut self, path: &IndexPath) -> Result<&mut Vec<Node>> {
        if path.is_root() {
            return Ok(&mut self.roots);
        }
        match self.resolve_mut(path)? {
            Node::Folder(folder) => Ok(&mut folder.children),
            Node::Bookmark(_) => Err(Error::NotAFolder(path.to_string())),
        }
    }

    /// The sibling sequence holding the node at `path`.
    ///
    /// Falls back to the roots when `path` is empty or its parent does not
    /// resolve to a folder.
    pub fn parent_of(&self, path: &IndexPath) -> &[Node] {
        match path.parent() {
            Some(parent) => self.children_at(&parent).unwrap_or(&self.roots),
            None => &self.roots,
        }
    }

    /// Splice the node at `path` out of its parent. Does not bump the version.
    fn detach(&mut self, path: &IndexPath) -> Result<Node> {
        let (parent, index) = match (path.parent(), path.last()) {
            (Some(parent), Some(index)) => (parent, index),
            _ => return Err(not_found(path)),
        };
        let siblings = self.children_at_mut(&parent).map_err(|_| not_found(path))?;
        if index >= siblings.len() {
            return Err(not_found(path));
        }
        Ok(siblings.remove(index))
    }

    /// Put a detached node back where it came from.
    fn restore(&mut self, path: &IndexPath, node: Node) {
        let (Some(parent), Some(index)) = (path.parent(), path.last()) else {
            return;
        };
        if let Ok(siblings) = self.children_at_mut(&parent) {
            let index = index.min(siblings.len());
            siblings.insert(index, node);
        }
    }

    /// Append `node` to the folder at `parent` (or to the roots).
    ///
    /// # Returns
    /// The path of the inserted node.
    ///
    /// # Errors
    /// - `PathNotFound` if `parent` does not resolve
    /// - `NotAFolder` if `parent` is a bookmark
    pub fn insert(&mut self, parent: &IndexPath, node: Node) -> Result<IndexPath> {
        let siblings = self.children_at_mut(parent)?;
        siblings.push(node);
        let index = siblings.len() - 1;
        self.bump();
        Ok(parent.child(index))
    }

    /// Append several nodes to the roots in one mutation.
    pub fn append_roots(&mut self, nodes: Vec<Node>) -> usize {
        let count = nodes.len();
        if count > 0 {
            self.roots.extend(nodes);
            self.bump();
        }
        count
    }

    /// Rename a folder or retitle a bookmark.
    ///
    /// # Errors
    /// - `PathNotFound` if nothing is at `path`
    /// - `InvalidInput` if the new name is blank
    pub fn rename(&mut self, path: &IndexPath, name: &str) -> Result<()> {
        let name = clean_label(name, "Name")?;
        match self.resolve_mut(path)? {
            Node::Folder(folder) => {
                folder.name = name;
                folder.date_modified = Some(now_millis());
            }
            Node::Bookmark(bookmark) => {
                bookmark.title = name;
                bookmark.date_modified = Some(now_millis());
            }
        }
        self.bump();
        Ok(())
    }

    /// Replace a bookmark's title and URL.
    ///
    /// # Errors
    /// - `PathNotFound` if nothing is at `path`
    /// - `InvalidInput` if `path` is a folder or a field is blank
    pub fn update_bookmark(&mut self, path: &IndexPath, title: &str, url: &str) -> Result<()> {
        let title = clean_label(title, "Title")?;
        let url = clean_label(url, "URL")?;
        match self.resolve_mut(path)? {
            Node::Bookmark(bookmark) => {
                bookmark.title = title;
                bookmark.url = url;
                bookmark.date_modified = Some(now_millis());
            }
            Node::Folder(_) => {
                return Err(Error::InvalidInput(format!("{} is a folder", path)));
            }
        }
        self.bump();
        Ok(())
    }

    /// Remove and return the node at `path`.
    ///
    /// # Errors
    /// - `PathNotFound` if nothing is at `path`
    pub fn remove(&mut self, path: &IndexPath) -> Result<Node> {
        let node = self.detach(path)?;
        self.bump();
        Ok(node)
    }

    /// Remove several nodes in one mutation.
    ///
    /// Paths nested inside another selected path go with their ancestor.
    /// Nothing is removed unless every path resolves.
    ///
    /// # Returns
    /// Number of top-most nodes removed.
    pub fn remove_many(&mut self, paths: &[IndexPath]) -> Result<usize> {
        let selection = normalize_selection(paths);
        if selection.is_empty() {
            return Ok(0);
        }
        for path in &selection {
            self.resolve(path)?;
        }

        // Later paths first: removing one never shifts an earlier one.
        for path in selection.iter().rev() {
            self.detach(path)?;
        }
        self.bump();
        Ok(selection.len())
    }

    /// Move the node at `source` relative to `destination`.
    ///
    /// `Inside` with an empty destination appends to the roots.
    ///
    /// # Returns
    /// The node's new path.
    ///
    /// # Errors
    /// - `PathNotFound` if either path does not resolve
    /// - `InvalidMove` if the destination lies in the source's own subtree,
    ///   `Inside` targets a bookmark, or `Before`/`After` targets the root
    pub fn move_node(
        &mut self,
        source: &IndexPath,
        destination: &IndexPath,
        position: Position,
    ) -> Result<IndexPath> {
        self.resolve(source)?;

        let (parent, index) = match position {
            Position::Inside => {
                if !destination.is_root() && !self.resolve(destination)?.is_folder() {
                    return Err(Error::InvalidMove(format!(
                        "{} is not a folder",
                        destination
                    )));
                }
                if source.contains(destination) {
                    return Err(Error::InvalidMove(format!(
                        "cannot move {} into itself or its own subtree",
                        source
                    )));
                }
                (destination.clone(), None)
            }
            Position::Before | Position::After => {
                let (Some(parent), Some(index)) = (destination.parent(), destination.last())
                else {
                    return Err(Error::InvalidMove("the root has no siblings".to_string()));
                };
                self.resolve(destination)?;
                if source == destination {
                    return Err(Error::InvalidMove(format!(
                        "cannot move {} relative to itself",
                        source
                    )));
                }
                if source.is_ancestor_of(destination) {
                    return Err(Error::InvalidMove(format!(
                        "cannot move {} into its own subtree",
                        source
                    )));
                }
                let index = if position == Position::After {
                    index + 1
                } else {
                    index
                };
                (parent, Some(index))
            }
        };

        // Coordinates after the source has been spliced out.
        let target_parent = parent.after_removal(source).ok_or_else(|| {
            Error::InvalidMove(format!("cannot move {} into its own subtree", source))
        })?;
        let index = index.map(|index| {
            let same_parent = source.parent().as_ref() == Some(&parent);
            match source.last() {
                Some(from) if same_parent && from < index => index - 1,
                _ => index,
            }
        });

        let mut node = self.detach(source)?;
        let len = match self.children_at(&target_parent) {
            Ok(children) => children.len(),
            Err(e) => {
                self.restore(source, node);
                return Err(e);
            }
        };
        let index = index.unwrap_or(len).min(len);

        node.touch(now_millis());
        self.children_at_mut(&target_parent)?.insert(index, node);
        self.bump();
        Ok(target_parent.child(index))
    }

    /// Move several nodes to the end of one folder, keeping their pre-order.
    ///
    /// Nothing is moved unless every path resolves and none of them contains
    /// the destination.
    ///
    /// # Returns
    /// Number of top-most nodes moved.
    pub fn move_many(&mut self, paths: &[IndexPath], folder: &IndexPath) -> Result<usize> {
        let selection = normalize_selection(paths);
        if selection.is_empty() {
            return Ok(0);
        }
        self.children_at(folder)?;
        for path in &selection {
            self.resolve(path)?;
            if path.contains(folder) {
                return Err(Error::InvalidMove(format!(
                    "cannot move {} into itself or its own subtree",
                    path
                )));
            }
        }

        let mut target = folder.clone();
        for path in selection.iter().rev() {
            target = target.after_removal(path).ok_or_else(|| {
                Error::InvalidMove(format!("cannot move {} into its own subtree", path))
            })?;
        }

        let now = now_millis();
        let mut nodes = Vec::with_capacity(selection.len());
        for path in selection.iter().rev() {
            let mut node = self.detach(path)?;
            node.touch(now);
            nodes.push(node);
        }
        nodes.reverse();

        let count = nodes.len();
        self.children_at_mut(&target)?.extend(nodes);
        self.bump();
        Ok(count)
    }

    /// Number of bookmarks in the scope, at any depth.
    pub fn count_bookmarks(&self, scope: &Scope) -> Result<usize> {
        Ok(self
            .walk_scope(scope)?
            .filter(|(_, node)| node.is_bookmark())
            .count())
    }

    /// Number of folders below `path` (the whole tree for the empty path).
    pub fn count_folders(&self, path: &IndexPath) -> Result<usize> {
        Ok(self
            .walk_scope(&Scope::from(path.clone()))?
            .filter(|(_, node)| node.is_folder())
            .count())
    }

    /// All bookmarks in the scope, in pre-order.
    pub fn bookmarks(&self, scope: &Scope) -> Result<Vec<&Bookmark>> {
        Ok(self
            .walk_scope(scope)?
            .filter_map(|(_, node)| node.as_bookmark())
            .collect())
    }

    /// Bookmarks in the scope whose title or URL contains `query`,
    /// ignoring case. A blank query matches everything.
    pub fn search(&self, query: &str, scope: &Scope) -> Result<Vec<Bookmark>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .walk_scope(scope)?
            .filter_map(|(_, node)| node.as_bookmark())
            .filter(|bookmark| bookmark.matches(&needle))
            .cloned()
            .collect())
    }

    /// Path of the first node, in pre-order, satisfying `predicate`.
    pub fn find_path<F>(&self, mut predicate: F) -> Option<IndexPath>
    where
        F: FnMut(&Node) -> bool,
    {
        self.walk()
            .find(|(_, node)| predicate(node))
            .map(|(path, _)| path)
    }

    /// Current path of the folder carrying `id`.
    pub fn find_folder(&self, id: &FolderId) -> Option<IndexPath> {
        self.find_path(|node| {
            node.as_folder()
                .and_then(Folder::assigned_id)
                .is_some_and(|assigned| assigned == id)
        })
    }

    /// Identifier of the folder at `path`, assigning one if needed.
    ///
    /// # Errors
    /// - `PathNotFound` if nothing is at `path`
    /// - `NotAFolder` if `path` is a bookmark
    pub fn folder_id(&self, path: &IndexPath) -> Result<FolderId> {
        match self.resolve(path)? {
            Node::Folder(folder) => Ok(folder.id().clone()),
            Node::Bookmark(_) => Err(Error::NotAFolder(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(components: &[usize]) -> IndexPath {
        IndexPath::from(components)
    }

    fn bookmark(title: &str) -> Node {
        Node::Bookmark(Bookmark::new(title, format!("https://{}.example.com", title)))
    }

    fn folder(name: &str, children: Vec<Node>) -> Node {
        Node::Folder(Folder::with_children(name, children))
    }

    /// ```text
    /// 0 Work
    ///   0/0 docs (bm)
    ///   0/1 Projects
    ///     0/1/0 alpha (bm)
    ///     0/1/1 beta (bm)
    ///   0/2 wiki (bm)
    /// 1 Personal
    ///   1/0 news (bm)
    /// 2 loose (bm)
    /// ```
    fn sample() -> Tree {
        Tree::from_document(Document {
            folders: vec![
                folder(
                    "Work",
                    vec![
                        bookmark("docs"),
                        folder("Projects", vec![bookmark("alpha"), bookmark("beta")]),
                        bookmark("wiki"),
                    ],
                ),
                folder("Personal", vec![bookmark("news")]),
                bookmark("loose"),
            ],
        })
    }

    fn label_at(tree: &Tree, path: &[usize]) -> String {
        tree.resolve(&p(path)).unwrap().label().to_string()
    }

    #[test]
    fn test_resolve() {
        let tree = sample();
        assert_eq!(label_at(&tree, &[0]), "Work");
        assert_eq!(label_at(&tree, &[0, 1, 1]), "beta");
        assert_eq!(label_at(&tree, &[2]), "loose");
    }

    #[test]
    fn test_resolve_rejects_stale_paths() {
        let tree = sample();
        assert!(matches!(tree.resolve(&p(&[3])), Err(Error::PathNotFound(_))));
        assert!(matches!(tree.resolve(&p(&[0, 3])), Err(Error::PathNotFound(_))));
        // Descending through a bookmark.
        assert!(matches!(tree.resolve(&p(&[2, 0])), Err(Error::PathNotFound(_))));
        assert!(tree.resolve(&IndexPath::root()).is_err());
    }

    #[test]
    fn test_parent_of() {
        let tree = sample();
        assert_eq!(tree.parent_of(&p(&[0, 1, 0])).len(), 2);
        assert_eq!(tree.parent_of(&p(&[0, 2])).len(), 3);
        assert_eq!(tree.parent_of(&IndexPath::root()).len(), 3);
        // Invalid parent falls back to the roots.
        assert_eq!(tree.parent_of(&p(&[9, 0])).len(), 3);
    }

    #[test]
    fn test_insert_appends() {
        let mut tree = sample();
        let path = tree.insert(&p(&[1]), bookmark("mail")).unwrap();
        assert_eq!(path, p(&[1, 1]));
        assert_eq!(label_at(&tree, &[1, 1]), "mail");

        let root_path = tree.insert(&IndexPath::root(), folder("New", vec![])).unwrap();
        assert_eq!(root_path, p(&[3]));
        assert_eq!(tree.version(), 2);
    }

    #[test]
    fn test_insert_into_bookmark_fails() {
        let mut tree = sample();
        let result = tree.insert(&p(&[2]), bookmark("x"));
        assert!(matches!(result, Err(Error::NotAFolder(_))));
        assert_eq!(tree.version(), 0);
    }

    #[test]
    fn test_rename() {
        let mut tree = sample();
        tree.rename(&p(&[0]), "  Office ").unwrap();
        tree.rename(&p(&[2]), "Loose end").unwrap();

        assert_eq!(label_at(&tree, &[0]), "Office");
        assert_eq!(label_at(&tree, &[2]), "Loose end");
        assert_eq!(tree.version(), 2);

        assert!(tree.rename(&p(&[0]), "   ").is_err());
        assert_eq!(tree.version(), 2);
    }

    #[test]
    fn test_update_bookmark() {
        let mut tree = sample();
        tree.update_bookmark(&p(&[2]), "Rust", "https://rust-lang.org")
            .unwrap();

        let node = tree.resolve(&p(&[2])).unwrap().as_bookmark().unwrap();
        assert_eq!(node.url, "https://rust-lang.org");
        assert!(node.date_modified.is_some());

        assert!(tree.update_bookmark(&p(&[0]), "x", "y").is_err());
    }

    #[test]
    fn test_remove() {
        let mut tree = sample();
        let removed = tree.remove(&p(&[0, 1])).unwrap();

        assert_eq!(removed.label(), "Projects");
        assert_eq!(label_at(&tree, &[0, 1]), "wiki");
        assert_eq!(tree.version(), 1);

        assert!(matches!(tree.remove(&p(&[7])), Err(Error::PathNotFound(_))));
        assert!(tree.remove(&IndexPath::root()).is_err());
        assert_eq!(tree.version(), 1);
    }

    #[test]
    fn test_move_within_same_parent_forward() {
        let mut tree = sample();
        // docs after wiki: removing docs shifts wiki from 2 to 1.
        let new_path = tree
            .move_node(&p(&[0, 0]), &p(&[0, 2]), Position::After)
            .unwrap();

        assert_eq!(new_path, p(&[0, 2]));
        assert_eq!(label_at(&tree, &[0, 0]), "Projects");
        assert_eq!(label_at(&tree, &[0, 1]), "wiki");
        assert_eq!(label_at(&tree, &[0, 2]), "docs");
    }

    #[test]
    fn test_move_within_same_parent_backward() {
        let mut tree = sample();
        let new_path = tree
            .move_node(&p(&[0, 2]), &p(&[0, 0]), Position::Before)
            .unwrap();

        assert_eq!(new_path, p(&[0, 0]));
        assert_eq!(label_at(&tree, &[0, 0]), "wiki");
        assert_eq!(label_at(&tree, &[0, 1]), "docs");
    }

    #[test]
    fn test_move_before_next_sibling_is_noop_position() {
        let mut tree = sample();
        let new_path = tree
            .move_node(&p(&[0, 0]), &p(&[0, 1]), Position::Before)
            .unwrap();
        assert_eq!(new_path, p(&[0, 0]));
        assert_eq!(label_at(&tree, &[0, 0]), "docs");
    }

    #[test]
    fn test_move_inside_folder_across_levels() {
        let mut tree = sample();
        // Work (0) moves inside Personal (1): Personal shifts to 0.
        let new_path = tree
            .move_node(&p(&[0]), &p(&[1]), Position::Inside)
            .unwrap();

        assert_eq!(new_path, p(&[0, 1]));
        assert_eq!(label_at(&tree, &[0]), "Personal");
        assert_eq!(label_at(&tree, &[0, 1]), "Work");
        assert_eq!(label_at(&tree, &[0, 1, 1, 0]), "alpha");
        assert!(tree.resolve(&new_path).unwrap().as_folder().unwrap().date_modified.is_some());
    }

    #[test]
    fn test_move_to_root() {
        let mut tree = sample();
        let new_path = tree
            .move_node(&p(&[0, 1, 0]), &IndexPath::root(), Position::Inside)
            .unwrap();
        assert_eq!(new_path, p(&[3]));
        assert_eq!(label_at(&tree, &[3]), "alpha");
    }

    #[test]
    fn test_move_into_own_subtree_fails() {
        let mut tree = sample();
        let before = tree.to_document();

        for (dst, pos) in [
            (p(&[0]), Position::Inside),
            (p(&[0, 1]), Position::Inside),
            (p(&[0, 1, 0]), Position::Before),
            (p(&[0, 2]), Position::After),
        ] {
            let result = tree.move_node(&p(&[0]), &dst, pos);
            assert!(matches!(result, Err(Error::InvalidMove(_))), "{:?}", dst);
        }
        assert_eq!(tree.to_document(), before);
        assert_eq!(tree.version(), 0);
    }

    #[test]
    fn test_move_inside_bookmark_fails() {
        let mut tree = sample();
        let result = tree.move_node(&p(&[1]), &p(&[2]), Position::Inside);
        assert!(matches!(result, Err(Error::InvalidMove(_))));
    }

    #[test]
    fn test_move_relative_to_self_or_root_fails() {
        let mut tree = sample();
        assert!(tree.move_node(&p(&[2]), &p(&[2]), Position::Before).is_err());
        assert!(tree
            .move_node(&p(&[2]), &IndexPath::root(), Position::After)
            .is_err());
        assert!(matches!(
            tree.move_node(&p(&[5]), &p(&[0]), Position::Inside),
            Err(Error::PathNotFound(_))
        ));
    }

    #[test]
    fn test_move_path_consistency() {
        let mut tree = sample();
        let moved_before = tree.resolve(&p(&[0, 1, 1])).unwrap().clone();

        let new_path = tree
            .move_node(&p(&[0, 1, 1]), &p(&[1, 0]), Position::Before)
            .unwrap();

        let moved_after = tree.resolve(&new_path).unwrap();
        assert_eq!(moved_after.label(), moved_before.label());
        // Old path now holds nothing.
        assert!(tree.resolve(&p(&[0, 1, 1])).is_err());
    }

    #[test]
    fn test_counts() {
        let tree = sample();
        assert_eq!(tree.count_bookmarks(&Scope::All).unwrap(), 6);
        assert_eq!(tree.count_bookmarks(&Scope::Folder(p(&[0]))).unwrap(), 4);
        assert_eq!(tree.count_bookmarks(&Scope::Folder(p(&[0, 1]))).unwrap(), 2);
        assert_eq!(tree.count_folders(&IndexPath::root()).unwrap(), 3);
        assert_eq!(tree.count_folders(&p(&[0])).unwrap(), 1);
        assert!(matches!(
            tree.count_bookmarks(&Scope::Folder(p(&[2]))),
            Err(Error::NotAFolder(_))
        ));
    }

    #[test]
    fn test_walk_is_preorder() {
        let tree = sample();
        let labels: Vec<&str> = tree.walk().map(|(_, node)| node.label()).collect();
        assert_eq!(
            labels,
            vec!["Work", "docs", "Projects", "alpha", "beta", "wiki", "Personal", "news", "loose"]
        );
    }

    #[test]
    fn test_find_path_first_match_wins() {
        let mut tree = sample();
        tree.insert(&p(&[1]), bookmark("alpha")).unwrap();

        let found = tree.find_path(|node| node.label() == "alpha");
        assert_eq!(found, Some(p(&[0, 1, 0])));
        assert_eq!(tree.find_path(|node| node.label() == "nope"), None);
    }

    #[test]
    fn test_search_case_insensitive() {
        let tree = sample();
        let hits = tree.search("ALPHA", &Scope::All).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "alpha");

        // URL match.
        let hits = tree.search("news.example", &Scope::All).unwrap();
        assert_eq!(hits.len(), 1);

        // Scoped.
        let hits = tree.search("example", &Scope::Folder(p(&[0, 1]))).unwrap();
        assert_eq!(hits.len(), 2);

        // Blank query lists everything in scope.
        assert_eq!(tree.search("  ", &Scope::All).unwrap().len(), 6);
    }

    #[test]
    fn test_remove_many() {
        let mut tree = sample();
        // Nested selection collapses into its ancestor.
        let removed = tree
            .remove_many(&[p(&[2]), p(&[0, 1]), p(&[0, 1, 0]), p(&[0, 0])])
            .unwrap();

        assert_eq!(removed, 3);
        assert_eq!(tree.version(), 1);
        assert_eq!(tree.roots().len(), 2);
        assert_eq!(label_at(&tree, &[0, 0]), "wiki");
    }

    #[test]
    fn test_remove_many_is_atomic() {
        let mut tree = sample();
        let result = tree.remove_many(&[p(&[0, 0]), p(&[9])]);

        assert!(result.is_err());
        assert_eq!(label_at(&tree, &[0, 0]), "docs");
        assert_eq!(tree.version(), 0);
    }

    #[test]
    fn test_move_many_into_folder() {
        let mut tree = sample();
        // docs (0/0) and loose (2) into Personal (1), which stays at 1.
        let moved = tree.move_many(&[p(&[2]), p(&[0, 0])], &p(&[1])).unwrap();

        assert_eq!(moved, 2);
        assert_eq!(tree.version(), 1);
        let personal: Vec<&str> = tree
            .children_at(&p(&[1]))
            .unwrap()
            .iter()
            .map(Node::label)
            .collect();
        assert_eq!(personal, vec!["news", "docs", "loose"]);
    }

    #[test]
    fn test_move_many_target_shifts() {
        let mut tree = sample();
        // Removing Work (0) shifts Personal from 1 to 0.
        tree.move_many(&[p(&[0])], &p(&[1])).unwrap();
        assert_eq!(label_at(&tree, &[0]), "Personal");
        assert_eq!(label_at(&tree, &[0, 1]), "Work");
    }

    #[test]
    fn test_move_many_rejects_cycles() {
        let mut tree = sample();
        let result = tree.move_many(&[p(&[0])], &p(&[0, 1]));
        assert!(matches!(result, Err(Error::InvalidMove(_))));
        assert_eq!(tree.version(), 0);
    }

    #[test]
    fn test_folder_ids_are_stable_and_findable() {
        let mut tree = sample();
        let id = tree.folder_id(&p(&[1])).unwrap();
        assert_eq!(tree.folder_id(&p(&[1])).unwrap(), id);

        tree.move_node(&p(&[1]), &IndexPath::root(), Position::Inside)
            .unwrap();
        assert_eq!(tree.find_folder(&id), Some(p(&[2])));
        assert!(tree.folder_id(&p(&[1])).is_err());
    }

    #[test]
    fn test_json_roundtrip_preserves_order() {
        let tree = sample();
        let json = tree.to_json().unwrap();
        let restored = Tree::from_json(&json).unwrap();

        assert_eq!(restored.to_document(), tree.to_document());
    }

    #[test]
    fn test_json_wire_format() {
        let json = br#"{"folders":[
            {"type":"folder","name":"Work","dateAdded":1,"_id":"folder_x","children":[
                {"type":"bookmark","title":"Ex","url":"https://example.com","dateAdded":2}
            ]},
            {"type":"bookmark","title":"Top","url":"https://top.example","dateAdded":3,"dateModified":4}
        ],"_version":17}"#;

        let tree = Tree::from_json(json).unwrap();
        assert_eq!(tree.count_bookmarks(&Scope::All).unwrap(), 2);
        let top = tree.resolve(&p(&[1])).unwrap().as_bookmark().unwrap();
        assert_eq!(top.date_modified, Some(4));

        let value: serde_json::Value = serde_json::from_slice(&tree.to_json().unwrap()).unwrap();
        assert_eq!(value["folders"][0]["type"], "folder");
        assert_eq!(value["folders"][0]["children"][0]["dateAdded"], 2);
        assert!(value["folders"][0].get("_id").is_none());
        assert!(value["folders"][0]["children"][0].get("dateModified").is_none());
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            Tree::from_json(b"{\"folders\":[{\"type\":\"widget\"}]}"),
            Err(Error::MalformedPersistedData(_))
        ));
        assert!(Tree::from_json(b"not json").is_err());
    }

    #[test]
    fn test_scope_and_position_parse() {
        assert_eq!(Scope::parse("all").unwrap(), Scope::All);
        assert_eq!(Scope::parse("/").unwrap(), Scope::All);
        assert_eq!(Scope::parse("0/1").unwrap(), Scope::Folder(p(&[0, 1])));
        assert_eq!("Inside".parse::<Position>().unwrap(), Position::Inside);
        assert!("sideways".parse::<Position>().is_err());
    }

    fn arb_node() -> impl Strategy<Value = Node> {
        let leaf = ("[a-zA-Z ]{0,12}", "[a-z]{1,8}").prop_map(|(title, host)| {
            Node::Bookmark(Bookmark::new(title, format!("https://{}.com", host)))
        });
        leaf.prop_recursive(4, 48, 5, |inner| {
            ("[a-zA-Z]{1,8}", prop::collection::vec(inner, 0..5))
                .prop_map(|(name, children)| Node::Folder(Folder::with_children(name, children)))
        })
    }

    fn arb_tree() -> impl Strategy<Value = Tree> {
        prop::collection::vec(arb_node(), 0..6)
            .prop_map(|folders| Tree::from_document(Document { folders }))
    }

    proptest! {
        #[test]
        fn prop_json_roundtrip(tree in arb_tree()) {
            let restored = Tree::from_json(&tree.to_json().unwrap()).unwrap();
            prop_assert_eq!(restored.to_document(), tree.to_document());
        }

        #[test]
        fn prop_no_move_into_own_subtree(tree in arb_tree(), pick in any::<prop::sample::Index>()) {
            let pairs: Vec<(IndexPath, IndexPath)> = tree
                .walk()
                .filter(|(_, node)| node.is_folder())
                .flat_map(|(folder_path, _)| {
                    tree.walk()
                        .map(|(path, _)| path)
                        .filter(|path| folder_path.is_ancestor_of(path))
                        .map(|path| (folder_path.clone(), path))
                        .collect::<Vec<_>>()
                })
                .collect();
            prop_assume!(!pairs.is_empty());

            let (folder_path, descendant) = pairs[pick.index(pairs.len())].clone();
            let mut tree = tree;
            let before = tree.to_document();
            let result = tree.move_node(&folder_path, &descendant, Position::Inside);

            prop_assert!(matches!(result, Err(Error::InvalidMove(_))));
            prop_assert_eq!(tree.to_document(), before);
        }

        #[test]
        fn prop_move_lands_at_returned_path(
            tree in arb_tree(),
            src in any::<prop::sample::Index>(),
            dst in any::<prop::sample::Index>(),
            pos in prop_oneof![Just(Position::Before), Just(Position::After), Just(Position::Inside)],
        ) {
            let paths: Vec<IndexPath> = tree.walk().map(|(path, _)| path).collect();
            prop_assume!(!paths.is_empty());
            let source = paths[src.index(paths.len())].clone();
            let destination = paths[dst.index(paths.len())].clone();

            let mut tree = tree;
            let moved = tree.resolve(&source).unwrap().clone();
            let bookmarks = tree.count_bookmarks(&Scope::All).unwrap();
            let version = tree.version();

            match tree.move_node(&source, &destination, pos) {
                Ok(new_path) => {
                    let landed = tree.resolve(&new_path).unwrap();
                    prop_assert_eq!(landed.label(), moved.label());
                    prop_assert_eq!(landed.children(), moved.children());
                    prop_assert_eq!(tree.version(), version + 1);
                }
                Err(e) => {
                    prop_assert!(e.is_structural());
                    prop_assert_eq!(tree.version(), version);
                }
            }
            prop_assert_eq!(tree.count_bookmarks(&Scope::All).unwrap(), bookmarks);
        }
    }
}
