//! Conversion of Chromium `Bookmarks` files.
//!
//! Chromium-based browsers keep bookmarks in a JSON file with a `roots`
//! object (`bookmark_bar`, `other`, `synced`). Each root becomes a top-level
//! folder. Folders that end up without any bookmark are dropped.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::tree::{Bookmark, Folder, Node};
use markvault_common::{now_millis, Error, Result};

/// Title of a bookmark with no name.
pub const UNTITLED_BOOKMARK: &str = "Untitled";

/// Name of a folder with no name.
pub const UNNAMED_FOLDER: &str = "Unnamed Folder";

/// Well-known roots, in the order browsers display them.
const ROOT_ORDER: [&str; 3] = ["bookmark_bar", "other", "synced"];

/// Microseconds between 1601-01-01 and 1970-01-01.
const WINDOWS_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

#[derive(Deserialize)]
struct ChromiumFile {
    roots: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct ChromiumNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    children: Option<Vec<ChromiumNode>>,
    #[serde(default)]
    date_added: Option<Value>,
}

impl ChromiumNode {
    fn label(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.title.as_deref())
            .map(str::trim)
            .filter(|label| !label.is_empty())
    }

    /// `date_added` in Unix milliseconds, if present and sane.
    fn added_millis(&self) -> Option<i64> {
        let micros = match self.date_added.as_ref()? {
            Value::String(s) => s.parse::<i64>().ok()?,
            Value::Number(n) => n.as_i64()?,
            _ => return None,
        };
        let unix_millis = micros.checked_sub(WINDOWS_EPOCH_OFFSET_MICROS)? / 1000;
        (unix_millis > 0).then_some(unix_millis)
    }

    fn into_node(self) -> Option<Node> {
        let date_added = self.added_millis().unwrap_or_else(now_millis);
        let is_url = self.kind.as_deref() == Some("url") || self.url.is_some();

        if is_url {
            let url = self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
            let mut bookmark = Bookmark::new(
                self.label().unwrap_or(UNTITLED_BOOKMARK),
                url,
            );
            bookmark.date_added = date_added;
            return Some(Node::Bookmark(bookmark));
        }

        let name = self.label().unwrap_or(UNNAMED_FOLDER).to_string();
        let children: Vec<Node> = self
            .children?
            .into_iter()
            .filter_map(ChromiumNode::into_node)
            .collect();
        if children.is_empty() {
            return None;
        }

        let mut folder = Folder::with_children(name, children);
        folder.date_added = date_added;
        Some(Node::Folder(folder))
    }
}

/// Convert a Chromium `Bookmarks` file into top-level nodes.
///
/// # Errors
/// - `InvalidInput` if the bytes are not a Chromium bookmarks file
pub fn convert_chromium(bytes: &[u8]) -> Result<Vec<Node>> {
    let file: ChromiumFile = serde_json::from_slice(bytes)
        .map_err(|e| Error::InvalidInput(format!("Not a Chromium bookmarks file: {}", e)))?;

    let mut roots = file.roots;
    let mut ordered: Vec<Value> = ROOT_ORDER
        .iter()
        .filter_map(|name| roots.remove(*name))
        .collect();
    ordered.extend(roots.into_values());

    Ok(ordered
        .into_iter()
        .filter_map(|value| serde_json::from_value::<ChromiumNode>(value).ok())
        .filter_map(ChromiumNode::into_node)
        .collect())
}
