//! The rooted OSCQuery namespace.
//!
//! Two views of the same nodes:
//!   - the hierarchy, root → CONTENTS → ..., which is authoritative and is
//!     what gets serialized;
//!   - a flat `full_path → node` index giving O(1) exact-match lookup.
//!
//! Every structural mutation goes through this type and updates both views
//! under one writer lock. Readers never take that lock: lookups go to the
//! concurrent index and serialization walks per-node child maps.
//!
//! A tree parsed from the wire carries only the hierarchy, so its index is
//! rebuilt by traversal before it is handed out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::attributes::Access;
use crate::node::{parent_path, NodeDocument, OscNode};

pub const ROOT_PATH: &str = "/";

/// The rooted namespace with its path index.
pub struct OscTree {
    root: Arc<OscNode>,
    index: DashMap<String, Arc<OscNode>>,
    /// Serializes structural writers so hierarchy and index change together.
    writer: Mutex<()>,
}

impl Default for OscTree {
    fn default() -> Self {
        Self::new()
    }
}

impl OscTree {
    /// A tree holding only the root node.
    pub fn new() -> Self {
        let root = OscNode::new(ROOT_PATH)
            .with_access(Access::NoValue)
            .with_description("root node");
        Self::with_root(root)
    }

    fn with_root(root: OscNode) -> Self {
        let root = Arc::new(root);
        let index = DashMap::new();
        index.insert(root_key(&root), root.clone());
        Self {
            root,
            index,
            writer: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Arc<OscNode> {
        &self.root
    }

    /// Exact-path lookup. Never matches a prefix.
    pub fn get(&self, path: &str) -> Option<Arc<OscNode>> {
        self.index.get(path).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Number of indexed paths, root included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.len() <= 1
    }

    /// All indexed paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.index.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Register `node` under its parent, creating empty ancestors as needed.
    ///
    /// Fails if the path is empty, does not start with `/`, or is already
    /// registered. An existing node is never overwritten.
    pub fn add(&self, node: OscNode) -> Result<Arc<OscNode>, TreeError> {
        let path = node.full_path();
        if path.is_empty() || !path.starts_with('/') {
            return Err(TreeError::InvalidPath(path.to_string()));
        }

        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.add_locked(node)
    }

    fn add_locked(&self, node: OscNode) -> Result<Arc<OscNode>, TreeError> {
        let path = node.full_path().to_string();
        if self.index.contains_key(&path) {
            return Err(TreeError::DuplicatePath(path));
        }

        let parent_path = parent_path(&path).to_string();
        let parent = match self.get(&parent_path) {
            Some(parent) => parent,
            None => {
                tracing::trace!(path = %parent_path, "creating placeholder ancestor");
                self.add_locked(OscNode::new(parent_path))?
            }
        };

        let node = Arc::new(node);
        // Link into the hierarchy first so an index hit is always reachable.
        parent.insert_child(node.name().to_string(), node.clone());
        self.index.insert(path, node.clone());
        Ok(node)
    }

    /// Unlink the node at `path` from its parent and from the index.
    ///
    /// Descendants are not removed: they stay in the index, reachable by
    /// exact lookup but no longer by walking from the root. A call to
    /// [`OscTree::rebuild_index`] drops them.
    pub fn remove(&self, path: &str) -> bool {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let Some(node) = self.get(path) else {
            return false;
        };
        let Some(parent) = self.get(node.parent_path()) else {
            return false;
        };
        if parent.child(node.name()).is_none() {
            return false;
        }

        parent.remove_child(node.name());
        self.index.remove(path);
        true
    }

    /// Regenerate the index from the hierarchy.
    ///
    /// Afterwards the index keys are exactly the paths reachable from the
    /// root. Entries that stay valid are never dropped mid-rebuild, so
    /// concurrent lookups of live paths keep hitting.
    pub fn rebuild_index(&self) {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let mut reachable: HashMap<String, Arc<OscNode>> = HashMap::new();
        reachable.insert(root_key(&self.root), self.root.clone());
        collect_descendants(&self.root, &mut reachable);

        self.index.retain(|path, _| reachable.contains_key(path));
        for (path, node) in reachable {
            self.index.insert(path, node);
        }
    }

    /// Full tree JSON, as served for a request on `/`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        self.root.to_json()
    }

    /// Parse a peer's tree and build its index.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let doc: NodeDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(doc))
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        let doc: NodeDocument = serde_json::from_slice(bytes)?;
        Ok(Self::from_document(doc))
    }

    fn from_document(doc: NodeDocument) -> Self {
        let tree = Self::with_root(OscNode::from(doc));
        tree.rebuild_index();
        tree
    }
}

/// A fetched subtree is rooted at its own path rather than `/`.
fn root_key(root: &OscNode) -> String {
    match root.full_path() {
        "" => ROOT_PATH.to_string(),
        path => path.to_string(),
    }
}

fn collect_descendants(node: &Arc<OscNode>, out: &mut HashMap<String, Arc<OscNode>>) {
    for child in node.children() {
        out.insert(child.full_path().to_string(), child.clone());
        collect_descendants(&child, out);
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("OSC path must start with '/': {0:?}")]
    InvalidPath(String),

    #[error("OSC path already registered: {0}")]
    DuplicatePath(String),
}
