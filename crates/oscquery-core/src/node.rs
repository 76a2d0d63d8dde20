//! A single addressable element of the OSCQuery namespace.
//!
//! Nodes are shared as `Arc<OscNode>` between the tree's hierarchy and its
//! flat path index. Descriptive metadata is fixed at construction; only the
//! value and the child map change afterwards, each behind its own lock so a
//! reader serializing the tree never observes a half-linked child.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::attributes::{self, Access};
use crate::value::OscValue;

/// Produces a node's current value on demand.
pub type ValueProvider = Arc<dyn Fn() -> Vec<OscValue> + Send + Sync>;

/// Where a node's value comes from.
///
/// A `Dynamic` value is resolved every time the node is serialized, so a
/// producer can expose a live reading without writing into the tree.
#[derive(Clone)]
pub enum NodeValue {
    Static(Vec<OscValue>),
    Dynamic(ValueProvider),
}

impl NodeValue {
    pub fn resolve(&self) -> Vec<OscValue> {
        match self {
            NodeValue::Static(v) => v.clone(),
            NodeValue::Dynamic(provider) => provider(),
        }
    }
}

impl fmt::Debug for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Static(v) => f.debug_tuple("Static").field(v).finish(),
            NodeValue::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Bounds for one slot of a node's value tuple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OscRange {
    #[serde(rename = "MIN", default, skip_serializing_if = "Option::is_none")]
    pub min: Option<OscValue>,

    #[serde(rename = "MAX", default, skip_serializing_if = "Option::is_none")]
    pub max: Option<OscValue>,

    #[serde(rename = "VALS", default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<OscValue>>,
}

/// One node of the namespace.
pub struct OscNode {
    full_path: String,
    description: Option<String>,
    access: Access,
    osc_type: Option<String>,
    range: Option<Vec<OscRange>>,
    value: RwLock<Option<NodeValue>>,
    contents: RwLock<BTreeMap<String, Arc<OscNode>>>,
}

impl OscNode {
    /// An empty node at `full_path`: no type, no value, no access.
    pub fn new(full_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            description: None,
            access: Access::NoValue,
            osc_type: None,
            range: None,
            value: RwLock::new(None),
            contents: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_type(mut self, osc_type: impl Into<String>) -> Self {
        self.osc_type = Some(osc_type.into());
        self
    }

    pub fn with_range(mut self, range: Vec<OscRange>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_value(self, value: Vec<OscValue>) -> Self {
        self.with_node_value(NodeValue::Static(value))
    }

    pub fn with_provider<F>(self, provider: F) -> Self
    where
        F: Fn() -> Vec<OscValue> + Send + Sync + 'static,
    {
        self.with_node_value(NodeValue::Dynamic(Arc::new(provider)))
    }

    pub fn with_node_value(mut self, value: NodeValue) -> Self {
        *self.value.get_mut().unwrap_or_else(|e| e.into_inner()) = Some(value);
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn osc_type(&self) -> Option<&str> {
        self.osc_type.as_deref()
    }

    pub fn range(&self) -> Option<&[OscRange]> {
        self.range.as_deref()
    }

    /// Everything up to the last `/`. The root is its own parent.
    pub fn parent_path(&self) -> &str {
        parent_path(&self.full_path)
    }

    /// Everything after the last `/`. Empty for the root.
    pub fn name(&self) -> &str {
        node_name(&self.full_path)
    }

    /// Current value, invoking the provider if the value is dynamic.
    pub fn value(&self) -> Option<Vec<OscValue>> {
        // Providers run outside the lock; one may write back into this node.
        let current = self.value.read().unwrap_or_else(|e| e.into_inner()).clone();
        current.as_ref().map(NodeValue::resolve)
    }

    pub fn has_provider(&self) -> bool {
        let guard = self.value.read().unwrap_or_else(|e| e.into_inner());
        matches!(guard.as_ref(), Some(NodeValue::Dynamic(_)))
    }

    /// Replace the stored value. A previously installed provider is dropped.
    pub fn set_value(&self, value: Vec<OscValue>) {
        self.set_node_value(Some(NodeValue::Static(value)));
    }

    pub fn set_node_value(&self, value: Option<NodeValue>) {
        let mut guard = self.value.write().unwrap_or_else(|e| e.into_inner());
        *guard = value;
    }

    pub fn child(&self, name: &str) -> Option<Arc<OscNode>> {
        self.read_contents().get(name).cloned()
    }

    /// Snapshot of the children, keyed by name.
    pub fn children(&self) -> Vec<Arc<OscNode>> {
        self.read_contents().values().cloned().collect()
    }

    pub fn child_count(&self) -> usize {
        self.read_contents().len()
    }

    pub(crate) fn insert_child(&self, name: String, node: Arc<OscNode>) -> Option<Arc<OscNode>> {
        self.contents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, node)
    }

    pub(crate) fn remove_child(&self, name: &str) -> Option<Arc<OscNode>> {
        self.contents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    fn read_contents(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<OscNode>>> {
        self.contents.read().unwrap_or_else(|e| e.into_inner())
    }

    // ── Wire ──────────────────────────────────────────────────────────────────

    /// Full recursive JSON for this node.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// JSON for a single attribute of this node.
    ///
    /// Returns `None` for attribute names that cannot be queried individually.
    pub fn attribute_json(&self, attribute: &str) -> Option<serde_json::Value> {
        use serde_json::Value;

        let value = match attribute {
            attributes::VALUE => match self.value() {
                Some(v) => serde_json::to_value(v).unwrap_or(Value::Null),
                None => Value::Null,
            },
            attributes::TYPE => self.osc_type.clone().map(Value::String).unwrap_or(Value::Null),
            attributes::ACCESS => Value::from(self.access.bits()),
            attributes::DESCRIPTION => self
                .description
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            attributes::FULL_PATH => Value::String(self.full_path.clone()),
            _ => return None,
        };
        Some(value)
    }
}

impl fmt::Debug for OscNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OscNode")
            .field("full_path", &self.full_path)
            .field("access", &self.access)
            .field("osc_type", &self.osc_type)
            .field("children", &self.child_count())
            .finish_non_exhaustive()
    }
}

impl Serialize for OscNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(description) = &self.description {
            map.serialize_entry(attributes::DESCRIPTION, description)?;
        }
        map.serialize_entry(attributes::FULL_PATH, &self.full_path)?;
        map.serialize_entry(attributes::ACCESS, &self.access)?;
        {
            let contents = self.read_contents();
            if !contents.is_empty() {
                map.serialize_entry(attributes::CONTENTS, &Contents(&contents))?;
            }
        }
        if let Some(osc_type) = &self.osc_type {
            map.serialize_entry(attributes::TYPE, osc_type)?;
        }
        if let Some(value) = self.value() {
            map.serialize_entry(attributes::VALUE, &value)?;
        }
        if let Some(range) = &self.range {
            map.serialize_entry(attributes::RANGE, range)?;
        }
        map.end()
    }
}

struct Contents<'a>(&'a BTreeMap<String, Arc<OscNode>>);

impl Serialize for Contents<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(name, node)| (name, node.as_ref())))
    }
}

// ── Deserialization ───────────────────────────────────────────────────────────

/// The wire shape of a node, used only for parsing a peer's tree.
#[derive(Debug, Deserialize)]
pub(crate) struct NodeDocument {
    #[serde(rename = "DESCRIPTION", default)]
    description: Option<String>,

    #[serde(rename = "FULL_PATH", default)]
    full_path: String,

    #[serde(rename = "ACCESS", default)]
    access: Access,

    #[serde(rename = "CONTENTS", default)]
    contents: BTreeMap<String, NodeDocument>,

    #[serde(rename = "TYPE", default)]
    osc_type: Option<String>,

    #[serde(rename = "VALUE", default)]
    value: Option<Vec<OscValue>>,

    #[serde(rename = "RANGE", default)]
    range: Option<Vec<OscRange>>,
}

impl From<NodeDocument> for OscNode {
    fn from(doc: NodeDocument) -> Self {
        let contents = doc
            .contents
            .into_iter()
            .map(|(name, child)| (name, Arc::new(OscNode::from(child))))
            .collect();

        Self {
            full_path: doc.full_path,
            description: doc.description,
            access: doc.access,
            osc_type: doc.osc_type,
            range: doc.range,
            value: RwLock::new(doc.value.map(NodeValue::Static)),
            contents: RwLock::new(contents),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Parent of `path`: everything before the last `/`, or `/` at the top level.
pub fn parent_path(path: &str) -> &str {
    let cut = path.rfind('/').unwrap_or(0).max(1).min(path.len());
    &path[..cut]
}

/// Last segment of `path`.
pub fn node_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}
