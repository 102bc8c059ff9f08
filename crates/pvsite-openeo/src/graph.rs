//! openEO process graphs as plain data
//!
//! A process graph is a flat map of node id to process invocation. Arguments are JSON values in
//! which `{"from_node": id}` references the output of another node, `{"from_parameter": name}`
//! references a parameter of the enclosing process and `{"process_graph": {...}}` passes a child
//! graph as a callback. Graphs are built locally and only serialised when submitted, so they can
//! be inspected in tests without a backend.

use pvsite_core::error::{PvsiteError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// One process invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessNode {
    pub process_id: String,
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
}

impl ProcessNode {
    pub fn is_result(&self) -> bool {
        self.result.unwrap_or(false)
    }
}

/// A complete graph with exactly one result node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessGraph {
    nodes: BTreeMap<String, ProcessNode>,
}

impl ProcessGraph {
    pub fn nodes(&self) -> &BTreeMap<String, ProcessNode> {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&ProcessNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Id of the node flagged as result
    pub fn result_node(&self) -> Option<&str> {
        self.nodes.iter().find(|(_, node)| node.is_result()).map(|(id, _)| id.as_str())
    }

    /// Nodes running the given process, in id order
    pub fn nodes_with_process<'a>(
        &'a self,
        process_id: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a ProcessNode)> + 'a {
        self.nodes.iter().filter(move |(_, node)| node.process_id == process_id)
    }

    /// Check that there is exactly one result node and that every `from_node` reference
    /// points at a node of the same graph. Callback graphs are checked recursively.
    pub fn validate(&self) -> Result<()> {
        let results = self.nodes.values().filter(|node| node.is_result()).count();
        if results != 1 {
            return Err(PvsiteError::Serialization(format!(
                "Process graph must have exactly one result node, found {}",
                results
            )));
        }

        for (id, node) in &self.nodes {
            for value in node.arguments.values() {
                self.check_references(id, value)?;
            }
        }
        Ok(())
    }

    fn check_references(&self, node_id: &str, value: &Value) -> Result<()> {
        match value {
            Value::Object(map) => {
                if let Some(target) = map.get("from_node").and_then(Value::as_str) {
                    if !self.nodes.contains_key(target) {
                        return Err(PvsiteError::Serialization(format!(
                            "Node {} references unknown node {}",
                            node_id, target
                        )));
                    }
                    return Ok(());
                }
                if let Some(child) = map.get("process_graph") {
                    let child: ProcessGraph = serde_json::from_value(child.clone())?;
                    return child.validate();
                }
                map.values().try_for_each(|v| self.check_references(node_id, v))
            }
            Value::Array(items) => items.iter().try_for_each(|v| self.check_references(node_id, v)),
            _ => Ok(()),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Handle to a node added to a [`GraphBuilder`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef(String);

impl NodeRef {
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Argument value referencing this node's output
    pub fn output(&self) -> Value {
        json!({ "from_node": self.0 })
    }
}

impl From<&NodeRef> for Value {
    fn from(node: &NodeRef) -> Self {
        node.output()
    }
}

/// Argument value referencing a parameter of the enclosing process or callback
pub fn from_parameter(name: &str) -> Value {
    json!({ "from_parameter": name })
}

/// Argument value passing a child graph as callback
pub fn callback(graph: ProcessGraph) -> Value {
    json!({ "process_graph": graph })
}

/// Incremental builder that assigns node ids the way the openEO clients do
/// (`loadcollection1`, `reducedimension2`, ...)
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: BTreeMap<String, ProcessNode>,
    counters: HashMap<String, usize>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a process invocation. `arguments` must be a JSON object.
    pub fn add(&mut self, process_id: &str, arguments: Value) -> NodeRef {
        let prefix: String = process_id.chars().filter(|c| *c != '_').collect();
        let counter = self.counters.entry(prefix.clone()).or_insert(0);
        *counter += 1;
        let id = format!("{}{}", prefix, counter);

        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };

        self.nodes.insert(
            id.clone(),
            ProcessNode {
                process_id: process_id.to_string(),
                arguments,
                description: None,
                result: None,
            },
        );
        NodeRef(id)
    }

    /// Close the graph with `result` as its result node
    pub fn finish(mut self, result: &NodeRef) -> ProcessGraph {
        if let Some(node) = self.nodes.get_mut(result.id()) {
            node.result = Some(true);
        }
        ProcessGraph { nodes: self.nodes }
    }
}

/// A parameter of a user-defined process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessParameter {
    pub name: String,
    pub description: String,
    pub schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl ProcessParameter {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            default: None,
            optional: None,
        }
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>, default: i64) -> Self {
        Self::new(name, description, json!({ "type": "integer" })).with_default(json!(default))
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>, default: &str) -> Self {
        Self::new(name, description, json!({ "type": "string" })).with_default(json!(default))
    }

    /// A parameter with a default is optional for callers
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.optional = Some(true);
        self
    }
}

/// A named, parameterised process graph stored on the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDefinedProcess {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Vec<ProcessParameter>,
    pub process_graph: ProcessGraph,
}

impl UserDefinedProcess {
    pub fn parameter(&self, name: &str) -> Option<&ProcessParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Write the process as pretty printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("Saved process '{}' to {}", self.id, path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
