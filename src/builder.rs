//! Declarative patch descriptions and the builder that instantiates them.
//!
//! The description mirrors the JSON shape produced by Pd file parsers:
//!
//! ```json
//! {
//!   "nodes": [
//!     { "id": 0, "proto": "receive", "args": ["$0-in"] },
//!     { "id": 1, "proto": "pd", "args": ["inner"], "subpatch": { "nodes": [], "connections": [] } }
//!   ],
//!   "connections": [ { "source": { "id": 0, "port": 0 }, "sink": { "id": 1, "port": 0 } } ]
//! }
//! ```
//!
//! Ids only need to be unique within one description level, and connections
//! may only reference nodes created at that same level.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atom::Atom;
use crate::engine::Engine;
use crate::error::{GraphError, Result};
use crate::node::NodeId;
use crate::patch::SUBPATCH;

/// A graph of nodes and connections to instantiate into a patch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchDescription {
    #[serde(default)]
    pub nodes: Vec<NodeDescription>,
    #[serde(default)]
    pub connections: Vec<ConnectionDescription>,
}

/// One node of a [`PatchDescription`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub id: u32,
    #[serde(rename = "proto")]
    pub type_name: String,
    #[serde(default)]
    pub args: Vec<Atom>,
    /// Contents of a `pd` node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpatch: Option<PatchDescription>,
}

/// One port of a [`ConnectionDescription`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescription {
    pub id: u32,
    pub port: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescription {
    pub source: PortDescription,
    pub sink: PortDescription,
}

impl PatchDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node (builder pattern).
    pub fn node(mut self, id: u32, type_name: impl Into<String>, args: Vec<Atom>) -> Self {
        self.nodes.push(NodeDescription {
            id,
            type_name: type_name.into(),
            args,
            subpatch: None,
        });
        self
    }

    /// Add a `pd` subpatch node with its contents.
    pub fn subpatch(mut self, id: u32, args: Vec<Atom>, contents: PatchDescription) -> Self {
        self.nodes.push(NodeDescription {
            id,
            type_name: SUBPATCH.to_owned(),
            args,
            subpatch: Some(contents),
        });
        self
    }

    /// Add a connection (builder pattern).
    pub fn connect(mut self, source: u32, outlet: usize, sink: u32, inlet: usize) -> Self {
        self.connections.push(ConnectionDescription {
            source: PortDescription {
                id: source,
                port: outlet,
            },
            sink: PortDescription { id: sink, port: inlet },
        });
        self
    }

    /// Parse the JSON form.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// `$`-argument context of one abstraction instance.
///
/// `pd` subpatches share their parent's scope; every abstraction instance
/// opens a fresh one with its own `$0`.
#[derive(Clone, Debug)]
pub(crate) struct Scope {
    args: Vec<Atom>,
    dollar_zero: u32,
}

impl Scope {
    pub fn new(args: Vec<Atom>, dollar_zero: u32) -> Self {
        Self { args, dollar_zero }
    }

    fn dollar(&self, n: usize) -> Atom {
        if n == 0 {
            Atom::Float(self.dollar_zero as f32)
        } else {
            self.args.get(n - 1).cloned().unwrap_or(Atom::Float(0.0))
        }
    }

    /// Substitute `$0`, `$1`… in one creation argument.
    ///
    /// A symbol that is exactly `$n` becomes the argument itself (keeping its
    /// type); `$n` inside a longer symbol is spliced in as text.
    pub fn expand(&self, atom: &Atom) -> Atom {
        let Atom::Symbol(text) = atom else {
            return atom.clone();
        };
        if !text.contains('$') {
            return atom.clone();
        }
        if let Some(n) = text.strip_prefix('$').and_then(|rest| rest.parse::<usize>().ok()) {
            return self.dollar(n);
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text.as_str();
        while let Some(at) = rest.find('$') {
            out.push_str(&rest[..at]);
            let after = &rest[at + 1..];
            let digits = after.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                out.push('$');
            } else if let Ok(n) = after[..digits].parse::<usize>() {
                out.push_str(&self.dollar(n).to_string());
            }
            rest = &after[digits..];
        }
        out.push_str(rest);
        Atom::Symbol(out)
    }
}

impl Engine {
    /// Instantiate `description` into an existing patch.
    ///
    /// Nodes are created in order (recursing depth-first into `pd` nodes),
    /// then connections are made. A connection naming an id that was not
    /// created at this level fails with `InvalidConnection`. Nodes created
    /// before a failure stay in the patch.
    pub fn build(&mut self, patch: NodeId, description: &PatchDescription) -> Result<()> {
        let scope = Scope::new(Vec::new(), self.next_dollar_zero());
        self.build_scoped(patch, description, &scope)
    }

    /// Create a root patch from a description. On failure nothing is kept.
    pub fn load_patch(&mut self, description: &PatchDescription) -> Result<NodeId> {
        let patch = self.create_patch();
        if let Err(err) = self.build(patch, description) {
            self.remove(patch)?;
            return Err(err);
        }
        Ok(patch)
    }

    /// Register a reusable patch template. Each reference to `name` in
    /// [`create_object`](Engine::create_object) builds a fresh copy.
    pub fn register_abstraction(&mut self, name: impl Into<String>, description: PatchDescription) {
        self.library_mut().register_abstraction(name, description);
    }

    pub(crate) fn build_scoped(
        &mut self,
        patch: NodeId,
        description: &PatchDescription,
        scope: &Scope,
    ) -> Result<()> {
        let mut created: HashMap<u32, NodeId> = HashMap::with_capacity(description.nodes.len());

        for node in &description.nodes {
            let args: Vec<Atom> = node.args.iter().map(|a| scope.expand(a)).collect();
            let id = if node.type_name == SUBPATCH {
                let id = self.create_object(patch, SUBPATCH, &args)?;
                if let Some(contents) = &node.subpatch {
                    self.build_scoped(id, contents, scope)?;
                }
                id
            } else {
                self.create_object(patch, &node.type_name, &args)?
            };
            created.insert(node.id, id);
        }

        for connection in &description.connections {
            let source = created.get(&connection.source.id);
            let sink = created.get(&connection.sink.id);
            let (Some(&source), Some(&sink)) = (source, sink) else {
                return Err(GraphError::InvalidConnection("invalid connection".into()));
            };
            self.connect(
                patch,
                source,
                connection.source.port,
                sink,
                connection.sink.port,
            )?;
        }

        debug!(
            %patch,
            nodes = description.nodes.len(),
            connections = description.connections.len(),
            "built patch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms;

    #[test]
    fn expands_whole_dollar_args() {
        let scope = Scope::new(atoms![440, "saw"], 1003);
        assert_eq!(scope.expand(&"$1".into()), Atom::Float(440.0));
        assert_eq!(scope.expand(&"$2".into()), Atom::Symbol("saw".into()));
        assert_eq!(scope.expand(&"$0".into()), Atom::Float(1003.0));
        assert_eq!(scope.expand(&"$3".into()), Atom::Float(0.0));
        assert_eq!(scope.expand(&Atom::Float(2.0)), Atom::Float(2.0));
    }

    #[test]
    fn splices_dollars_into_symbols() {
        let scope = Scope::new(atoms!["left"], 1004);
        assert_eq!(scope.expand(&"$0-freq".into()), Atom::Symbol("1004-freq".into()));
        assert_eq!(scope.expand(&"$1-$0".into()), Atom::Symbol("left-1004".into()));
        assert_eq!(scope.expand(&"cost$".into()), Atom::Symbol("cost$".into()));
    }

    #[test]
    fn parses_json_shape() {
        let json = r#"{
            "nodes": [
                { "id": 1, "proto": "send", "args": ["no1"] },
                { "id": 2, "proto": "pd", "subpatch": { "nodes": [{ "id": 0, "proto": "inlet" }] } }
            ],
            "connections": [ { "source": { "id": 1, "port": 0 }, "sink": { "id": 2, "port": 0 } } ]
        }"#;
        let description = PatchDescription::from_json(json).unwrap();
        assert_eq!(description.nodes[0].args, atoms!["no1"]);
        assert_eq!(description.nodes[1].subpatch.as_ref().unwrap().nodes.len(), 1);
        assert_eq!(description.connections[0].sink.id, 2);
    }
}
