//! Node type catalog and abstraction templates.

use hashbrown::HashMap;
use tracing::debug;

use crate::atom::Atom;
use crate::builder::PatchDescription;
use crate::error::NodeError;
use crate::node::Node;

/// Creates a node from its creation arguments.
pub type NodeFactory = Box<dyn Fn(&[Atom]) -> Result<Box<dyn Node>, NodeError> + Send + Sync>;

/// Lookup from type names to node factories and abstraction templates.
///
/// Factories win over abstractions with the same name. Registering a name
/// again replaces the previous entry.
pub struct Library {
    factories: HashMap<String, NodeFactory>,
    abstractions: HashMap<String, PatchDescription>,
}

impl Default for Library {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl Library {
    /// An empty library: only the reserved `pd` and proxy names resolve.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            abstractions: HashMap::new(),
        }
    }

    /// A library holding the built-in [`nodes`](crate::nodes).
    pub fn with_builtins() -> Self {
        let mut library = Self::empty();
        crate::nodes::register_builtins(&mut library);
        library
    }

    /// Register a node type.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&[Atom]) -> Result<Box<dyn Node>, NodeError> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        debug!(%type_name, "registered node type");
        self.factories.insert(type_name, Box::new(factory));
    }

    /// Register a reusable patch template under `name`.
    pub fn register_abstraction(&mut self, name: impl Into<String>, description: PatchDescription) {
        let name = name.into();
        debug!(%name, nodes = description.nodes.len(), "registered abstraction");
        self.abstractions.insert(name, description);
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Instantiate a built-in or registered node type, if one exists.
    pub fn create(&self, type_name: &str, args: &[Atom]) -> Option<Result<Box<dyn Node>, NodeError>> {
        self.factories.get(type_name).map(|factory| factory(args))
    }

    pub fn abstraction(&self, name: &str) -> Option<&PatchDescription> {
        self.abstractions.get(name)
    }
}
