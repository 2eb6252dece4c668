//! Core node trait and context types.

use core::fmt;

use crate::atom::Atom;
use crate::error::NodeError;
use crate::port::{Inlet, Outlet, Rate, SignalBlock};

/// Information available during block processing.
///
/// Passed to every [`Node::process_block`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the engine in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of samples in the current block
    pub block_size: usize,
}

/// Unique identifier for a node (patches included) within an engine.
///
/// Ids are never reused, so a stale id simply fails with
/// [`GraphError::NodeNotFound`](crate::GraphError::NodeNotFound).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// The inlet with the given index on this node.
    pub fn inlet(self, index: usize) -> Inlet {
        Inlet { node: self, index }
    }

    /// The outlet with the given index on this node.
    pub fn outlet(self, index: usize) -> Outlet {
        Outlet { node: self, index }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Which side of a named route a node sits on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RouteRole {
    Sender,
    Receiver,
}

/// A named-route binding declared by a node.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NamedRoute {
    pub role: RouteRole,
    pub name: String,
}

/// Something a message handler asked the engine to do.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Action {
    Emit { outlet: usize, atoms: Vec<Atom> },
    Send { name: String, atoms: Vec<Atom> },
    Rename { name: String },
}

/// Handed to [`Node::handle_message`] to produce output.
///
/// Actions run in the order they were recorded, right after the handler
/// returns and within the same logical instant. Each one completes its whole
/// depth-first fan-out before the next starts.
#[derive(Default, Debug)]
pub struct MessageContext {
    pub(crate) actions: Vec<Action>,
}

impl MessageContext {
    /// Output a message on one of this node's outlets.
    pub fn emit(&mut self, outlet: usize, atoms: impl Into<Vec<Atom>>) {
        self.actions.push(Action::Emit {
            outlet,
            atoms: atoms.into(),
        });
    }

    /// Send a message on a named route, whatever the graph position of its receivers.
    pub fn send(&mut self, name: impl Into<String>, atoms: impl Into<Vec<Atom>>) {
        self.actions.push(Action::Send {
            name: name.into(),
            atoms: atoms.into(),
        });
    }

    /// Move this node's named route to `name`.
    ///
    /// The engine calls [`Node::set_route_name`] and rebinds the registry
    /// in one step, before any later action of this handler runs.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.actions.push(Action::Rename { name: name.into() });
    }

    pub(crate) fn take(&mut self) -> Vec<Action> {
        core::mem::take(&mut self.actions)
    }
}

/// The capability interface every processing unit implements.
///
/// Nodes are created by a factory registered under a type name in the
/// [`Library`](crate::Library). Message handling and block processing are
/// plain synchronous calls; neither may block.
///
/// ```
/// use klingt_pd::{Atom, MessageContext, Node, NodeError, Rate};
///
/// /// Outputs its float input doubled.
/// struct Double;
///
/// impl Node for Double {
///     fn inlets(&self) -> &[Rate] { &[Rate::Message] }
///     fn outlets(&self) -> &[Rate] { &[Rate::Message] }
///
///     fn handle_message(
///         &mut self,
///         _inlet: usize,
///         atoms: &[Atom],
///         ctx: &mut MessageContext,
///     ) -> Result<(), NodeError> {
///         let value = atoms.first().and_then(Atom::as_float)
///             .ok_or_else(|| NodeError::new("expected a float"))?;
///         ctx.emit(0, vec![Atom::Float(value * 2.0)]);
///         Ok(())
///     }
/// }
/// ```
pub trait Node: Send + 'static {
    /// Rates of the inlets, in index order.
    fn inlets(&self) -> &[Rate];

    /// Rates of the outlets, in index order.
    fn outlets(&self) -> &[Rate];

    /// Handle a message arriving on `inlet`.
    fn handle_message(
        &mut self,
        inlet: usize,
        atoms: &[Atom],
        ctx: &mut MessageContext,
    ) -> Result<(), NodeError>;

    /// Process one block.
    ///
    /// `inputs` holds one summed block per signal inlet and `outputs` one
    /// block per signal outlet, both in port order. Every output must be
    /// written before returning.
    fn process_block(
        &mut self,
        _ctx: &ProcessContext,
        _inputs: &[SignalBlock],
        _outputs: &mut [SignalBlock],
    ) -> Result<(), NodeError> {
        Ok(())
    }

    /// Whether this node takes part in block processing.
    fn is_signal(&self) -> bool {
        self.inlets().contains(&Rate::Signal) || self.outlets().contains(&Rate::Signal)
    }

    /// Unit-delay nodes return true: their output only depends on earlier
    /// blocks, so edges into them are ignored when ordering.
    fn breaks_signal_cycles(&self) -> bool {
        false
    }

    /// The named route this node binds, if any.
    fn route(&self) -> Option<NamedRoute> {
        None
    }

    /// Called by the engine when the route is renamed.
    fn set_route_name(&mut self, _name: &str) {}

    /// A message arrived on this node's bound receive name.
    fn receive_named(&mut self, _atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        Ok(())
    }

    fn start(&mut self) {}

    fn stop(&mut self) {}
}
