//! The engine: owns every root patch, routes messages and drives block processing.

use std::collections::BTreeMap;

use delegate::delegate;
use hashbrown::{HashMap, HashSet};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, trace, warn};

use crate::atom::Atom;
use crate::backend::{AudioBackend, NullBackend};
use crate::builder::{PatchDescription, Scope};
use crate::config::EngineConfig;
use crate::error::{GraphError, Result};
use crate::library::Library;
use crate::node::{Action, MessageContext, Node, NodeId, ProcessContext};
use crate::nodes::ProxyNode;
use crate::patch::{Direction, Object, Patch, Proxy, Slot, SUBPATCH};
use crate::port::{accumulate_signal, ConnectionId, Inlet, Outlet, Rate, SignalBlock};
use crate::registry::{CallbackId, NamedRegistry, Receiver};
use crate::schedule::{resolve_into, Schedule};

/// A `(name, atoms)` pair queued from another thread.
pub type ControlMessage = (String, Vec<Atom>);

/// Where a node lives: its root patch and the slot path below it.
/// Root patches have an empty path.
#[derive(Clone, Debug)]
struct Location {
    root: NodeId,
    path: Vec<usize>,
}

/// A top-level patch plus its compiled signal schedule.
struct RootPatch {
    patch: Patch,
    schedule: Option<Schedule>,
    /// Topology changed since `schedule` was built
    dirty: bool,
}

impl RootPatch {
    delegate! {
        to self.patch {
            fn start(&mut self);
            fn stop(&mut self);
            fn is_started(&self) -> bool;
        }
    }

    /// Rebuild the schedule if the topology changed, keeping block state.
    /// On failure the previous schedule stays in place.
    fn refresh(&mut self) -> Result<()> {
        if self.dirty || self.schedule.is_none() {
            let mut schedule = Schedule::build(&self.patch)?;
            if let Some(previous) = self.schedule.as_mut() {
                schedule.inherit(previous);
            }
            self.schedule = Some(schedule);
            self.dirty = false;
        }
        Ok(())
    }
}

/// Sends named messages into an [`Engine`] from another thread.
///
/// Messages are buffered in a lock-free ring buffer and delivered at the start
/// of the next [`tick`](Engine::tick). If the buffer is full, [`send`](Self::send)
/// returns `Err` with the message that couldn't be queued.
pub struct ControlSender {
    producer: Producer<ControlMessage>,
}

impl ControlSender {
    /// Queue `atoms` for delivery on the route `name`.
    ///
    /// ```
    /// use klingt_pd::{atoms, Engine};
    ///
    /// let mut engine = Engine::default();
    /// let mut control = engine.control_sender().unwrap();
    /// std::thread::spawn(move || {
    ///     control.send("volume", atoms![0.5f32]).ok();
    /// });
    /// ```
    pub fn send(&mut self, name: impl Into<String>, atoms: Vec<Atom>) -> core::result::Result<(), ControlMessage> {
        self.producer.push((name.into(), atoms)).map_err(|rtrb::PushError::Full(message)| {
            warn!(name = %message.0, "control queue full, dropping message");
            message
        })
    }

    /// Free slots left in the queue
    pub fn available(&self) -> usize {
        self.producer.slots()
    }
}

/// Runs a forest of patches.
///
/// `Engine` is the single owner of all graph state. Every operation takes
/// `&mut self` and runs to completion on the calling thread: messages are
/// delivered depth-first before the call returns, and [`tick`](Self::tick)
/// processes one block of every started root patch.
///
/// # Example
///
/// ```
/// use klingt_pd::{atoms, Engine};
///
/// let mut engine = Engine::default();
/// let patch = engine.create_patch();
/// let receive = engine.create_object(patch, "receive", &atoms!["in"]).unwrap();
/// let send = engine.create_object(patch, "send", &atoms!["out"]).unwrap();
/// engine.connect(patch, receive, 0, send, 0).unwrap();
///
/// let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// engine.receive("out", move |atoms| sink.lock().unwrap().push(atoms.to_vec()));
///
/// engine.send("in", &atoms!["x", 1]).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec![atoms!["x", 1]]);
/// ```
pub struct Engine {
    config: EngineConfig,
    library: Library,
    registry: NamedRegistry,
    roots: BTreeMap<NodeId, RootPatch>,
    locations: HashMap<NodeId, Location>,
    /// Owning patch of every live connection
    connections: HashMap<ConnectionId, NodeId>,
    /// Id counters are 64 bit and wrap rather than panic; they never get there
    next_node: u64,
    next_connection: u64,
    next_dollar_zero: u32,
    /// Abstractions currently being built, innermost last
    instantiating: Vec<String>,
    started: bool,
    backend: Box<dyn AudioBackend>,
    control: Consumer<ControlMessage>,
    control_sender: Option<Producer<ControlMessage>>,
    /// One block per output channel
    mix: Vec<SignalBlock>,
    last_block_size: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Create a stopped engine with the built-in node library and no audio output.
    pub fn new(config: EngineConfig) -> Self {
        let (producer, consumer) = RingBuffer::new(config.control_queue_size);
        Self {
            config,
            library: Library::default(),
            registry: NamedRegistry::new(),
            roots: BTreeMap::new(),
            locations: HashMap::new(),
            connections: HashMap::new(),
            next_node: 0,
            next_connection: 0,
            next_dollar_zero: 1000,
            instantiating: Vec::new(),
            started: false,
            backend: Box::new(NullBackend),
            control: consumer,
            control_sender: Some(producer),
            mix: vec![SignalBlock::zeroed(config.block_size); config.channels],
            last_block_size: config.block_size,
        }
    }

    /// Send the mixed output to `backend` (builder pattern).
    pub fn with_backend(mut self, backend: impl AudioBackend + 'static) -> Self {
        self.backend = Box::new(backend);
        self
    }

    /// Replace the node library (builder pattern).
    pub fn with_library(mut self, library: Library) -> Self {
        self.library = library;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn channels(&self) -> usize {
        self.config.channels
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Register custom node types here.
    pub fn library_mut(&mut self) -> &mut Library {
        &mut self.library
    }

    pub fn registry(&self) -> &NamedRegistry {
        &self.registry
    }

    fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node = self.next_node.wrapping_add(1);
        id
    }

    pub(crate) fn next_dollar_zero(&mut self) -> u32 {
        let n = self.next_dollar_zero;
        self.next_dollar_zero = self.next_dollar_zero.wrapping_add(1);
        n
    }

    fn location(&self, node: NodeId) -> Result<&Location> {
        self.locations.get(&node).ok_or(GraphError::NodeNotFound(node))
    }

    fn patch_ref(&self, patch: NodeId) -> Result<&Patch> {
        let location = self.location(patch)?;
        let root = self.roots.get(&location.root).ok_or(GraphError::NodeNotFound(patch))?;
        root.patch.descend(&location.path).ok_or(GraphError::NotAPatch(patch))
    }

    fn patch_mut(&mut self, patch: NodeId) -> Result<&mut Patch> {
        let location = self.locations.get(&patch).ok_or(GraphError::NodeNotFound(patch))?;
        let root = self
            .roots
            .get_mut(&location.root)
            .ok_or(GraphError::NodeNotFound(patch))?;
        root.patch.descend_mut(&location.path).ok_or(GraphError::NotAPatch(patch))
    }

    fn slot_ref(&self, node: NodeId) -> Result<&Slot> {
        let location = self.location(node)?;
        let root = self.roots.get(&location.root).ok_or(GraphError::NodeNotFound(node))?;
        let (last, parents) = location.path.split_last().ok_or(GraphError::NodeNotFound(node))?;
        root.patch
            .descend(parents)
            .and_then(|parent| parent.slot(*last))
            .ok_or(GraphError::NodeNotFound(node))
    }

    fn object_mut(&mut self, node: NodeId) -> Option<&mut Object> {
        let location = self.locations.get(&node)?;
        let root = self.roots.get_mut(&location.root)?;
        let (last, parents) = location.path.split_last()?;
        match root.patch.descend_mut(parents)?.slot_mut(*last)? {
            Slot::Object(object) => Some(object),
            Slot::Patch(_) => None,
        }
    }

    fn mark_dirty(&mut self, node: NodeId) {
        if let Some(root) = self
            .locations
            .get(&node)
            .and_then(|location| self.roots.get_mut(&location.root))
        {
            root.dirty = true;
        }
    }

    // ---- construction ----

    /// Create an empty root patch. It starts right away if the engine is running.
    pub fn create_patch(&mut self) -> NodeId {
        let id = self.alloc_node();
        let mut patch = Patch::new(id, SUBPATCH, Vec::new());
        if self.started {
            patch.start();
        }
        self.roots.insert(
            id,
            RootPatch {
                patch,
                schedule: None,
                dirty: true,
            },
        );
        self.locations.insert(
            id,
            Location {
                root: id,
                path: Vec::new(),
            },
        );
        debug!(patch = %id, started = self.started, "created root patch");
        id
    }

    /// Create a node of type `type_name` inside `patch`.
    ///
    /// `pd` makes an empty subpatch and `inlet`, `outlet`, `inlet~`, `outlet~`
    /// add ports to `patch`. Other names are looked up in the library, node
    /// types first, then abstractions. The new node is started if `patch` is.
    pub fn create_object(&mut self, patch: NodeId, type_name: &str, args: &[Atom]) -> Result<NodeId> {
        self.patch_ref(patch)?;
        let id = self.alloc_node();

        let slot = if type_name == SUBPATCH {
            Slot::Patch(Patch::new(id, SUBPATCH, args.to_vec()))
        } else if let Some(proxy) = Proxy::from_type_name(type_name) {
            Slot::Object(Object {
                id,
                type_name: type_name.to_owned(),
                proxy: Some(proxy),
                node: Box::new(ProxyNode::new(proxy.direction, proxy.rate)),
            })
        } else if let Some(node) = self.library.create(type_name, args) {
            let node = node.map_err(|source| GraphError::Node { node: id, source })?;
            Slot::Object(Object {
                id,
                type_name: type_name.to_owned(),
                proxy: None,
                node,
            })
        } else if let Some(template) = self.library.abstraction(type_name).cloned() {
            return self.instantiate_abstraction(patch, id, type_name, &template, args);
        } else {
            return Err(GraphError::UnknownObjectType(type_name.to_owned()));
        };

        self.insert_slot(patch, slot)?;
        debug!(%patch, node = %id, type_name, "created object");
        Ok(id)
    }

    /// Add a node constructed by the host. It behaves exactly like one
    /// created from the library under `type_name`.
    ///
    /// ```
    /// use klingt_pd::{Engine, nodes::Print};
    ///
    /// let mut engine = Engine::default();
    /// let patch = engine.create_patch();
    /// let print = engine.add_node(patch, "print", Print::new(&[])).unwrap();
    /// assert_eq!(engine.type_name(print).unwrap(), "print");
    /// ```
    pub fn add_node(&mut self, patch: NodeId, type_name: &str, node: impl Node) -> Result<NodeId> {
        self.patch_ref(patch)?;
        let id = self.alloc_node();
        self.insert_slot(
            patch,
            Slot::Object(Object {
                id,
                type_name: type_name.to_owned(),
                proxy: None,
                node: Box::new(node),
            }),
        )?;
        debug!(%patch, node = %id, type_name, "added node");
        Ok(id)
    }

    fn insert_slot(&mut self, patch: NodeId, mut slot: Slot) -> Result<NodeId> {
        let id = slot.id();
        let location = self
            .locations
            .get(&patch)
            .cloned()
            .ok_or(GraphError::NodeNotFound(patch))?;
        let root = self
            .roots
            .get_mut(&location.root)
            .ok_or(GraphError::NodeNotFound(patch))?;
        let parent = root
            .patch
            .descend_mut(&location.path)
            .ok_or(GraphError::NotAPatch(patch))?;

        if parent.is_started() {
            slot.start();
        }
        if let Slot::Object(object) = &slot {
            if let Some(route) = object.node.route().filter(|r| !r.name.is_empty()) {
                self.registry.bind(route.role, &route.name, id);
            }
        }
        let index = parent.insert(slot);
        root.dirty = true;

        let mut path = location.path;
        path.push(index);
        self.locations.insert(
            id,
            Location {
                root: location.root,
                path,
            },
        );
        Ok(id)
    }

    fn instantiate_abstraction(
        &mut self,
        patch: NodeId,
        id: NodeId,
        name: &str,
        template: &PatchDescription,
        args: &[Atom],
    ) -> Result<NodeId> {
        if self.instantiating.iter().any(|n| n == name) {
            return Err(GraphError::RecursiveAbstraction(name.to_owned()));
        }
        self.insert_slot(patch, Slot::Patch(Patch::new(id, name, args.to_vec())))?;

        let scope = Scope::new(args.to_vec(), self.next_dollar_zero());
        self.instantiating.push(name.to_owned());
        let built = self.build_scoped(id, template, &scope);
        self.instantiating.pop();

        if let Err(err) = built {
            self.remove(id)?;
            return Err(err);
        }
        debug!(%patch, node = %id, abstraction = name, "instantiated abstraction");
        Ok(id)
    }

    /// Index of `node` in `patch`, if it is a child of it.
    fn child_index(&self, patch: NodeId, node: NodeId) -> Result<usize> {
        let parent = self.location(patch)?;
        let Some(child) = self.locations.get(&node) else {
            return Err(GraphError::InvalidConnection(format!("{node} has been destroyed")));
        };
        match child.path.split_last() {
            Some((index, parents)) if child.root == parent.root && parents == parent.path.as_slice() => Ok(*index),
            _ => Err(GraphError::InvalidConnection(format!("{node} is not a child of {patch}"))),
        }
    }

    /// Connect outlet `outlet` of `source` to inlet `inlet` of `sink`.
    ///
    /// Both nodes must be children of `patch` and the port rates must match.
    /// Signal connections are checked for cycles right away; a connection
    /// that would close a cycle without a `z~` in it is not kept.
    pub fn connect(
        &mut self,
        patch: NodeId,
        source: NodeId,
        outlet: usize,
        sink: NodeId,
        inlet: usize,
    ) -> Result<ConnectionId> {
        let source_index = self.child_index(patch, source)?;
        let sink_index = self.child_index(patch, sink)?;
        let location = self.location(patch)?.clone();

        let id = ConnectionId(self.next_connection);
        self.next_connection = self.next_connection.wrapping_add(1);

        let root = self
            .roots
            .get_mut(&location.root)
            .ok_or(GraphError::NodeNotFound(patch))?;
        let parent = root
            .patch
            .descend_mut(&location.path)
            .ok_or(GraphError::NotAPatch(patch))?;
        let connection = parent.connect(id, source_index, outlet, sink_index, inlet)?;

        if connection.rate == Rate::Signal {
            root.dirty = true;
            let validated = root.refresh();
            if let Err(err) = validated {
                if let Some(parent) = root.patch.descend_mut(&location.path) {
                    parent.disconnect(id);
                }
                debug!(%source, %sink, %err, "rejected signal connection");
                return Err(err);
            }
        }

        self.connections.insert(id, patch);
        debug!(%patch, %source, outlet, %sink, inlet, rate = ?connection.rate, "connected");
        Ok(id)
    }

    /// Connect two ports of sibling nodes.
    pub fn connect_ports(&mut self, outlet: Outlet, inlet: Inlet) -> Result<ConnectionId> {
        let patch = self.parent(outlet.node).ok_or_else(|| {
            GraphError::InvalidConnection(format!("{} is not inside a patch", outlet.node))
        })?;
        self.connect(patch, outlet.node, outlet.index, inlet.node, inlet.index)
    }

    /// Remove a connection. Unknown or already removed ids are ignored.
    pub fn disconnect(&mut self, id: ConnectionId) {
        let Some(patch) = self.connections.remove(&id) else {
            return;
        };
        if let Ok(parent) = self.patch_mut(patch) {
            if parent.disconnect(id) {
                self.mark_dirty(patch);
                debug!(%patch, ?id, "disconnected");
            }
        }
    }

    /// Destroy a node, or a patch with everything inside it.
    ///
    /// All connections touching the removed nodes are severed and their
    /// named routes unbound. Removing a proxy removes that port from the
    /// enclosing patch; later ports move down by one.
    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        let location = self.location(node)?.clone();
        let mut ids = Vec::new();

        match location.path.split_last() {
            None => {
                let mut root = self.roots.remove(&node).ok_or(GraphError::NodeNotFound(node))?;
                root.stop();
                ids.push(node);
                for slot in root.patch.slots.iter().flatten() {
                    slot.collect_ids(&mut ids);
                }
            }
            Some((&index, parents)) => {
                let root = self
                    .roots
                    .get_mut(&location.root)
                    .ok_or(GraphError::NodeNotFound(node))?;
                let parent = root.patch.descend_mut(parents).ok_or(GraphError::NodeNotFound(node))?;
                let started = parent.is_started();
                let removed = parent.remove(index).ok_or(GraphError::NodeNotFound(node))?;

                let mut slot = removed.slot;
                if started {
                    slot.stop();
                }
                slot.collect_ids(&mut ids);
                for id in removed.connections {
                    self.connections.remove(&id);
                }

                // The enclosing patch lost a port: fix the connections to it
                if let (Some((direction, port)), Some((&patch_index, outer))) = (removed.port, parents.split_last()) {
                    if let Some(outer) = root.patch.descend_mut(outer) {
                        for id in outer.remove_child_port(patch_index, direction, port) {
                            self.connections.remove(&id);
                        }
                    }
                }
                root.dirty = true;
            }
        }

        let removed: HashSet<NodeId> = ids.iter().copied().collect();
        for id in &ids {
            self.locations.remove(id);
            self.registry.unbind_node(*id);
        }
        self.connections.retain(|_, owner| !removed.contains(owner));
        debug!(%node, nodes = ids.len(), "removed");
        Ok(())
    }

    // ---- messages ----

    /// Emit `atoms` from an outlet, as if the node itself had output them.
    ///
    /// Every connected inlet is invoked in connection order, each one
    /// completing its own downstream deliveries before the next starts.
    pub fn deliver_message(&mut self, outlet: Outlet, atoms: &[Atom]) -> Result<()> {
        self.emit(outlet.node, outlet.index, atoms)
    }

    /// Deliver `atoms` straight into an inlet.
    pub fn message(&mut self, inlet: Inlet, atoms: &[Atom]) -> Result<()> {
        self.deliver(inlet.node, inlet.index, atoms)
    }

    fn emit(&mut self, node: NodeId, outlet: usize, atoms: &[Atom]) -> Result<()> {
        let location = self.location(node)?.clone();
        let root = self.roots.get(&location.root).ok_or(GraphError::NodeNotFound(node))?;

        let Some((&index, parents)) = location.path.split_last() else {
            let outlets = root.patch.outlet_rates().len();
            if outlet >= outlets {
                return Err(GraphError::PortIndexOutOfRange {
                    node,
                    index: outlet,
                    len: outlets,
                });
            }
            // Nothing is connected to a root patch
            return Ok(());
        };
        let parent = root.patch.descend(parents).ok_or(GraphError::NodeNotFound(node))?;
        let outlets = parent.slot(index).map_or(0, |slot| slot.outlets().len());
        if outlet >= outlets {
            return Err(GraphError::PortIndexOutOfRange {
                node,
                index: outlet,
                len: outlets,
            });
        }

        let targets: Vec<(NodeId, usize)> = parent
            .targets(index, outlet)
            .into_iter()
            .filter_map(|(sink, inlet)| parent.slot(sink).map(|slot| (slot.id(), inlet)))
            .collect();
        trace!(%node, outlet, targets = targets.len(), ?atoms, "emit");

        for (sink, inlet) in targets {
            self.deliver(sink, inlet, atoms)?;
        }
        Ok(())
    }

    fn deliver(&mut self, node: NodeId, inlet: usize, atoms: &[Atom]) -> Result<()> {
        let location = self.location(node)?.clone();
        let Some((&index, parents)) = location.path.split_last() else {
            return self.enter_patch(node, inlet, atoms);
        };

        let root = self
            .roots
            .get_mut(&location.root)
            .ok_or(GraphError::NodeNotFound(node))?;
        let parent = root.patch.descend_mut(parents).ok_or(GraphError::NodeNotFound(node))?;
        let parent_id = parent.id();
        let proxy_port = parent.port_of_proxy(index, Direction::Out);

        let object = match parent.slot_mut(index) {
            Some(Slot::Object(object)) => object,
            Some(Slot::Patch(_)) => return self.enter_patch(node, inlet, atoms),
            None => return Err(GraphError::NodeNotFound(node)),
        };
        let inlets = object.node.inlets().len();
        if inlet >= inlets {
            return Err(GraphError::PortIndexOutOfRange {
                node,
                index: inlet,
                len: inlets,
            });
        }

        if let Some(port) = proxy_port {
            // Leaving the patch through one of its outlets
            return self.emit(parent_id, port, atoms);
        }

        let mut ctx = MessageContext::default();
        object
            .node
            .handle_message(inlet, atoms, &mut ctx)
            .map_err(|source| GraphError::Node { node, source })?;
        self.run_actions(node, ctx.take())
    }

    /// A message arrived on a patch inlet: it continues from the matching proxy.
    fn enter_patch(&mut self, patch: NodeId, inlet: usize, atoms: &[Atom]) -> Result<()> {
        let inner = self.patch_ref(patch)?;
        let Some(&slot) = inner.inlets.get(inlet) else {
            return Err(GraphError::PortIndexOutOfRange {
                node: patch,
                index: inlet,
                len: inner.inlets.len(),
            });
        };
        let proxy = inner.slot(slot).map(Slot::id).ok_or(GraphError::NodeNotFound(patch))?;
        self.emit(proxy, 0, atoms)
    }

    fn run_actions(&mut self, node: NodeId, actions: Vec<Action>) -> Result<()> {
        for action in actions {
            match action {
                Action::Emit { outlet, atoms } => self.emit(node, outlet, &atoms)?,
                Action::Send { name, atoms } => self.send(&name, &atoms)?,
                Action::Rename { name } => self.rename(node, &name)?,
            }
        }
        Ok(())
    }

    /// Deliver `atoms` to every receiver bound on `name`, in binding order.
    ///
    /// Receivers are captured when the call starts. Sending to a name with no
    /// receivers does nothing.
    pub fn send(&mut self, name: &str, atoms: &[Atom]) -> Result<()> {
        let receivers = self.registry.receivers(name);
        trace!(name, receivers = receivers.len(), ?atoms, "send");

        for receiver in receivers {
            match receiver {
                Receiver::Node(node) => {
                    // Removed by an earlier receiver
                    let Some(object) = self.object_mut(node) else {
                        continue;
                    };
                    let mut ctx = MessageContext::default();
                    object
                        .node
                        .receive_named(atoms, &mut ctx)
                        .map_err(|source| GraphError::Node { node, source })?;
                    self.run_actions(node, ctx.take())?;
                }
                Receiver::Callback(id) => self.registry.call(id, atoms),
            }
        }
        Ok(())
    }

    /// Listen on a named route from the host.
    pub fn receive<F>(&mut self, name: &str, callback: F) -> CallbackId
    where
        F: FnMut(&[Atom]) + Send + 'static,
    {
        debug!(name, "bound host receiver");
        self.registry.bind_callback(name, Box::new(callback))
    }

    /// Stop a host listener registered with [`receive`](Self::receive).
    pub fn unreceive(&mut self, id: CallbackId) {
        self.registry.unbind_callback(id);
    }

    /// Move the named route of a send/receive node to `name`.
    ///
    /// The old binding is dropped and the new one made in one step; nodes
    /// without a route ignore this.
    pub fn rename(&mut self, node: NodeId, name: &str) -> Result<()> {
        let object = self.object_mut(node).ok_or(GraphError::NodeNotFound(node))?;
        let old = object.node.route().filter(|r| !r.name.is_empty());
        object.node.set_route_name(name);
        let new = object.node.route().filter(|r| !r.name.is_empty());

        match (old, new) {
            (Some(old), Some(new)) => self.registry.rebind(node, &old.name, &new.name),
            (Some(_), None) => self.registry.unbind_node(node),
            (None, Some(new)) => self.registry.bind(new.role, &new.name, node),
            (None, None) => {}
        }
        debug!(%node, name, "renamed route");
        Ok(())
    }

    /// Hand out the sending side of the control queue. Only the first call
    /// gets it.
    pub fn control_sender(&mut self) -> Option<ControlSender> {
        self.control_sender.take().map(|producer| ControlSender { producer })
    }

    fn drain_control(&mut self) -> Result<()> {
        while let Ok((name, atoms)) = self.control.pop() {
            self.send(&name, &atoms)?;
        }
        Ok(())
    }

    // ---- lifecycle ----

    /// Start every root patch and the audio backend. Does nothing if already started.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for root in self.roots.values_mut() {
            root.start();
        }
        self.backend.start();
        debug!(patches = self.roots.len(), "engine started");
    }

    /// Stop every root patch and the audio backend. Does nothing if already stopped.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        for root in self.roots.values_mut() {
            root.stop();
        }
        self.backend.stop();
        debug!("engine stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Start one patch (root or nested) and everything inside it.
    pub fn start_patch(&mut self, patch: NodeId) -> Result<()> {
        self.patch_mut(patch)?.start();
        Ok(())
    }

    pub fn stop_patch(&mut self, patch: NodeId) -> Result<()> {
        self.patch_mut(patch)?.stop();
        Ok(())
    }

    /// Process one block of `block_size` samples.
    ///
    /// Queued control messages are delivered first. A stopped engine does
    /// nothing else; otherwise every started root patch runs its signal nodes
    /// in dependency order and the sum of the root `outlet~`s goes to the
    /// audio backend.
    pub fn tick(&mut self, block_size: usize) -> Result<()> {
        self.drain_control()?;
        if !self.started {
            return Ok(());
        }

        let ctx = ProcessContext {
            sample_rate: self.config.sample_rate,
            block_size,
        };
        self.last_block_size = block_size;
        for channel in &mut self.mix {
            channel.clear(block_size);
        }

        for root in self.roots.values_mut() {
            if !root.is_started() {
                continue;
            }
            root.refresh()?;
            let RootPatch { patch, schedule, .. } = root;
            if let Some(schedule) = schedule {
                schedule.run(patch, &ctx)?;
                schedule.mix_into(&mut self.mix);
            }
        }

        self.backend.render(&self.mix);
        Ok(())
    }

    /// [`tick`](Self::tick) with the configured block size.
    pub fn process(&mut self) -> Result<()> {
        self.tick(self.config.block_size)
    }

    /// Sum of the latest blocks feeding a signal inlet, looking through
    /// subpatch proxies. Silence when nothing is connected.
    pub fn accumulate_signal(&self, inlet: Inlet) -> Result<SignalBlock> {
        let slot = self.slot_ref(inlet.node)?;
        let rates = slot.inlets();
        if inlet.index >= rates.len() {
            return Err(GraphError::PortIndexOutOfRange {
                node: inlet.node,
                index: inlet.index,
                len: rates.len(),
            });
        }

        let location = self.location(inlet.node)?;
        let root = self
            .roots
            .get(&location.root)
            .ok_or(GraphError::NodeNotFound(inlet.node))?;
        let (last, parents) = location
            .path
            .split_last()
            .ok_or(GraphError::NodeNotFound(inlet.node))?;

        let mut found = Vec::new();
        resolve_into(&root.patch, parents, *last, inlet.index, &mut found, &mut Vec::new())?;
        let blocks = found
            .iter()
            .filter_map(|(node, ordinal)| root.schedule.as_ref()?.output(*node, *ordinal));
        Ok(accumulate_signal(blocks, self.last_block_size))
    }

    /// Stop, destroy every patch and drop all named routes. Registered
    /// node types and abstractions are kept.
    pub fn reset(&mut self) {
        self.stop();
        self.roots.clear();
        self.locations.clear();
        self.connections.clear();
        self.registry.clear();
        self.instantiating.clear();
        while self.control.pop().is_ok() {}
        debug!("engine reset");
    }

    // ---- inspection ----

    /// Ids of the root patches, oldest first.
    pub fn patches(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots.keys().copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.locations.contains_key(&node)
    }

    pub fn type_name(&self, node: NodeId) -> Result<&str> {
        match self.slot_ref(node) {
            Ok(slot) => Ok(slot.type_name()),
            Err(_) => self.patch_ref(node).map(|patch| patch.type_name.as_str()),
        }
    }

    /// Creation arguments of a subpatch or abstraction instance.
    pub fn patch_args(&self, patch: NodeId) -> Result<&[Atom]> {
        self.patch_ref(patch).map(Patch::args)
    }

    /// Children of a patch in creation order.
    pub fn children(&self, patch: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.patch_ref(patch)?.children().map(|(_, slot)| slot.id()).collect())
    }

    /// The patch containing `node`; `None` for root patches and unknown ids.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        let location = self.locations.get(&node)?;
        let (_, parents) = location.path.split_last()?;
        let root = self.roots.get(&location.root)?;
        root.patch.descend(parents).map(Patch::id)
    }

    pub fn inlets(&self, node: NodeId) -> Result<&[Rate]> {
        match self.slot_ref(node) {
            Ok(slot) => Ok(slot.inlets()),
            Err(_) => self.patch_ref(node).map(Patch::inlet_rates),
        }
    }

    pub fn outlets(&self, node: NodeId) -> Result<&[Rate]> {
        match self.slot_ref(node) {
            Ok(slot) => Ok(slot.outlets()),
            Err(_) => self.patch_ref(node).map(Patch::outlet_rates),
        }
    }

    /// Signal nodes of a root patch tree in processing order.
    pub fn schedule_order(&mut self, root: NodeId) -> Result<Vec<NodeId>> {
        let root = self.roots.get_mut(&root).ok_or(GraphError::NotAPatch(root))?;
        root.refresh()?;
        Ok(root.schedule.iter().flat_map(Schedule::order).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms;

    #[test]
    fn id_counters_wrap_instead_of_panicking() {
        let mut engine = Engine::default();
        engine.next_node = u64::MAX;
        engine.next_connection = u64::MAX;
        engine.next_dollar_zero = u32::MAX;

        let patch = engine.create_patch();
        assert_eq!(patch, NodeId(u64::MAX));
        let receive = engine.create_object(patch, "r", &atoms!["in"]).unwrap();
        assert_eq!(receive, NodeId(0));
        let send = engine.create_object(patch, "s", &atoms!["out"]).unwrap();
        assert_eq!(engine.connect(patch, receive, 0, send, 0).unwrap(), ConnectionId(u64::MAX));
        assert_eq!(engine.next_dollar_zero(), u32::MAX);
        assert_eq!(engine.next_dollar_zero(), 0);
    }
}
