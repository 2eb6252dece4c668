//! Named routes: topology-independent channels keyed by name.
//!
//! The registry is a plain value owned by the [`Engine`](crate::Engine) and
//! passed explicitly wherever routes are bound, so independent engines (and
//! tests) never share state. It is created with the engine and cleared by
//! [`Engine::reset`](crate::Engine::reset).

use hashbrown::HashMap;
use tracing::trace;

use crate::atom::Atom;
use crate::node::{NodeId, RouteRole};

/// Host-side listener registered through [`Engine::receive`](crate::Engine::receive).
pub type ReceiveCallback = Box<dyn FnMut(&[Atom]) + Send>;

/// Handle to a host callback bound on a route.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CallbackId(u64);

/// One receiver of a named route.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Receiver {
    Node(NodeId),
    Callback(CallbackId),
}

#[derive(Default)]
struct Route {
    senders: Vec<NodeId>,
    receivers: Vec<Receiver>,
}

impl Route {
    fn is_empty(&self) -> bool {
        self.senders.is_empty() && self.receivers.is_empty()
    }
}

/// Maps route names to their bound senders and receivers.
#[derive(Default)]
pub struct NamedRegistry {
    routes: HashMap<String, Route>,
    callbacks: HashMap<CallbackId, ReceiveCallback>,
    next_callback: u64,
}

impl NamedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` as a sender on `name`.
    pub fn bind_sender(&mut self, name: &str, node: NodeId) {
        let route = self.routes.entry_ref(name).or_default();
        if !route.senders.contains(&node) {
            route.senders.push(node);
        }
    }

    /// Register `node` as a receiver on `name`, after any existing receivers.
    pub fn bind_receiver(&mut self, name: &str, node: NodeId) {
        let route = self.routes.entry_ref(name).or_default();
        let receiver = Receiver::Node(node);
        if !route.receivers.contains(&receiver) {
            route.receivers.push(receiver);
        }
    }

    /// Register a host callback as a receiver on `name`.
    pub fn bind_callback(&mut self, name: &str, callback: ReceiveCallback) -> CallbackId {
        let id = CallbackId(self.next_callback);
        self.next_callback = self.next_callback.wrapping_add(1);
        self.callbacks.insert(id, callback);
        self.routes
            .entry_ref(name)
            .or_default()
            .receivers
            .push(Receiver::Callback(id));
        id
    }

    /// Bind `node` in `role` on `name`.
    pub fn bind(&mut self, role: RouteRole, name: &str, node: NodeId) {
        match role {
            RouteRole::Sender => self.bind_sender(name, node),
            RouteRole::Receiver => self.bind_receiver(name, node),
        }
    }

    /// Move `node` from `old` to `new`, keeping whichever roles it had.
    ///
    /// A node that was not bound on `old` is left unbound.
    pub fn rebind(&mut self, node: NodeId, old: &str, new: &str) {
        if old == new {
            return;
        }
        let (was_sender, was_receiver) = match self.routes.get_mut(old) {
            Some(route) => {
                let senders = route.senders.len();
                let receivers = route.receivers.len();
                route.senders.retain(|n| *n != node);
                route.receivers.retain(|r| *r != Receiver::Node(node));
                (senders != route.senders.len(), receivers != route.receivers.len())
            }
            None => (false, false),
        };
        self.prune(old);

        if was_sender {
            self.bind_sender(new, node);
        }
        if was_receiver {
            self.bind_receiver(new, node);
        }
        trace!(%node, old, new, "rebound route");
    }

    /// Remove `node` from every route.
    pub fn unbind_node(&mut self, node: NodeId) {
        self.routes.retain(|_, route| {
            route.senders.retain(|n| *n != node);
            route.receivers.retain(|r| *r != Receiver::Node(node));
            !route.is_empty()
        });
    }

    /// Remove a host callback.
    pub fn unbind_callback(&mut self, id: CallbackId) {
        self.callbacks.remove(&id);
        self.routes.retain(|_, route| {
            route.receivers.retain(|r| *r != Receiver::Callback(id));
            !route.is_empty()
        });
    }

    /// Snapshot of the receivers bound to `name`, in registration order.
    ///
    /// Delivery iterates the snapshot, so binds and renames triggered while
    /// a message is in flight apply to the next send, not the current one.
    pub fn receivers(&self, name: &str) -> Vec<Receiver> {
        self.routes
            .get(name)
            .map(|route| route.receivers.clone())
            .unwrap_or_default()
    }

    pub fn senders(&self, name: &str) -> &[NodeId] {
        self.routes
            .get(name)
            .map(|route| route.senders.as_slice())
            .unwrap_or(&[])
    }

    /// Invoke a host callback. Unknown ids are ignored.
    pub fn call(&mut self, id: CallbackId, atoms: &[Atom]) {
        if let Some(callback) = self.callbacks.get_mut(&id) {
            callback(atoms);
        }
    }

    /// Names that currently have at least one binding.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Drop every route and callback.
    pub fn clear(&mut self) {
        self.routes.clear();
        self.callbacks.clear();
    }

    fn prune(&mut self, name: &str) {
        if self.routes.get(name).map_or(false, Route::is_empty) {
            self.routes.remove(name);
        }
    }
}
