//! Patch graph: an arena of child nodes plus the connections among them.
//!
//! A patch is itself a node from its parent's point of view. Its ports are
//! the `inlet`/`outlet`/`inlet~`/`outlet~` proxy children it contains, in
//! creation order, so a parent wires a subpatch exactly like any object.
//!
//! Children live in `slots`; a slot index never changes for the lifetime of
//! the child, which lets the engine address any node by the slot path from its
//! root patch. Removing a subpatch drops its whole arena at once.

use tracing::trace;

use crate::atom::Atom;
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId};
use crate::port::{Connection, ConnectionId, Rate};

/// Type name of an empty, nestable subpatch.
pub const SUBPATCH: &str = "pd";

/// Which side of the patch a proxy exposes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Direction {
    In,
    Out,
}

/// Marks a child as one of the patch's own ports.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Proxy {
    pub direction: Direction,
    pub rate: Rate,
}

impl Proxy {
    /// Reserved proxy type names.
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        let (direction, rate) = match type_name {
            "inlet" => (Direction::In, Rate::Message),
            "inlet~" => (Direction::In, Rate::Signal),
            "outlet" => (Direction::Out, Rate::Message),
            "outlet~" => (Direction::Out, Rate::Signal),
            _ => return None,
        };
        Some(Self { direction, rate })
    }
}

/// A plain (non-patch) child.
pub(crate) struct Object {
    pub id: NodeId,
    pub type_name: String,
    pub proxy: Option<Proxy>,
    pub node: Box<dyn Node>,
}

pub(crate) enum Slot {
    Object(Object),
    Patch(Patch),
}

impl Slot {
    pub fn id(&self) -> NodeId {
        match self {
            Slot::Object(o) => o.id,
            Slot::Patch(p) => p.id,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Slot::Object(o) => &o.type_name,
            Slot::Patch(p) => &p.type_name,
        }
    }

    pub fn inlets(&self) -> &[Rate] {
        match self {
            Slot::Object(o) => o.node.inlets(),
            Slot::Patch(p) => &p.inlet_rates,
        }
    }

    pub fn outlets(&self) -> &[Rate] {
        match self {
            Slot::Object(o) => o.node.outlets(),
            Slot::Patch(p) => &p.outlet_rates,
        }
    }

    pub fn start(&mut self) {
        match self {
            Slot::Object(o) => o.node.start(),
            Slot::Patch(p) => p.start(),
        }
    }

    pub fn stop(&mut self) {
        match self {
            Slot::Object(o) => o.node.stop(),
            Slot::Patch(p) => p.stop(),
        }
    }

    /// Ids of this slot and everything nested in it.
    pub fn collect_ids(&self, out: &mut Vec<NodeId>) {
        out.push(self.id());
        if let Slot::Patch(p) = self {
            for slot in p.slots.iter().flatten() {
                slot.collect_ids(out);
            }
        }
    }
}

/// What a removal took with it.
pub(crate) struct Removed {
    pub slot: Slot,
    pub connections: Vec<ConnectionId>,
    /// Set when the removed child was a proxy: the patch port that disappeared
    pub port: Option<(Direction, usize)>,
}

/// A container graph of nodes and connections.
pub struct Patch {
    pub(crate) id: NodeId,
    pub(crate) type_name: String,
    pub(crate) args: Vec<Atom>,
    pub(crate) slots: Vec<Option<Slot>>,
    pub(crate) connections: Vec<Connection>,
    /// Slot indices of the inlet proxies, in port order
    pub(crate) inlets: Vec<usize>,
    /// Slot indices of the outlet proxies, in port order
    pub(crate) outlets: Vec<usize>,
    inlet_rates: Vec<Rate>,
    outlet_rates: Vec<Rate>,
    pub(crate) started: bool,
}

impl Patch {
    pub(crate) fn new(id: NodeId, type_name: impl Into<String>, args: Vec<Atom>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            args,
            slots: Vec::new(),
            connections: Vec::new(),
            inlets: Vec::new(),
            outlets: Vec::new(),
            inlet_rates: Vec::new(),
            outlet_rates: Vec::new(),
            started: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn args(&self) -> &[Atom] {
        &self.args
    }

    /// Rates of the patch's inlets, one per inlet proxy.
    pub fn inlet_rates(&self) -> &[Rate] {
        &self.inlet_rates
    }

    pub fn outlet_rates(&self) -> &[Rate] {
        &self.outlet_rates
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Add a child; proxies become new ports at the end of the port list.
    pub(crate) fn insert(&mut self, slot: Slot) -> usize {
        let index = self.slots.len();
        if let Slot::Object(Object { proxy: Some(proxy), .. }) = &slot {
            match proxy.direction {
                Direction::In => {
                    self.inlets.push(index);
                    self.inlet_rates.push(proxy.rate);
                }
                Direction::Out => {
                    self.outlets.push(index);
                    self.outlet_rates.push(proxy.rate);
                }
            }
        }
        self.slots.push(Some(slot));
        index
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Children in slot order.
    pub(crate) fn children(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (index, slot)))
    }

    /// Walk down a path of slot indices to a nested patch.
    pub(crate) fn descend(&self, path: &[usize]) -> Option<&Patch> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => match self.slot(*first)? {
                Slot::Patch(child) => child.descend(rest),
                Slot::Object(_) => None,
            },
        }
    }

    pub(crate) fn descend_mut(&mut self, path: &[usize]) -> Option<&mut Patch> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => match self.slot_mut(*first)? {
                Slot::Patch(child) => child.descend_mut(rest),
                Slot::Object(_) => None,
            },
        }
    }

    /// The object at `path`, only if every patch on the way is started.
    pub(crate) fn running_object_mut(&mut self, path: &[usize]) -> Option<&mut Object> {
        if !self.started {
            return None;
        }
        let (last, parents) = path.split_last()?;
        let mut patch = self;
        for index in parents {
            match patch.slot_mut(*index)? {
                Slot::Patch(child) if child.started => patch = child,
                _ => return None,
            }
        }
        match patch.slot_mut(*last)? {
            Slot::Object(object) => Some(object),
            Slot::Patch(_) => None,
        }
    }

    /// Port number of the proxy living in `slot`.
    pub(crate) fn port_of_proxy(&self, slot: usize, direction: Direction) -> Option<usize> {
        let ports = match direction {
            Direction::In => &self.inlets,
            Direction::Out => &self.outlets,
        };
        ports.iter().position(|s| *s == slot)
    }

    /// Validate and record a connection between two children.
    pub(crate) fn connect(
        &mut self,
        id: ConnectionId,
        source: usize,
        outlet: usize,
        sink: usize,
        inlet: usize,
    ) -> Result<Connection> {
        let source_slot = self
            .slot(source)
            .ok_or_else(|| GraphError::InvalidConnection("source has been destroyed".into()))?;
        let sink_slot = self
            .slot(sink)
            .ok_or_else(|| GraphError::InvalidConnection("sink has been destroyed".into()))?;

        let outlets = source_slot.outlets();
        let out_rate = *outlets.get(outlet).ok_or(GraphError::PortIndexOutOfRange {
            node: source_slot.id(),
            index: outlet,
            len: outlets.len(),
        })?;
        let inlets = sink_slot.inlets();
        let in_rate = *inlets.get(inlet).ok_or(GraphError::PortIndexOutOfRange {
            node: sink_slot.id(),
            index: inlet,
            len: inlets.len(),
        })?;

        if out_rate != in_rate {
            return Err(GraphError::InvalidConnection(format!(
                "{} outlet {} is {:?} rate but {} inlet {} is {:?} rate",
                source_slot.id(),
                outlet,
                out_rate,
                sink_slot.id(),
                inlet,
                in_rate
            )));
        }

        let connection = Connection {
            id,
            rate: out_rate,
            source,
            outlet,
            sink,
            inlet,
        };
        self.connections.push(connection);
        Ok(connection)
    }

    /// Remove a connection; false if it was already gone.
    pub(crate) fn disconnect(&mut self, id: ConnectionId) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c.id != id);
        before != self.connections.len()
    }

    /// Message sinks fed by one outlet, in connection order.
    pub(crate) fn targets(&self, source: usize, outlet: usize) -> Vec<(usize, usize)> {
        self.connections
            .iter()
            .filter(|c| c.rate == Rate::Message && c.source == source && c.outlet == outlet)
            .map(|c| (c.sink, c.inlet))
            .collect()
    }

    /// Sources feeding one inlet, in connection order.
    pub(crate) fn sources(&self, sink: usize, inlet: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.connections
            .iter()
            .filter(move |c| c.sink == sink && c.inlet == inlet)
            .map(|c| (c.source, c.outlet))
    }

    /// Take a child out, severing every connection that touches it.
    ///
    /// Slot indices are node addresses, so a removed child in the middle
    /// leaves a `None` behind. Trailing empty slots are dropped, which keeps
    /// a create/remove cycle at the end of a patch from growing it.
    pub(crate) fn remove(&mut self, index: usize) -> Option<Removed> {
        let slot = self.slots.get_mut(index)?.take()?;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }

        let mut connections = Vec::new();
        self.connections.retain(|c| {
            let touches = c.source == index || c.sink == index;
            if touches {
                connections.push(c.id);
            }
            !touches
        });

        let mut port = None;
        if let Slot::Object(Object { proxy: Some(proxy), .. }) = &slot {
            let (ports, rates) = match proxy.direction {
                Direction::In => (&mut self.inlets, &mut self.inlet_rates),
                Direction::Out => (&mut self.outlets, &mut self.outlet_rates),
            };
            if let Some(position) = ports.iter().position(|s| *s == index) {
                ports.remove(position);
                rates.remove(position);
                port = Some((proxy.direction, position));
            }
        }

        trace!(patch = %self.id, index, "removed child");
        Some(Removed {
            slot,
            connections,
            port,
        })
    }

    /// A port of the child at `child` disappeared: drop its connections and
    /// shift the connections of later ports down by one.
    pub(crate) fn remove_child_port(
        &mut self,
        child: usize,
        direction: Direction,
        port: usize,
    ) -> Vec<ConnectionId> {
        let mut dropped = Vec::new();
        self.connections.retain_mut(|c| {
            let (node, index) = match direction {
                Direction::In => (c.sink, &mut c.inlet),
                Direction::Out => (c.source, &mut c.outlet),
            };
            if node != child {
                return true;
            }
            if *index == port {
                dropped.push(c.id);
                return false;
            }
            if *index > port {
                *index -= 1;
            }
            true
        });
        dropped
    }

    /// Start this patch and every child. Calling it again does nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for slot in self.slots.iter_mut().flatten() {
            slot.start();
        }
    }

    /// Stop this patch and every child. Calling it on a stopped patch does nothing.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        for slot in self.slots.iter_mut().flatten() {
            slot.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::Print;

    fn object(id: u64) -> Slot {
        Slot::Object(Object {
            id: NodeId(id),
            type_name: "print".into(),
            proxy: None,
            node: Box::new(Print::new(&[])),
        })
    }

    #[test]
    fn removing_the_last_child_frees_its_slot() {
        let mut patch = Patch::new(NodeId(0), SUBPATCH, Vec::new());
        let first = patch.insert(object(1));
        for id in 2..100 {
            let index = patch.insert(object(id));
            patch.remove(index).unwrap();
        }
        assert_eq!(patch.slots.len(), 1);

        // A hole in the middle stays, and goes once everything after it is gone
        let middle = patch.insert(object(100));
        let last = patch.insert(object(101));
        patch.remove(middle).unwrap();
        assert_eq!(patch.slots.len(), 3);
        patch.remove(last).unwrap();
        assert_eq!(patch.slots.len(), 1);
        assert_eq!(patch.children().map(|(index, _)| index).collect::<Vec<_>>(), vec![first]);
    }
}
