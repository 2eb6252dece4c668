//! Block-processing order for one root patch tree.
//!
//! Every signal object in the tree becomes one step. Connections are resolved
//! through subpatch proxies, so a step reads straight from the outlets of the
//! real objects feeding it no matter how deeply they are nested. The order is
//! a topological sort of that flattened graph; edges into order breakers
//! (unit delays) are left out, and those steps run on the inputs they captured
//! at the end of the previous block.

use hashbrown::HashMap;
use itertools::Itertools;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::node::{NodeId, ProcessContext};
use crate::patch::{Direction, Object, Patch, Slot};
use crate::port::{Rate, SignalBlock};

/// `(step, signal outlet ordinal)` of a block feeding an inlet
type Source = (usize, usize);

struct Step {
    node: NodeId,
    path: Vec<usize>,
    /// Per signal inlet, the outlets summed into it
    sources: Vec<Vec<Source>>,
    breaker: bool,
}

/// A signal object found while walking the tree.
struct Vertex {
    node: NodeId,
    label: String,
    path: Vec<usize>,
    breaker: bool,
    signal_inlets: Vec<usize>,
    signal_outlets: usize,
}

/// Compiled processing order plus the block buffers it runs on.
pub(crate) struct Schedule {
    steps: Vec<Step>,
    inputs: Vec<Vec<SignalBlock>>,
    outputs: Vec<Vec<SignalBlock>>,
    by_node: HashMap<NodeId, usize>,
    /// Per signal outlet of the root patch, the outlets summed into it
    root_outputs: Vec<Vec<Source>>,
}

/// Index of `port` among the signal ports of `rates`.
fn signal_ordinal(rates: &[Rate], port: usize) -> usize {
    rates[..port].iter().filter(|r| **r == Rate::Signal).count()
}

impl Schedule {
    /// Flatten the tree under `root` and order it.
    pub fn build(root: &Patch) -> Result<Self> {
        let mut vertices = Vec::new();
        collect_vertices(root, &mut Vec::new(), &mut vertices);
        let by_node: HashMap<NodeId, usize> = vertices
            .iter()
            .enumerate()
            .map(|(index, vertex)| (vertex.node, index))
            .collect();

        let mut graph = DiGraph::<usize, ()>::with_capacity(vertices.len(), vertices.len());
        let indices: Vec<NodeIndex> = (0..vertices.len()).map(|v| graph.add_node(v)).collect();

        let mut vertex_sources = Vec::with_capacity(vertices.len());
        for (v, vertex) in vertices.iter().enumerate() {
            let (container, local) = vertex.path.split_at(vertex.path.len() - 1);
            let mut per_inlet = Vec::with_capacity(vertex.signal_inlets.len());
            for &inlet in &vertex.signal_inlets {
                let mut found = Vec::new();
                let mut visiting = Vec::new();
                resolve_into(root, container, local[0], inlet, &mut found, &mut visiting)?;

                let mut sources = Vec::with_capacity(found.len());
                for (node, ordinal) in found {
                    // Only signal objects have signal outlets, so this always hits
                    if let Some(&src) = by_node.get(&node) {
                        sources.push((src, ordinal));
                        if !vertex.breaker {
                            graph.add_edge(indices[src], indices[v], ());
                        }
                    }
                }
                per_inlet.push(sources);
            }
            vertex_sources.push(per_inlet);
        }

        check_outlet_proxies(root, root, &mut Vec::new())?;

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(_) => return Err(cycle_error(&graph, &vertices)),
        };

        let mut root_outputs = Vec::new();
        for (port, rate) in root.outlet_rates().iter().enumerate() {
            if *rate != Rate::Signal {
                continue;
            }
            let mut found = Vec::new();
            resolve_into(root, &[], root.outlets[port], 0, &mut found, &mut Vec::new())?;
            root_outputs.push(found);
        }

        // Renumber from vertex indices to step positions
        let mut step_of = vec![0; vertices.len()];
        for (step, index) in order.iter().enumerate() {
            step_of[graph[*index]] = step;
        }
        let renumber = |sources: Vec<(NodeId, usize)>| -> Vec<Source> {
            sources
                .into_iter()
                .filter_map(|(node, ordinal)| by_node.get(&node).map(|v| (step_of[*v], ordinal)))
                .collect()
        };
        let root_outputs = root_outputs.into_iter().map(renumber).collect();

        let mut slots: Vec<Option<(Vertex, Vec<Vec<Source>>)>> =
            vertices.into_iter().zip(vertex_sources).map(Some).collect();
        let mut steps = Vec::with_capacity(order.len());
        let mut inputs = Vec::with_capacity(order.len());
        let mut outputs = Vec::with_capacity(order.len());
        for index in &order {
            let Some((vertex, sources)) = slots[graph[*index]].take() else {
                continue;
            };
            inputs.push(vec![SignalBlock::default(); vertex.signal_inlets.len()]);
            outputs.push(vec![SignalBlock::default(); vertex.signal_outlets]);
            steps.push(Step {
                node: vertex.node,
                path: vertex.path,
                sources: sources
                    .into_iter()
                    .map(|inlet| inlet.into_iter().map(|(v, o)| (step_of[v], o)).collect())
                    .collect(),
                breaker: vertex.breaker,
            });
        }
        let by_node = steps.iter().enumerate().map(|(i, s)| (s.node, i)).collect();

        debug!(root = %root.id, steps = steps.len(), "compiled signal schedule");
        Ok(Self {
            steps,
            inputs,
            outputs,
            by_node,
            root_outputs,
        })
    }

    /// Node ids in processing order.
    pub fn order(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.steps.iter().map(|s| s.node)
    }

    /// Carry block buffers over from the schedule this one replaces, so
    /// delays keep their state across topology edits.
    pub fn inherit(&mut self, previous: &mut Schedule) {
        for (step, s) in self.steps.iter().enumerate() {
            let Some(&old) = previous.by_node.get(&s.node) else {
                continue;
            };
            if previous.inputs[old].len() == self.inputs[step].len() {
                core::mem::swap(&mut self.inputs[step], &mut previous.inputs[old]);
            }
            if previous.outputs[old].len() == self.outputs[step].len() {
                core::mem::swap(&mut self.outputs[step], &mut previous.outputs[old]);
            }
        }
    }

    /// Run every step once.
    pub fn run(&mut self, root: &mut Patch, ctx: &ProcessContext) -> Result<()> {
        let len = ctx.block_size;
        for step in 0..self.steps.len() {
            if self.steps[step].breaker {
                for block in &mut self.inputs[step] {
                    if block.len() != len {
                        block.clear(len);
                    }
                }
            } else {
                self.gather(step, len);
            }
            for block in &mut self.outputs[step] {
                block.clear(len);
            }

            let Schedule {
                steps,
                inputs,
                outputs,
                ..
            } = self;
            let Some(Object { node, .. }) = root.running_object_mut(&steps[step].path) else {
                continue;
            };
            node.process_block(ctx, &inputs[step], &mut outputs[step])
                .map_err(|source| GraphError::Node {
                    node: steps[step].node,
                    source,
                })?;
        }

        for step in 0..self.steps.len() {
            if self.steps[step].breaker {
                self.gather(step, len);
            }
        }
        Ok(())
    }

    /// Sum the current outputs feeding each signal inlet of `step`.
    fn gather(&mut self, step: usize, len: usize) {
        let Schedule {
            steps,
            inputs,
            outputs,
            ..
        } = self;
        for (block, sources) in inputs[step].iter_mut().zip(&steps[step].sources) {
            block.clear(len);
            for &(src, ordinal) in sources {
                block.accumulate(&outputs[src][ordinal]);
            }
        }
    }

    /// Latest block of one signal outlet, by ordinal.
    pub fn output(&self, node: NodeId, ordinal: usize) -> Option<&SignalBlock> {
        let step = *self.by_node.get(&node)?;
        self.outputs[step].get(ordinal)
    }

    /// Add the root patch's signal outlets into the output channels.
    pub fn mix_into(&self, channels: &mut [SignalBlock]) {
        for (channel, sources) in channels.iter_mut().zip(&self.root_outputs) {
            for &(src, ordinal) in sources {
                channel.accumulate(&self.outputs[src][ordinal]);
            }
        }
    }
}

fn collect_vertices(patch: &Patch, path: &mut Vec<usize>, out: &mut Vec<Vertex>) {
    for (index, slot) in patch.children() {
        path.push(index);
        match slot {
            Slot::Patch(child) => collect_vertices(child, path, out),
            Slot::Object(object) if object.proxy.is_none() && object.node.is_signal() => {
                let inlets = object.node.inlets();
                let outlets = object.node.outlets();
                out.push(Vertex {
                    node: object.id,
                    label: format!("{}#{}", object.type_name, object.id.0),
                    path: path.clone(),
                    breaker: object.node.breaks_signal_cycles(),
                    signal_inlets: (0..inlets.len()).filter(|i| inlets[*i] == Rate::Signal).collect(),
                    signal_outlets: outlets.iter().filter(|r| **r == Rate::Signal).count(),
                });
            }
            Slot::Object(_) => {}
        }
        path.pop();
    }
}

/// Resolve every `outlet~` in the tree, so a loop made only of patch ports
/// fails even when no signal object reads from it.
fn check_outlet_proxies(root: &Patch, patch: &Patch, path: &mut Vec<usize>) -> Result<()> {
    for (port, rate) in patch.outlet_rates().iter().enumerate() {
        if *rate == Rate::Signal {
            resolve_into(root, path, patch.outlets[port], 0, &mut Vec::new(), &mut Vec::new())?;
        }
    }
    for (index, slot) in patch.children() {
        if let Slot::Patch(child) = slot {
            path.push(index);
            check_outlet_proxies(root, child, path)?;
            path.pop();
        }
    }
    Ok(())
}

/// Collect the real signal outlets feeding `inlet` of child `sink` of the
/// patch at `container`, looking through proxies in both directions.
pub(crate) fn resolve_into(
    root: &Patch,
    container: &[usize],
    sink: usize,
    inlet: usize,
    found: &mut Vec<(NodeId, usize)>,
    visiting: &mut Vec<(Vec<usize>, usize, usize)>,
) -> Result<()> {
    let key = (container.to_vec(), sink, inlet);
    if visiting.contains(&key) {
        // Proxies wired into a loop with no object in between
        let patch = root.descend(container).map_or(root.id, |p| p.id);
        return Err(GraphError::UnresolvableSignalCycle {
            nodes: vec![patch.to_string()],
        });
    }
    visiting.push(key);

    let Some(patch) = root.descend(container) else {
        visiting.pop();
        return Ok(());
    };
    let feeding: Vec<(usize, usize)> = patch.sources(sink, inlet).collect();
    for (source, outlet) in feeding {
        match patch.slot(source) {
            Some(Slot::Object(object)) => match object.proxy {
                Some(proxy) if proxy.direction == Direction::In => {
                    // Signal entering this patch from its parent; the root's inlets stay silent
                    let port = patch.port_of_proxy(source, Direction::In);
                    if let (Some((&here, parent)), Some(port)) = (container.split_last(), port) {
                        resolve_into(root, parent, here, port, found, visiting)?;
                    }
                }
                Some(_) => {}
                None => {
                    let ordinal = signal_ordinal(object.node.outlets(), outlet);
                    if object.node.outlets().get(outlet) == Some(&Rate::Signal) {
                        found.push((object.id, ordinal));
                    }
                }
            },
            Some(Slot::Patch(child)) => {
                if let Some(&proxy) = child.outlets.get(outlet) {
                    let mut inner = container.to_vec();
                    inner.push(source);
                    resolve_into(root, &inner, proxy, 0, found, visiting)?;
                }
            }
            None => {}
        }
    }

    visiting.pop();
    Ok(())
}

fn cycle_error(graph: &DiGraph<usize, ()>, vertices: &[Vertex]) -> GraphError {
    let nodes = tarjan_scc(graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || graph.contains_edge(component[0], component[0])
        })
        .flatten()
        .map(|index| vertices[graph[index]].label.clone())
        .sorted()
        .collect_vec();
    GraphError::UnresolvableSignalCycle { nodes }
}
