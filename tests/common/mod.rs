#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use klingt_pd::{Atom, MessageContext, NamedRoute, Node, NodeError, ProcessContext, Rate, RouteRole, SignalBlock};

pub type Log = Arc<Mutex<Vec<(String, Vec<Atom>)>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Messages a mailbox labelled `label` received, in order.
pub fn received(log: &Log, label: &str) -> Vec<Vec<Atom>> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(l, _)| l == label)
        .map(|(_, atoms)| atoms.clone())
        .collect()
}

/// Labels in the order their mailboxes were hit.
pub fn labels(log: &Log) -> Vec<String> {
    log.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
}

/// Records every message, then passes it on.
pub struct Mailbox {
    label: String,
    log: Log,
}

impl Mailbox {
    pub fn new(label: &str, log: &Log) -> Self {
        Self {
            label: label.to_owned(),
            log: log.clone(),
        }
    }
}

impl Node for Mailbox {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn outlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn handle_message(&mut self, _inlet: usize, atoms: &[Atom], ctx: &mut MessageContext) -> Result<(), NodeError> {
        self.log.lock().unwrap().push((self.label.clone(), atoms.to_vec()));
        ctx.emit(0, atoms);
        Ok(())
    }
}

/// Outputs `n - 1` for every positive `n`.
pub struct Countdown;

impl Node for Countdown {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn outlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn handle_message(&mut self, _inlet: usize, atoms: &[Atom], ctx: &mut MessageContext) -> Result<(), NodeError> {
        let n = atoms
            .first()
            .and_then(Atom::as_float)
            .ok_or_else(|| NodeError::new("countdown: expected a float"))?;
        if n > 0.0 {
            ctx.emit(0, vec![Atom::Float(n - 1.0)]);
        }
        Ok(())
    }
}

/// Emits a fixed list of `(outlet, atoms)` on every message, in order.
pub struct Script {
    outlets: Vec<Rate>,
    steps: Vec<(usize, Vec<Atom>)>,
}

impl Script {
    pub fn new(steps: Vec<(usize, Vec<Atom>)>) -> Self {
        let outlets = steps.iter().map(|(outlet, _)| outlet + 1).max().unwrap_or(0);
        Self {
            outlets: vec![Rate::Message; outlets],
            steps,
        }
    }
}

impl Node for Script {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn outlets(&self) -> &[Rate] {
        &self.outlets
    }

    fn handle_message(&mut self, _inlet: usize, _atoms: &[Atom], ctx: &mut MessageContext) -> Result<(), NodeError> {
        for (outlet, atoms) in &self.steps {
            ctx.emit(*outlet, atoms.clone());
        }
        Ok(())
    }
}

/// A receiver on a named route that logs what arrives; a symbol on its
/// inlet moves it to that name.
pub struct Listener {
    name: String,
    mailbox: Mailbox,
}

impl Listener {
    pub fn new(name: &str, label: &str, log: &Log) -> Self {
        Self {
            name: name.to_owned(),
            mailbox: Mailbox::new(label, log),
        }
    }
}

impl Node for Listener {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn outlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn handle_message(&mut self, _inlet: usize, atoms: &[Atom], ctx: &mut MessageContext) -> Result<(), NodeError> {
        let name = atoms
            .first()
            .and_then(Atom::as_symbol)
            .ok_or_else(|| NodeError::new("listener: expected a name"))?;
        ctx.rename(name);
        Ok(())
    }

    fn route(&self) -> Option<NamedRoute> {
        Some(NamedRoute {
            role: RouteRole::Receiver,
            name: self.name.clone(),
        })
    }

    fn set_route_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn receive_named(&mut self, atoms: &[Atom], ctx: &mut MessageContext) -> Result<(), NodeError> {
        self.mailbox.handle_message(0, atoms, ctx)
    }
}

/// Fails on every message.
pub struct Failing;

impl Node for Failing {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn outlets(&self) -> &[Rate] {
        &[]
    }

    fn handle_message(&mut self, _inlet: usize, _atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        Err(NodeError::new("boom"))
    }
}

/// Outputs the same samples every block, zero padded to the block size.
pub struct Samples(pub Vec<f32>);

impl Node for Samples {
    fn inlets(&self) -> &[Rate] {
        &[]
    }

    fn outlets(&self) -> &[Rate] {
        &[Rate::Signal]
    }

    fn handle_message(&mut self, _inlet: usize, _atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        Ok(())
    }

    fn process_block(
        &mut self,
        _ctx: &ProcessContext,
        _inputs: &[SignalBlock],
        outputs: &mut [SignalBlock],
    ) -> Result<(), NodeError> {
        for (out, sample) in outputs[0].iter_mut().zip(&self.0) {
            *out = *sample;
        }
        Ok(())
    }
}

pub type Blocks = Arc<Mutex<Vec<Vec<f32>>>>;

/// Records every block arriving on its signal inlet.
pub struct Probe {
    blocks: Blocks,
}

impl Probe {
    pub fn new() -> (Self, Blocks) {
        let blocks = Blocks::default();
        (Self { blocks: blocks.clone() }, blocks)
    }
}

impl Node for Probe {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Signal]
    }

    fn outlets(&self) -> &[Rate] {
        &[]
    }

    fn handle_message(&mut self, _inlet: usize, _atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        Ok(())
    }

    fn process_block(
        &mut self,
        _ctx: &ProcessContext,
        inputs: &[SignalBlock],
        _outputs: &mut [SignalBlock],
    ) -> Result<(), NodeError> {
        self.blocks.lock().unwrap().push(inputs[0].to_vec());
        Ok(())
    }
}

/// Counts start and stop calls.
pub struct Lifecycle {
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            starts: Arc::default(),
            stops: Arc::default(),
        }
    }
}

impl Node for Lifecycle {
    fn inlets(&self) -> &[Rate] {
        &[]
    }

    fn outlets(&self) -> &[Rate] {
        &[]
    }

    fn handle_message(&mut self, _inlet: usize, _atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        Ok(())
    }

    fn start(&mut self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Route engine logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}
