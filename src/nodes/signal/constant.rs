//! `sig~`: message to signal conversion

use crate::atom::Atom;
use crate::error::NodeError;
use crate::node::{MessageContext, Node, ProcessContext};
use crate::port::{Rate, SignalBlock};

/// Outputs a constant signal. A float on the inlet sets the value.
pub struct Constant {
    value: f32,
}

impl Constant {
    pub fn new(args: &[Atom]) -> Result<Self, NodeError> {
        let value = match args.first() {
            None => 0.0,
            Some(arg) => arg
                .as_float()
                .ok_or_else(|| NodeError::new(format!("sig~: invalid value '{arg}'")))?,
        };
        Ok(Self { value })
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

impl Node for Constant {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn outlets(&self) -> &[Rate] {
        &[Rate::Signal]
    }

    fn handle_message(&mut self, _inlet: usize, atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        self.value = atoms
            .first()
            .and_then(Atom::as_float)
            .ok_or_else(|| NodeError::new("sig~: expected a float"))?;
        Ok(())
    }

    fn process_block(
        &mut self,
        _ctx: &ProcessContext,
        _inputs: &[SignalBlock],
        outputs: &mut [SignalBlock],
    ) -> Result<(), NodeError> {
        outputs[0].fill(self.value);
        Ok(())
    }
}
