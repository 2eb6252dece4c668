//! `z~`: one-block delay

use crate::atom::Atom;
use crate::error::NodeError;
use crate::node::{MessageContext, Node, ProcessContext};
use crate::port::{Rate, SignalBlock};

/// Outputs the block its inlet received during the previous tick.
///
/// Edges into a `z~` are ignored when ordering signal nodes, so it is how a
/// signal feedback loop is closed.
#[derive(Default)]
pub struct BlockDelay;

impl BlockDelay {
    pub fn new() -> Self {
        Self
    }
}

impl Node for BlockDelay {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Signal]
    }

    fn outlets(&self) -> &[Rate] {
        &[Rate::Signal]
    }

    fn handle_message(&mut self, _inlet: usize, _atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        Err(NodeError::new("z~: no method for messages"))
    }

    fn process_block(
        &mut self,
        _ctx: &ProcessContext,
        inputs: &[SignalBlock],
        outputs: &mut [SignalBlock],
    ) -> Result<(), NodeError> {
        // The schedule hands a delay the inputs captured at the end of the last block
        outputs[0].copy_from(&inputs[0]);
        Ok(())
    }

    fn breaks_signal_cycles(&self) -> bool {
        true
    }
}
