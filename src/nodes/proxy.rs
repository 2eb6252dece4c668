//! Patch port proxies

use crate::atom::Atom;
use crate::error::NodeError;
use crate::node::{MessageContext, Node};
use crate::patch::Direction;
use crate::port::Rate;

/// The inside end of a patch port.
///
/// An inlet proxy has one outlet and an outlet proxy one inlet. Messages
/// and signals pass through them without the proxy itself doing any work:
/// the engine forwards messages and the schedule resolves signal
/// connections straight through.
pub struct ProxyNode {
    direction: Direction,
    port: [Rate; 1],
}

impl ProxyNode {
    pub(crate) fn new(direction: Direction, rate: Rate) -> Self {
        Self {
            direction,
            port: [rate],
        }
    }

    pub fn rate(&self) -> Rate {
        self.port[0]
    }
}

impl Node for ProxyNode {
    fn inlets(&self) -> &[Rate] {
        match self.direction {
            Direction::In => &[],
            Direction::Out => &self.port,
        }
    }

    fn outlets(&self) -> &[Rate] {
        match self.direction {
            Direction::In => &self.port,
            Direction::Out => &[],
        }
    }

    fn handle_message(&mut self, _inlet: usize, _atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        Ok(())
    }

    #[inline]
    fn is_signal(&self) -> bool {
        false
    }
}
