//! `print`: message logging

use itertools::Itertools;
use tracing::info;

use crate::atom::Atom;
use crate::error::NodeError;
use crate::node::{MessageContext, Node};
use crate::port::Rate;

/// Logs every message at `info` level, prefixed by its first argument
/// (`print` when there is none).
pub struct Print {
    prefix: String,
}

impl Print {
    pub fn new(args: &[Atom]) -> Self {
        let prefix = if args.is_empty() {
            "print".to_owned()
        } else {
            args.iter().join(" ")
        };
        Self { prefix }
    }
}

impl Node for Print {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn outlets(&self) -> &[Rate] {
        &[]
    }

    fn handle_message(&mut self, _inlet: usize, atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        info!(target: "klingt_pd::print", "{}: {}", self.prefix, atoms.iter().join(" "));
        Ok(())
    }
}
