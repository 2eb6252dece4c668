//! `+~` and `*~`

use crate::atom::Atom;
use crate::error::NodeError;
use crate::node::{MessageContext, Node, ProcessContext};
use crate::port::{Rate, SignalBlock};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinopKind {
    Add,
    Mul,
}

impl BinopKind {
    #[inline]
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinopKind::Add => a + b,
            BinopKind::Mul => a * b,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BinopKind::Add => "+~",
            BinopKind::Mul => "*~",
        }
    }
}

/// Combines two signals sample by sample.
///
/// With a float creation argument the right inlet becomes a message inlet
/// holding a scalar (initially the argument), as in Pd.
pub struct Binop {
    kind: BinopKind,
    /// Set when the right operand is a scalar
    scalar: Option<f32>,
}

impl Binop {
    pub fn new(kind: BinopKind, args: &[Atom]) -> Result<Self, NodeError> {
        let scalar = match args.first() {
            None => None,
            Some(arg) => Some(
                arg.as_float()
                    .ok_or_else(|| NodeError::new(format!("{}: invalid argument '{arg}'", kind.name())))?,
            ),
        };
        Ok(Self { kind, scalar })
    }
}

impl Node for Binop {
    fn inlets(&self) -> &[Rate] {
        match self.scalar {
            Some(_) => &[Rate::Signal, Rate::Message],
            None => &[Rate::Signal, Rate::Signal],
        }
    }

    fn outlets(&self) -> &[Rate] {
        &[Rate::Signal]
    }

    fn handle_message(&mut self, inlet: usize, atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        let value = atoms.first().and_then(Atom::as_float);
        match (inlet, self.scalar.as_mut(), value) {
            (1, Some(scalar), Some(value)) => {
                *scalar = value;
                Ok(())
            }
            _ => Err(NodeError::new(format!(
                "{}: no method for message on inlet {inlet}",
                self.kind.name()
            ))),
        }
    }

    fn process_block(
        &mut self,
        _ctx: &ProcessContext,
        inputs: &[SignalBlock],
        outputs: &mut [SignalBlock],
    ) -> Result<(), NodeError> {
        let left = &inputs[0];
        let out = &mut outputs[0];
        match self.scalar {
            Some(right) => {
                for (o, a) in out.iter_mut().zip(left.iter()) {
                    *o = self.kind.apply(*a, right);
                }
            }
            None => {
                let right = &inputs[1];
                for ((o, a), b) in out.iter_mut().zip(left.iter()).zip(right.iter()) {
                    *o = self.kind.apply(*a, *b);
                }
            }
        }
        Ok(())
    }
}
