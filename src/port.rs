//! Ports, connections and signal blocks.

use core::ops::{Deref, DerefMut};

use crate::node::NodeId;

/// Rate of a port, fixed when the node type is defined.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Rate {
    /// Control messages, delivered synchronously
    Message,
    /// Audio, delivered once per block
    Signal,
}

/// An input port: node plus inlet index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Inlet {
    pub node: NodeId,
    pub index: usize,
}

/// An output port: node plus outlet index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Outlet {
    pub node: NodeId,
    pub index: usize,
}

/// Handle to a connection, returned by `connect`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConnectionId(pub(crate) u64);

/// A directed edge between two siblings, stored by their parent patch.
///
/// Endpoints are arena slots local to the owning patch.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Connection {
    pub id: ConnectionId,
    pub rate: Rate,
    pub source: usize,
    pub outlet: usize,
    pub sink: usize,
    pub inlet: usize,
}

/// One block of samples for a single port.
///
/// Blocks are plain owned buffers; the length is the block size of the tick
/// that produced them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignalBlock(Vec<f32>);

impl SignalBlock {
    /// A silent block of `len` samples
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn from_samples(samples: impl Into<Vec<f32>>) -> Self {
        Self(samples.into())
    }

    /// Resize to `len` and zero every sample, keeping the allocation.
    pub fn clear(&mut self, len: usize) {
        self.0.clear();
        self.0.resize(len, 0.0);
    }

    /// Sample-wise sum; samples past the shorter block are left untouched.
    pub fn accumulate(&mut self, other: &SignalBlock) {
        for (out, &sample) in self.0.iter_mut().zip(other.0.iter()) {
            *out += sample;
        }
    }

    /// Copy `other` into this block, resizing to match.
    pub fn copy_from(&mut self, other: &SignalBlock) {
        self.0.clear();
        self.0.extend_from_slice(&other.0);
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl Deref for SignalBlock {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl DerefMut for SignalBlock {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.0
    }
}

/// Sum the blocks feeding one inlet. No sources gives a zero block.
pub fn accumulate_signal<'a>(
    sources: impl IntoIterator<Item = &'a SignalBlock>,
    block_size: usize,
) -> SignalBlock {
    let mut sum = SignalBlock::zeroed(block_size);
    for block in sources {
        sum.accumulate(block);
    }
    sum
}
