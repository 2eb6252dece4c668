//! Block-rate nodes

mod binop;
mod constant;
mod delay;

pub use binop::{Binop, BinopKind};
pub use constant::Constant;
pub use delay::BlockDelay;
