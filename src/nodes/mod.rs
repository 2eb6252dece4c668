//! Built-in node types.
//!
//! Nodes are organized into three groups:
//!
//! ## Proxies ([`ProxyNode`])
//!
//! `inlet`, `outlet`, `inlet~` and `outlet~` give a patch its ports. They are
//! created by the engine itself and are not part of the [`Library`].
//!
//! ## Control ([`control`])
//!
//! Message-rate nodes:
//! - [`Send`] (`send`, `s`) - Forward messages to a named route
//! - [`Receive`] (`receive`, `r`) - Output messages arriving on a named route
//! - [`Print`] (`print`) - Log messages through `tracing`
//!
//! ## Signal ([`signal`])
//!
//! Block-rate nodes:
//! - [`Constant`] (`sig~`) - Constant signal, set by float messages
//! - [`Binop`] (`+~`, `*~`) - Sample-wise sum and product
//! - [`BlockDelay`] (`z~`) - One-block delay, the only way to close a signal loop

pub mod control;
pub mod signal;
mod proxy;

pub use control::{Print, Receive, Send};
pub use proxy::ProxyNode;
pub use signal::{Binop, BinopKind, BlockDelay, Constant};

use crate::library::Library;

/// Register every built-in type (proxies excluded) in `library`.
pub fn register_builtins(library: &mut Library) {
    library.register("send", |args| Ok(Box::new(Send::new(args))));
    library.register("s", |args| Ok(Box::new(Send::new(args))));
    library.register("receive", |args| Ok(Box::new(Receive::new(args))));
    library.register("r", |args| Ok(Box::new(Receive::new(args))));
    library.register("print", |args| Ok(Box::new(Print::new(args))));

    library.register("sig~", |args| Ok(Box::new(Constant::new(args)?)));
    library.register("+~", |args| Ok(Box::new(Binop::new(BinopKind::Add, args)?)));
    library.register("*~", |args| Ok(Box::new(Binop::new(BinopKind::Mul, args)?)));
    library.register("z~", |_| Ok(Box::new(BlockDelay::new())));
}
