//! klingt-pd - Pure Data style patch engine
//!
//! Design principles:
//! - Patches are nodes: a `pd` subpatch exposes its `inlet`/`outlet` proxies as ports
//! - Messages are synchronous and depth-first; signals are processed once per block
//! - Named routes (`send`/`receive`) connect nodes anywhere in the engine
//! - Signal cycles need a `z~`, and are rejected at connect time otherwise
//! - No locks on the processing path; other threads talk to the engine through rtrb queues
//!
//! ```
//! use klingt_pd::{atoms, Engine, PatchDescription};
//!
//! let mut engine = Engine::default();
//! let description = PatchDescription::new()
//!     .node(0, "sig~", atoms![0.25f32])
//!     .node(1, "*~", atoms![2])
//!     .node(2, "outlet~", atoms![])
//!     .connect(0, 0, 1, 0)
//!     .connect(1, 0, 2, 0);
//! let patch = engine.load_patch(&description).unwrap();
//!
//! engine.start();
//! engine.tick(64).unwrap();
//! assert_eq!(engine.outlets(patch).unwrap().len(), 1);
//! ```

mod atom;
mod backend;
mod builder;
mod config;
mod engine;
mod error;
mod library;
mod node;
mod patch;
mod port;
mod registry;
mod schedule;
pub mod nodes;

pub use atom::Atom;
pub use backend::{AudioBackend, NullBackend, RtrbBackend};
#[cfg(feature = "cpal_sink")]
pub use backend::{CpalBackend, CpalDevice};
pub use builder::{ConnectionDescription, NodeDescription, PatchDescription, PortDescription};
pub use config::EngineConfig;
pub use engine::{ControlMessage, ControlSender, Engine};
pub use error::{GraphError, NodeError, Result};
pub use library::{Library, NodeFactory};
pub use node::{MessageContext, NamedRoute, Node, NodeId, ProcessContext, RouteRole};
pub use patch::SUBPATCH;
pub use port::{accumulate_signal, ConnectionId, Inlet, Outlet, Rate, SignalBlock};
pub use registry::{CallbackId, NamedRegistry, ReceiveCallback, Receiver};
