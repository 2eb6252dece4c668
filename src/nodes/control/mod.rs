//! Message-rate nodes

mod print;
mod route;

pub use print::Print;
pub use route::{Receive, Send};
