//! `send` and `receive`: the two ends of a named route.

use crate::atom::Atom;
use crate::error::NodeError;
use crate::node::{MessageContext, NamedRoute, Node, RouteRole};
use crate::port::Rate;

/// First symbol argument, or no name.
fn name_from_args(args: &[Atom]) -> String {
    args.first()
        .and_then(Atom::as_symbol)
        .unwrap_or_default()
        .to_owned()
}

/// Forwards everything on its left inlet to the named route.
///
/// The right inlet renames the route: `symbol <name>` or a bare symbol.
/// A send with no name drops its messages.
pub struct Send {
    name: String,
}

impl Send {
    pub fn new(args: &[Atom]) -> Self {
        Self {
            name: name_from_args(args),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Node for Send {
    fn inlets(&self) -> &[Rate] {
        &[Rate::Message, Rate::Message]
    }

    fn outlets(&self) -> &[Rate] {
        &[]
    }

    fn handle_message(&mut self, inlet: usize, atoms: &[Atom], ctx: &mut MessageContext) -> Result<(), NodeError> {
        match inlet {
            0 => {
                if !self.name.is_empty() {
                    ctx.send(self.name.clone(), atoms);
                }
                Ok(())
            }
            _ => {
                let name = match atoms {
                    [Atom::Symbol(selector), Atom::Symbol(name), ..] if selector == "symbol" => name,
                    [Atom::Symbol(name)] => name,
                    _ => return Err(NodeError::new("send: right inlet expects a symbol")),
                };
                ctx.rename(name.clone());
                Ok(())
            }
        }
    }

    fn route(&self) -> Option<NamedRoute> {
        Some(NamedRoute {
            role: RouteRole::Sender,
            name: self.name.clone(),
        })
    }

    fn set_route_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }
}

/// Outputs every message sent on its route.
pub struct Receive {
    name: String,
}

impl Receive {
    pub fn new(args: &[Atom]) -> Self {
        Self {
            name: name_from_args(args),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Node for Receive {
    fn inlets(&self) -> &[Rate] {
        &[]
    }

    fn outlets(&self) -> &[Rate] {
        &[Rate::Message]
    }

    fn handle_message(&mut self, _inlet: usize, _atoms: &[Atom], _ctx: &mut MessageContext) -> Result<(), NodeError> {
        Ok(())
    }

    fn route(&self) -> Option<NamedRoute> {
        Some(NamedRoute {
            role: RouteRole::Receiver,
            name: self.name.clone(),
        })
    }

    fn set_route_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn receive_named(&mut self, atoms: &[Atom], ctx: &mut MessageContext) -> Result<(), NodeError> {
        ctx.emit(0, atoms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms;
    use crate::node::Action;

    #[test]
    fn send_forwards_and_renames() {
        let mut send = Send::new(&atoms!["no1"]);
        let mut ctx = MessageContext::default();
        send.handle_message(0, &atoms![1, 2], &mut ctx).unwrap();
        send.handle_message(1, &atoms!["symbol", "no2"], &mut ctx).unwrap();
        send.handle_message(1, &atoms!["no3"], &mut ctx).unwrap();

        assert_eq!(
            ctx.take(),
            vec![
                Action::Send {
                    name: "no1".into(),
                    atoms: atoms![1, 2]
                },
                Action::Rename { name: "no2".into() },
                Action::Rename { name: "no3".into() },
            ]
        );
        assert!(send.handle_message(1, &atoms![5], &mut ctx).is_err());
    }

    #[test]
    fn unnamed_send_is_silent() {
        let mut send = Send::new(&[]);
        let mut ctx = MessageContext::default();
        send.handle_message(0, &atoms!["bang"], &mut ctx).unwrap();
        assert!(ctx.take().is_empty());
    }
}
