//! Message values.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A single message element: a float or a symbol.
///
/// Messages are plain `[Atom]` slices. Atoms serialize untagged, so a JSON
/// message looks like `["bang", 1.5]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Atom {
    Float(f32),
    Symbol(String),
}

impl Atom {
    /// The float value, if this is a float.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Atom::Float(f) => Some(*f),
            Atom::Symbol(_) => None,
        }
    }

    /// The symbol value, if this is a symbol.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Atom::Float(_) => None,
            Atom::Symbol(s) => Some(s),
        }
    }
}

impl From<f32> for Atom {
    fn from(f: f32) -> Self {
        Atom::Float(f)
    }
}

impl From<i32> for Atom {
    fn from(i: i32) -> Self {
        Atom::Float(i as f32)
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::Symbol(s.to_owned())
    }
}

impl From<String> for Atom {
    fn from(s: String) -> Self {
        Atom::Symbol(s)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Float(v) => write!(f, "{}", v),
            Atom::Symbol(s) => f.write_str(s),
        }
    }
}

/// Build a `Vec<Atom>` from mixed literals.
///
/// ```
/// use klingt_pd::{atoms, Atom};
/// assert_eq!(atoms!["x", 1], vec![Atom::Symbol("x".into()), Atom::Float(1.0)]);
/// ```
#[macro_export]
macro_rules! atoms {
    () => { ::std::vec::Vec::<$crate::Atom>::new() };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Atom::from($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_from_literals() {
        assert_eq!(Atom::from(3), Atom::Float(3.0));
        assert_eq!(Atom::from("bang").as_symbol(), Some("bang"));
        assert_eq!(Atom::from(0.5f32).as_float(), Some(0.5));
        assert_eq!(Atom::from("bang").as_float(), None);
    }

    #[test]
    fn untagged_json() {
        let atoms: Vec<Atom> = serde_json::from_str(r#"["bla", 888]"#).unwrap();
        assert_eq!(atoms, atoms!["bla", 888]);
    }
}
