// Copyright 2020 Joyent, Inc.

//! Commands sent to store and sentinel nodes, and the replies they produce.
//!
//! A [`Command`](struct.Command.html) is an ordered list of string tokens and
//! a [`Reply`](enum.Reply.html) is the recursive structure a node answers
//! with. Encoding either of them on the wire is up to the
//! [`Connection`](../connection/trait.Connection.html) implementation.

use std::fmt;

/// An ordered sequence of string tokens, the first one being the command
/// name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command(Vec<String>);

impl Command {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Command(vec![name.into()])
    }

    /// Append an argument token.
    pub fn arg<S: ToString>(mut self, arg: S) -> Self {
        self.0.push(arg.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.0[0]
    }

    /// All tokens, including the command name.
    pub fn tokens(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.0.join(" ").fmt(fmt)
    }
}

/// A reply from a store or sentinel node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// A status line such as `OK` or `PONG`.
    Status(String),
    /// A bulk string.
    Str(String),
    Integer(i64),
    /// The absence of a value.
    Nil,
    /// An error reported by the node.
    Error(String),
    Array(Vec<Reply>),
}

impl Reply {
    /// The string payload of a status or bulk string reply.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Status(s) | Reply::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The elements of an array reply. Any other reply has no elements.
    pub fn elements(&self) -> &[Reply] {
        match self {
            Reply::Array(elements) => elements,
            _ => &[],
        }
    }

    pub fn at(&self, index: usize) -> Option<&Reply> {
        self.elements().get(index)
    }

    /// The string payload of the element at `index`, if there is one.
    pub fn str_at(&self, index: usize) -> Option<&str> {
        self.at(index).and_then(Reply::as_str)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reply::Status(s) => s.fmt(fmt),
            Reply::Str(s) => write!(fmt, "\"{}\"", s),
            Reply::Integer(i) => write!(fmt, "(integer) {}", i),
            Reply::Nil => "(nil)".fmt(fmt),
            Reply::Error(e) => write!(fmt, "(error) {}", e),
            Reply::Array(elements) => {
                write!(fmt, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(fmt, ", ")?;
                    }
                    write!(fmt, "{}", element)?;
                }
                write!(fmt, "]")
            }
        }
    }
}
