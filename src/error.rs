use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors reported by the layer graph engine and the legacy importer.
#[derive(Debug)]
#[non_exhaustive]
pub enum NetError {
    /// The graph was configured inconsistently: duplicate or invalid layer
    /// names, missing layers, an input pin bound twice, a cycle.
    Config(String),

    /// Tensor shapes did not line up during shape inference, input binding
    /// or in-place aliasing.
    Shape(String),

    /// A layer type or legacy class has no implementation.
    NotImplemented(String),

    /// A legacy serialized module stream was malformed.
    Import(String),

    /// An IO error occurred while reading an input stream.
    Io(std::io::Error),
}

impl Display for NetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NetError::Config(msg) => write!(f, "configuration error: {msg}"),
            NetError::Shape(msg) => write!(f, "shape error: {msg}"),
            NetError::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
            NetError::Import(msg) => write!(f, "import error: {msg}"),
            NetError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl Error for NetError {}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::Io(err)
    }
}
