//! A small dataflow graph engine
//!
//! Graphs are built bottom-up through [`ops`] with a [`BuildContext`] that owns the
//! naming and variable sharing state, then run by a [`Session`].

mod context;
mod node;
pub mod ops;
mod session;
mod shape;

use thiserror::Error;

pub use context::{BuildContext, Initializer};
pub use node::{DimSource, Graph, Node, NodeId, Op, Tensor, Variable, VariableId};
pub use ops::DimRef;
pub use session::{HostTensor, Session};
pub use shape::{DType, Dim, Shape};

/// Errors raised while building or running a graph
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("shape error in {op}: {message}")]
    Shape { op: String, message: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("variable {name} already exists, reuse the scope to share it")]
    VariableExists { name: String },
    #[error("variable {name} does not exist with the requested shape, cannot reuse it")]
    VariableMissing { name: String },
    #[error("placeholder {name} must be fed")]
    MissingFeed { name: String },
    #[error("node {id} is not part of this graph")]
    UnknownNode { id: usize },
}

impl GraphError {
    pub(crate) fn shape(op: &str, message: impl Into<String>) -> Self {
        GraphError::Shape {
            op: op.to_string(),
            message: message.into(),
        }
    }
}
