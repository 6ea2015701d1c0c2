//! Recurrent cells and their unrolling over timestep sequences

mod cells;
mod unroll;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::graph::{BuildContext, DType, GraphError, Tensor};

pub use cells::{BasicRnnCell, GruCell, LstmCell, MultiRnnCell};
pub use unroll::{Bidirectional, Combine, static_rnn};

/// State threaded from one step of a cell to the next
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Single(Tensor),
    /// Memory and output of an LSTM
    Lstm { c: Tensor, h: Tensor },
    /// One state per layer of a [`MultiRnnCell`]
    Layers(Vec<State>),
}

impl State {
    /// Every tensor in the state, outermost layer first
    pub fn tensors(&self) -> Vec<&Tensor> {
        match self {
            State::Single(t) => vec![t],
            State::Lstm { c, h } => vec![c, h],
            State::Layers(layers) => layers.iter().flat_map(State::tensors).collect(),
        }
    }
}

/// A per-timestep transformation, invoked once per unrolled step. Implementations
/// create their variables through the context, so sharing them across steps is
/// decided by the caller's scope.
pub trait RnnCell {
    fn output_size(&self) -> usize;

    /// A zero state whose batch size is read from `batch_of` when the graph runs
    fn zero_state(
        &self,
        ctx: &mut BuildContext,
        batch_of: &Tensor,
        dtype: DType,
    ) -> Result<State, GraphError>;

    fn step(
        &self,
        ctx: &mut BuildContext,
        input: &Tensor,
        state: &State,
    ) -> Result<(Tensor, State), GraphError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    BasicRnn,
    Gru,
    Lstm,
}

impl FromStr for CellType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rnn" | "basic_rnn" | "basic-rnn" => Ok(CellType::BasicRnn),
            "gru" => Ok(CellType::Gru),
            "lstm" => Ok(CellType::Lstm),
            other => Err(GraphError::Configuration(format!(
                "cell type {} is not supported",
                other
            ))),
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellType::BasicRnn => write!(f, "rnn"),
            CellType::Gru => write!(f, "gru"),
            CellType::Lstm => write!(f, "lstm"),
        }
    }
}

/// Builds `num_layers` stacked cells of `cell_type`, each `rnn_size` wide
pub fn build_cell(
    cell_type: CellType,
    rnn_size: usize,
    num_layers: usize,
) -> Result<Box<dyn RnnCell>, GraphError> {
    if rnn_size == 0 {
        return Err(GraphError::Configuration("rnn_size must be positive".into()));
    }
    if num_layers == 0 {
        return Err(GraphError::Configuration("num_layers must be positive".into()));
    }
    let single = || -> Box<dyn RnnCell> {
        match cell_type {
            CellType::BasicRnn => Box::new(BasicRnnCell::new(rnn_size)),
            CellType::Gru => Box::new(GruCell::new(rnn_size)),
            CellType::Lstm => Box::new(LstmCell::new(rnn_size)),
        }
    };
    if num_layers == 1 {
        return Ok(single());
    }
    Ok(Box::new(MultiRnnCell::new((0..num_layers).map(|_| single()).collect())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_type_parsing() {
        assert_eq!("lstm".parse::<CellType>().unwrap(), CellType::Lstm);
        assert_eq!("rnn".parse::<CellType>().unwrap(), CellType::BasicRnn);
        assert_eq!("gru".parse::<CellType>().unwrap(), CellType::Gru);
        assert!(matches!(
            "invalid_cell_type".parse::<CellType>(),
            Err(GraphError::Configuration(_))
        ));
    }

    #[test]
    fn test_build_cell_validation() {
        assert!(build_cell(CellType::Gru, 0, 1).is_err());
        assert!(build_cell(CellType::Gru, 4, 0).is_err());
        assert_eq!(build_cell(CellType::Lstm, 4, 3).unwrap().output_size(), 4);
    }
}
