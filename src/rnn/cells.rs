use crate::graph::{BuildContext, DType, DimRef, GraphError, Initializer, Tensor, ops};

use super::{RnnCell, State};

/// `concat(args) * kernel + biases`, with the variables of the current scope
fn linear(
    ctx: &mut BuildContext,
    args: &[&Tensor],
    output_size: usize,
    bias_start: f32,
) -> Result<Tensor, GraphError> {
    let mut total = 0;
    for arg in args {
        match arg.dim(1).and_then(|d| d.known()) {
            Some(n) if arg.rank() == 2 => total += n,
            _ => {
                return Err(GraphError::shape(
                    "linear",
                    format!("expected [batch, known size], got {}", arg.shape()),
                ));
            }
        }
    }
    let kernel = ctx.get_variable(
        "kernel",
        &[total, output_size],
        Initializer::UniformUnitScaling(1.0),
    )?;
    let x = match args {
        [single] => (*single).clone(),
        _ => {
            let owned: Vec<Tensor> = args.iter().map(|t| (*t).clone()).collect();
            ops::concat(ctx, 1, &owned)?
        }
    };
    let y = ops::matmul(ctx, &x, &kernel)?;
    let biases = ctx.get_variable("biases", &[output_size], Initializer::Constant(bias_start))?;
    ops::add(ctx, &y, &biases)
}

/// A [`linear`] map in its own variable scope
fn gate(
    ctx: &mut BuildContext,
    name: &str,
    args: &[&Tensor],
    output_size: usize,
    bias_start: f32,
) -> Result<Tensor, GraphError> {
    ctx.variable_scope(name, |ctx| linear(ctx, args, output_size, bias_start))
}

fn zeros(ctx: &mut BuildContext, batch_of: &Tensor, size: usize) -> Result<Tensor, GraphError> {
    ops::zeros(ctx, &[DimRef::RuntimeOf(batch_of, 0), DimRef::Static(size)])
}

fn mismatched_state(cell: &str) -> GraphError {
    GraphError::Configuration(format!("state does not belong to a {}", cell))
}

/// `h' = tanh(W [x, h] + b)`, the output is the new state
#[derive(Debug, Clone)]
pub struct BasicRnnCell {
    num_units: usize,
}

impl BasicRnnCell {
    pub fn new(num_units: usize) -> Self {
        Self { num_units }
    }
}

impl RnnCell for BasicRnnCell {
    fn output_size(&self) -> usize {
        self.num_units
    }

    fn zero_state(
        &self,
        ctx: &mut BuildContext,
        batch_of: &Tensor,
        _dtype: DType,
    ) -> Result<State, GraphError> {
        Ok(State::Single(zeros(ctx, batch_of, self.num_units)?))
    }

    fn step(
        &self,
        ctx: &mut BuildContext,
        input: &Tensor,
        state: &State,
    ) -> Result<(Tensor, State), GraphError> {
        let State::Single(h) = state else {
            return Err(mismatched_state("basic rnn cell"));
        };
        ctx.variable_scope("basic_rnn_cell", |ctx| {
            let pre = linear(ctx, &[input, h], self.num_units, 0.0)?;
            let out = ops::tanh(ctx, &pre);
            Ok((out.clone(), State::Single(out)))
        })
    }
}

/// Gated recurrent unit
#[derive(Debug, Clone)]
pub struct GruCell {
    num_units: usize,
}

impl GruCell {
    pub fn new(num_units: usize) -> Self {
        Self { num_units }
    }
}

impl RnnCell for GruCell {
    fn output_size(&self) -> usize {
        self.num_units
    }

    fn zero_state(
        &self,
        ctx: &mut BuildContext,
        batch_of: &Tensor,
        _dtype: DType,
    ) -> Result<State, GraphError> {
        Ok(State::Single(zeros(ctx, batch_of, self.num_units)?))
    }

    fn step(
        &self,
        ctx: &mut BuildContext,
        input: &Tensor,
        state: &State,
    ) -> Result<(Tensor, State), GraphError> {
        let State::Single(h) = state else {
            return Err(mismatched_state("gru cell"));
        };
        let n = self.num_units;
        ctx.variable_scope("gru_cell", |ctx| {
            // gate biases start at 1 so the cell initially keeps its state
            let r = gate(ctx, "reset", &[input, h], n, 1.0)?;
            let r = ops::sigmoid(ctx, &r);
            let u = gate(ctx, "update", &[input, h], n, 1.0)?;
            let u = ops::sigmoid(ctx, &u);
            let rh = ops::mul(ctx, &r, h)?;
            let c = gate(ctx, "candidate", &[input, &rh], n, 0.0)?;
            let c = ops::tanh(ctx, &c);
            // h' = u * h + (1 - u) * c = c + u * (h - c)
            let diff = ops::sub(ctx, h, &c)?;
            let gated = ops::mul(ctx, &u, &diff)?;
            let new_h = ops::add(ctx, &c, &gated)?;
            Ok((new_h.clone(), State::Single(new_h)))
        })
    }
}

/// Long short-term memory cell without peepholes
#[derive(Debug, Clone)]
pub struct LstmCell {
    num_units: usize,
    forget_bias: f32,
}

impl LstmCell {
    pub fn new(num_units: usize) -> Self {
        Self {
            num_units,
            forget_bias: 1.0,
        }
    }
}

impl RnnCell for LstmCell {
    fn output_size(&self) -> usize {
        self.num_units
    }

    fn zero_state(
        &self,
        ctx: &mut BuildContext,
        batch_of: &Tensor,
        _dtype: DType,
    ) -> Result<State, GraphError> {
        Ok(State::Lstm {
            c: zeros(ctx, batch_of, self.num_units)?,
            h: zeros(ctx, batch_of, self.num_units)?,
        })
    }

    fn step(
        &self,
        ctx: &mut BuildContext,
        input: &Tensor,
        state: &State,
    ) -> Result<(Tensor, State), GraphError> {
        let State::Lstm { c, h } = state else {
            return Err(mismatched_state("lstm cell"));
        };
        let n = self.num_units;
        ctx.variable_scope("lstm_cell", |ctx| {
            let i = gate(ctx, "input_gate", &[input, h], n, 0.0)?;
            let j = gate(ctx, "new_input", &[input, h], n, 0.0)?;
            let f = gate(ctx, "forget_gate", &[input, h], n, self.forget_bias)?;
            let o = gate(ctx, "output_gate", &[input, h], n, 0.0)?;

            let (i, j, f, o) = (
                ops::sigmoid(ctx, &i),
                ops::tanh(ctx, &j),
                ops::sigmoid(ctx, &f),
                ops::sigmoid(ctx, &o),
            );
            let kept = ops::mul(ctx, c, &f)?;
            let written = ops::mul(ctx, &i, &j)?;
            let new_c = ops::add(ctx, &kept, &written)?;
            let squashed = ops::tanh(ctx, &new_c);
            let new_h = ops::mul(ctx, &squashed, &o)?;
            Ok((new_h.clone(), State::Lstm { c: new_c, h: new_h }))
        })
    }
}

/// Cells stacked on top of each other, layer `i` lives in scope `cell_{i}`
pub struct MultiRnnCell {
    cells: Vec<Box<dyn RnnCell>>,
}

impl MultiRnnCell {
    pub fn new(cells: Vec<Box<dyn RnnCell>>) -> Self {
        Self { cells }
    }
}

impl RnnCell for MultiRnnCell {
    fn output_size(&self) -> usize {
        self.cells.last().map_or(0, |c| c.output_size())
    }

    fn zero_state(
        &self,
        ctx: &mut BuildContext,
        batch_of: &Tensor,
        dtype: DType,
    ) -> Result<State, GraphError> {
        let layers = self
            .cells
            .iter()
            .map(|cell| cell.zero_state(ctx, batch_of, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(State::Layers(layers))
    }

    fn step(
        &self,
        ctx: &mut BuildContext,
        input: &Tensor,
        state: &State,
    ) -> Result<(Tensor, State), GraphError> {
        let State::Layers(states) = state else {
            return Err(mismatched_state("multi rnn cell"));
        };
        if states.len() != self.cells.len() {
            return Err(mismatched_state("multi rnn cell"));
        }
        ctx.variable_scope("multi_rnn_cell", |ctx| {
            let mut current = input.clone();
            let mut new_states = Vec::with_capacity(self.cells.len());
            for (i, (cell, state)) in self.cells.iter().zip(states).enumerate() {
                let (out, new_state) =
                    ctx.variable_scope(&format!("cell_{}", i), |ctx| cell.step(ctx, &current, state))?;
                current = out;
                new_states.push(new_state);
            }
            Ok((current, State::Layers(new_states)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Dim, Graph, HostTensor, Session, Shape};

    fn run_one_step(cell: &dyn RnnCell) -> (Graph, Vec<HostTensor>) {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 7);
        let x = ops::placeholder(&mut ctx, "x", Shape::new(vec![Dim::Dynamic, Dim::Known(3)]));
        let state = cell.zero_state(&mut ctx, &x, DType::F32).unwrap();
        let (out, new_state) = cell.step(&mut ctx, &x, &state).unwrap();
        let mut fetches = vec![out];
        fetches.extend(new_state.tensors().into_iter().cloned());

        let session = Session::new(&graph);
        let input = HostTensor::new(vec![0.5; 6], &[2, 3]).unwrap();
        let refs: Vec<&Tensor> = fetches.iter().collect();
        let results = session.run(&refs, &[(&x, &input)]).unwrap();
        (graph, results)
    }

    #[test]
    fn test_basic_rnn_step() {
        let (graph, results) = run_one_step(&BasicRnnCell::new(4));
        assert_eq!(results[0].shape(), &[2, 4]);
        assert!(results[0].data().iter().all(|v| v.abs() < 1.0));
        // output and state are the same tensor
        assert_eq!(results[0], results[1]);
        let kernel = graph.variable("basic_rnn_cell/kernel").unwrap();
        assert_eq!(kernel.shape, vec![7, 4]);
    }

    #[test]
    fn test_gru_step() {
        let (graph, results) = run_one_step(&GruCell::new(2));
        assert_eq!(results[0].shape(), &[2, 2]);
        assert_eq!(graph.variables().len(), 6);
        assert!(graph.variable("gru_cell/candidate/kernel").is_some());
    }

    #[test]
    fn test_lstm_step() {
        let (graph, results) = run_one_step(&LstmCell::new(2));
        // output, memory, output again
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], results[2]);
        assert_eq!(results[1].shape(), &[2, 2]);
        let forget = graph.variable("lstm_cell/forget_gate/biases").unwrap();
        assert_eq!(forget.data(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_multi_rnn_step() {
        let cell = MultiRnnCell::new(vec![Box::new(GruCell::new(4)), Box::new(BasicRnnCell::new(2))]);
        let (graph, results) = run_one_step(&cell);
        assert_eq!(cell.output_size(), 2);
        assert_eq!(results[0].shape(), &[2, 2]);
        assert_eq!(results[1].shape(), &[2, 4]);
        // the second layer reads the first layer's 4 outputs
        let kernel = graph
            .variable("multi_rnn_cell/cell_1/basic_rnn_cell/kernel")
            .unwrap();
        assert_eq!(kernel.shape, vec![6, 2]);
    }

    #[test]
    fn test_state_mismatch() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = ops::placeholder(&mut ctx, "x", Shape::known(&[1, 2]));
        let wrong = State::Single(x.clone());
        assert!(matches!(
            LstmCell::new(2).step(&mut ctx, &x, &wrong),
            Err(GraphError::Configuration(_))
        ));
    }
}
