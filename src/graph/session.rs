//! Running a graph
//!
//! A [`Session`] evaluates the nodes a set of fetches depends on, lowering every
//! element to an autograd [`Value`]. Variables contribute their long lived leaf
//! values, so back-propagating from a scalar loss leaves the gradients on them.

use std::collections::HashMap;

use crate::{optim::Optim, values::Value};

use super::{
    GraphError,
    node::{DimSource, Graph, Node, NodeId, Op, Tensor},
};

/// A concrete tensor on the host, used for feeds and fetched results
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl HostTensor {
    pub fn new(data: Vec<f32>, shape: &[usize]) -> Result<Self, GraphError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(GraphError::shape(
                "host_tensor",
                format!("{} values do not fill shape {:?}", data.len(), shape),
            ));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn scalar(value: f32) -> Self {
        Self {
            shape: vec![],
            data: vec![value],
        }
    }

    /// Stacks equally long rows into a `[rows, columns]` tensor
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, GraphError> {
        let columns = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().find(|r| r.len() != columns) {
            return Err(GraphError::shape(
                "host_tensor",
                format!("row of length {} among rows of length {}", row.len(), columns),
            ));
        }
        let data = rows.iter().flatten().copied().collect();
        Self::new(data, &[rows.len(), columns])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Splits the leading axis into rows
    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        let n_rows = self.shape.first().copied().unwrap_or(1);
        if n_rows == 0 {
            return vec![];
        }
        let width = self.data.len() / n_rows;
        if width == 0 {
            return vec![vec![]; n_rows];
        }
        self.data.chunks(width).map(<[f32]>::to_vec).collect()
    }

    pub fn scalar_value(&self) -> Option<f32> {
        if self.data.len() == 1 {
            Some(self.data[0])
        } else {
            None
        }
    }
}

/// An evaluated node
#[derive(Debug, Clone)]
struct Buffer {
    shape: Vec<usize>,
    data: Vec<Value>,
}

impl Buffer {
    fn new(shape: Vec<usize>, data: Vec<Value>) -> Self {
        Self { shape, data }
    }

    fn to_host(&self) -> HostTensor {
        HostTensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(Value::data).collect(),
        }
    }
}

pub struct Session<'g> {
    graph: &'g Graph,
}

impl<'g> Session<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    /// Evaluates `fetches`, feeding placeholders from `feeds`
    pub fn run(
        &self,
        fetches: &[&Tensor],
        feeds: &[(&Tensor, &HostTensor)],
    ) -> Result<Vec<HostTensor>, GraphError> {
        let buffers = self.evaluate(fetches, feeds)?;
        Ok(buffers.iter().map(Buffer::to_host).collect())
    }

    /// Evaluates the scalar `loss`, back-propagates it and lets `optim` update the
    /// variables. Returns the loss before the update.
    pub fn train_step(
        &self,
        loss: &Tensor,
        feeds: &[(&Tensor, &HostTensor)],
        optim: &mut dyn Optim,
    ) -> Result<f32, GraphError> {
        let buffers = self.evaluate(&[loss], feeds)?;
        let loss_value = match buffers[0].data.as_slice() {
            [value] => value.clone(),
            other => {
                return Err(GraphError::shape(
                    "train_step",
                    format!("loss must be a scalar, got {} values", other.len()),
                ));
            }
        };
        loss_value.backward();
        optim.step();
        optim.zero_grad();
        Ok(loss_value.data())
    }

    fn evaluate(
        &self,
        fetches: &[&Tensor],
        feeds: &[(&Tensor, &HostTensor)],
    ) -> Result<Vec<Buffer>, GraphError> {
        let fed: HashMap<NodeId, &HostTensor> = feeds.iter().map(|(t, h)| (t.id(), *h)).collect();

        // mark everything the fetches depend on, fed nodes cut the walk
        let mut needed = vec![false; self.graph.len()];
        let mut stack: Vec<NodeId> = fetches.iter().map(|t| t.id()).collect();
        while let Some(id) = stack.pop() {
            let node = self.graph.node(id)?;
            if needed[id] {
                continue;
            }
            needed[id] = true;
            if !fed.contains_key(&id) {
                stack.extend(node.inputs.iter().copied());
            }
        }

        let mut memo: Vec<Option<Buffer>> = vec![None; self.graph.len()];
        for (id, node) in self.graph.nodes().iter().enumerate() {
            if !needed[id] {
                continue;
            }
            let buffer = match fed.get(&id) {
                Some(host) => feed_buffer(node, host)?,
                None => {
                    let inputs = node
                        .inputs
                        .iter()
                        .map(|&i| memo[i].as_ref().ok_or(GraphError::UnknownNode { id: i }))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.eval_node(node, &inputs)?
                }
            };
            memo[id] = Some(buffer);
        }

        fetches
            .iter()
            .map(|t| memo[t.id()].clone().ok_or(GraphError::UnknownNode { id: t.id() }))
            .collect()
    }

    fn eval_node(&self, node: &Node, inputs: &[&Buffer]) -> Result<Buffer, GraphError> {
        let kind = node.op.kind();
        match &node.op {
            Op::Placeholder => Err(GraphError::MissingFeed {
                name: node.name.clone(),
            }),
            Op::Variable(id) => {
                let var = &self.graph.variables()[*id];
                Ok(Buffer::new(var.shape.clone(), var.values.clone()))
            }
            Op::Constant(data) => Ok(Buffer::new(
                node.shape.to_known().unwrap_or_default(),
                data.iter().map(|&v| Value::new(v)).collect(),
            )),
            Op::Zeros(sources) => {
                let shape = sources
                    .iter()
                    .map(|s| match *s {
                        DimSource::Static(n) => Ok(n),
                        DimSource::Runtime { input, axis } => inputs
                            .get(input)
                            .and_then(|b| b.shape.get(axis).copied())
                            .ok_or_else(|| GraphError::shape(kind, "run time dimension unavailable")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let n: usize = shape.iter().product();
                Ok(Buffer::new(shape, (0..n).map(|_| Value::new(0.0)).collect()))
            }
            Op::Select { axis, index } => select(inputs[0], *axis, *index),
            Op::MatMul => matmul(inputs[0], inputs[1]),
            Op::Add => elementwise(kind, inputs[0], inputs[1], |a, b| a + b),
            Op::Sub => elementwise(kind, inputs[0], inputs[1], |a, b| a - b),
            Op::Mul => elementwise(kind, inputs[0], inputs[1], |a, b| a * b),
            Op::Tanh => Ok(map(inputs[0], Value::tanh)),
            Op::Sigmoid => Ok(map(inputs[0], Value::sigmoid)),
            Op::Relu => Ok(map(inputs[0], Value::relu)),
            Op::Softmax => softmax(inputs[0]),
            Op::SoftmaxCrossEntropy => softmax_cross_entropy(inputs[0], inputs[1]),
            Op::AddN => add_n(inputs),
            Op::ReduceSum => Ok(Buffer::new(vec![], vec![inputs[0].data.iter().cloned().sum()])),
            Op::ReduceMean => {
                let n = inputs[0].data.len();
                if n == 0 {
                    return Err(GraphError::shape(kind, "mean of an empty tensor"));
                }
                let sum: Value = inputs[0].data.iter().cloned().sum();
                Ok(Buffer::new(vec![], vec![sum / Value::new(n as f32)]))
            }
            Op::Concat { axis } => concat(inputs, *axis),
        }
    }
}

fn feed_buffer(node: &Node, host: &HostTensor) -> Result<Buffer, GraphError> {
    if !node.shape.is_compatible_with(&host.shape) {
        return Err(GraphError::shape(
            "feed",
            format!(
                "{} fed with {:?}, expected {}",
                node.name, host.shape, node.shape
            ),
        ));
    }
    Ok(Buffer::new(
        host.shape.clone(),
        host.data.iter().map(|&v| Value::new(v)).collect(),
    ))
}

fn map(x: &Buffer, f: impl Fn(&Value) -> Value) -> Buffer {
    Buffer::new(x.shape.clone(), x.data.iter().map(f).collect())
}

fn select(x: &Buffer, axis: usize, index: usize) -> Result<Buffer, GraphError> {
    let size = x.shape[axis];
    if index >= size {
        return Err(GraphError::shape(
            "select",
            format!("index {} out of range for axis {} of {:?}", index, axis, x.shape),
        ));
    }
    let outer: usize = x.shape[..axis].iter().product();
    let inner: usize = x.shape[axis + 1..].iter().product();
    let mut data = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        let start = (o * size + index) * inner;
        data.extend_from_slice(&x.data[start..start + inner]);
    }
    let mut shape = x.shape.clone();
    shape.remove(axis);
    Ok(Buffer::new(shape, data))
}

fn matmul(a: &Buffer, b: &Buffer) -> Result<Buffer, GraphError> {
    let (n, k) = (a.shape[0], a.shape[1]);
    let (k2, m) = (b.shape[0], b.shape[1]);
    if k != k2 {
        return Err(GraphError::shape(
            "matmul",
            format!("cannot multiply {:?} by {:?}", a.shape, b.shape),
        ));
    }
    let mut data = Vec::with_capacity(n * m);
    for i in 0..n {
        for j in 0..m {
            let dot = (0..k)
                .map(|p| &a.data[i * k + p] * &b.data[p * m + j])
                .sum::<Value>();
            data.push(dot);
        }
    }
    Ok(Buffer::new(vec![n, m], data))
}

/// Applies `f` pairwise, repeating the operand whose shape is a suffix of the other's
fn elementwise(
    op: &str,
    a: &Buffer,
    b: &Buffer,
    f: impl Fn(&Value, &Value) -> Value,
) -> Result<Buffer, GraphError> {
    let (long, short) = if a.shape.len() >= b.shape.len() { (a, b) } else { (b, a) };
    if !long.shape.ends_with(&short.shape) {
        return Err(GraphError::shape(
            op,
            format!("cannot broadcast {:?} with {:?}", a.shape, b.shape),
        ));
    }
    let a_len = a.data.len().max(1);
    let b_len = b.data.len().max(1);
    let data = (0..long.data.len())
        .map(|i| f(&a.data[i % a_len], &b.data[i % b_len]))
        .collect();
    Ok(Buffer::new(long.shape.clone(), data))
}

/// Rows along the last axis, shifted by their maximum so `exp` cannot overflow
fn shifted_rows(x: &Buffer) -> Vec<Vec<Value>> {
    let width = x.shape.last().copied().unwrap_or(1).max(1);
    x.data
        .chunks(width)
        .map(|row| {
            let max = row.iter().map(Value::data).fold(f32::NEG_INFINITY, f32::max);
            // the shift is a constant, softmax does not depend on it
            let max = Value::new(max);
            row.iter().map(|v| v - &max).collect()
        })
        .collect()
}

fn softmax(x: &Buffer) -> Result<Buffer, GraphError> {
    let mut data = Vec::with_capacity(x.data.len());
    for row in shifted_rows(x) {
        let exps: Vec<Value> = row.iter().map(Value::exp).collect();
        let total = exps.iter().cloned().sum::<Value>();
        data.extend(exps.iter().map(|e| e / &total));
    }
    Ok(Buffer::new(x.shape.clone(), data))
}

fn softmax_cross_entropy(logits: &Buffer, labels: &Buffer) -> Result<Buffer, GraphError> {
    if logits.shape != labels.shape {
        return Err(GraphError::shape(
            "softmax_cross_entropy",
            format!("logits {:?} and labels {:?} differ", logits.shape, labels.shape),
        ));
    }
    let width = logits.shape[1];
    let mut data = Vec::with_capacity(logits.shape[0]);
    for (row, targets) in shifted_rows(logits)
        .into_iter()
        .zip(labels.data.chunks(width.max(1)))
    {
        // -sum(p * log_softmax(x)) with log_softmax(x) = x - logsumexp(x)
        let log_sum_exp = row.iter().map(Value::exp).sum::<Value>().ln();
        let xent = row
            .iter()
            .zip(targets)
            .map(|(x, p)| p * &(&log_sum_exp - x))
            .sum::<Value>();
        data.push(xent);
    }
    Ok(Buffer::new(vec![logits.shape[0]], data))
}

fn add_n(inputs: &[&Buffer]) -> Result<Buffer, GraphError> {
    let first = inputs[0];
    if let Some(other) = inputs.iter().find(|b| b.shape != first.shape) {
        return Err(GraphError::shape(
            "add_n",
            format!("{:?} differs from {:?}", other.shape, first.shape),
        ));
    }
    let data = (0..first.data.len())
        .map(|i| inputs.iter().map(|b| b.data[i].clone()).sum::<Value>())
        .collect();
    Ok(Buffer::new(first.shape.clone(), data))
}

fn concat(inputs: &[&Buffer], axis: usize) -> Result<Buffer, GraphError> {
    let first = inputs[0];
    let mut shape = first.shape.clone();
    shape[axis] = 0;
    for b in inputs {
        let matches = b.shape.len() == first.shape.len()
            && b.shape
                .iter()
                .zip(&first.shape)
                .enumerate()
                .all(|(i, (x, y))| i == axis || x == y);
        if !matches {
            return Err(GraphError::shape(
                "concat",
                format!("{:?} does not line up with {:?}", b.shape, first.shape),
            ));
        }
        shape[axis] += b.shape[axis];
    }
    let outer: usize = first.shape[..axis].iter().product();
    let inner: usize = first.shape[axis + 1..].iter().product();
    let mut data = Vec::with_capacity(outer * shape[axis] * inner);
    for o in 0..outer {
        for b in inputs {
            let chunk = b.shape[axis] * inner;
            data.extend_from_slice(&b.data[o * chunk..(o + 1) * chunk]);
        }
    }
    Ok(Buffer::new(shape, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assert_eq_float,
        graph::{BuildContext, Dim, DimRef, Initializer, Shape, ops},
        optim::SGD,
    };

    #[test]
    fn test_forward_dense() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = ops::placeholder(&mut ctx, "x", Shape::new(vec![Dim::Dynamic, Dim::Known(2)]));
        let w = ops::constant(&mut ctx, vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let b = ops::constant(&mut ctx, vec![0.1, 0.2], &[2]).unwrap();
        let y = ops::matmul(&mut ctx, &x, &w).unwrap();
        let y = ops::add(&mut ctx, &y, &b).unwrap();

        let session = Session::new(&graph);
        let input = HostTensor::from_rows(&[vec![1.0, 1.0], vec![2.0, 0.0]]).unwrap();
        let out = session.run(&[&y], &[(&x, &input)]).unwrap();
        assert_eq!(out[0].shape(), &[2, 2]);
        let data = out[0].data();
        assert_eq_float!(data[0], 4.1);
        assert_eq_float!(data[1], 6.2);
        assert_eq_float!(data[2], 2.1);
        assert_eq_float!(data[3], 4.2);
    }

    #[test]
    fn test_missing_and_bad_feeds() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = ops::placeholder(&mut ctx, "x", Shape::new(vec![Dim::Dynamic, Dim::Known(2)]));
        let y = ops::relu(&mut ctx, &x);

        let session = Session::new(&graph);
        assert!(matches!(
            session.run(&[&y], &[]),
            Err(GraphError::MissingFeed { name }) if name == "x"
        ));
        let wrong = HostTensor::new(vec![1.0; 3], &[1, 3]).unwrap();
        assert!(matches!(
            session.run(&[&y], &[(&x, &wrong)]),
            Err(GraphError::Shape { .. })
        ));
    }

    #[test]
    fn test_select_and_concat() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = ops::placeholder(&mut ctx, "x", Shape::known(&[2, 3, 2]));
        let pieces = ops::split_squeeze(&mut ctx, 1, 3, &x).unwrap();
        let joined = ops::concat(&mut ctx, 1, &pieces).unwrap();

        let session = Session::new(&graph);
        let input = HostTensor::new((0..12).map(|v| v as f32).collect(), &[2, 3, 2]).unwrap();
        let out = session
            .run(&[&pieces[1], &joined], &[(&x, &input)])
            .unwrap();
        assert_eq!(out[0].shape(), &[2, 2]);
        assert_eq!(out[0].data(), &[2.0, 3.0, 8.0, 9.0]);
        // stacking the timesteps side by side restores the row major layout
        assert_eq!(out[1].shape(), &[2, 6]);
        assert_eq!(out[1].data(), input.data());
    }

    #[test]
    fn test_runtime_zeros() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = ops::placeholder(&mut ctx, "x", Shape::new(vec![Dim::Dynamic, Dim::Known(3)]));
        let z = ops::zeros(&mut ctx, &[DimRef::RuntimeOf(&x, 0), DimRef::Static(4)]).unwrap();
        assert_eq!(z.shape(), &Shape::new(vec![Dim::Dynamic, Dim::Known(4)]));

        let session = Session::new(&graph);
        let input = HostTensor::new(vec![0.0; 15], &[5, 3]).unwrap();
        let out = session.run(&[&z], &[(&x, &input)]).unwrap();
        assert_eq!(out[0].shape(), &[5, 4]);
        assert!(out[0].data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_cross_entropy_is_stable() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let logits = ops::constant(&mut ctx, vec![1000.0, -1000.0], &[1, 2]).unwrap();
        let labels = ops::constant(&mut ctx, vec![0.0, 1.0], &[1, 2]).unwrap();
        let xent = ops::softmax_cross_entropy(&mut ctx, &logits, &labels).unwrap();
        let probs = ops::softmax(&mut ctx, &logits).unwrap();

        let session = Session::new(&graph);
        let out = session.run(&[&xent, &probs], &[]).unwrap();
        assert_eq_float!(out[0].data()[0], 2000.0);
        assert!(out[1].data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_train_step_reduces_loss() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 3);
        let x = ops::placeholder(&mut ctx, "x", Shape::new(vec![Dim::Dynamic, Dim::Known(1)]));
        let y = ops::placeholder(&mut ctx, "y", Shape::new(vec![Dim::Dynamic, Dim::Known(1)]));
        let w = ctx.get_variable("w", &[1, 1], Initializer::Zeros).unwrap();
        let pred = ops::matmul(&mut ctx, &x, &w).unwrap();
        let diff = ops::sub(&mut ctx, &pred, &y).unwrap();
        let sq = ops::mul(&mut ctx, &diff, &diff).unwrap();
        let loss = ops::reduce_mean(&mut ctx, &sq);

        let mut optim = SGD::new(graph.trainable_values(), 0.1, 0.0);
        let session = Session::new(&graph);
        let xs = HostTensor::from_rows(&[vec![1.0], vec![2.0]]).unwrap();
        let ys = HostTensor::from_rows(&[vec![2.0], vec![4.0]]).unwrap();
        let feeds = [(&x, &xs), (&y, &ys)];
        let first = session.train_step(&loss, &feeds, &mut optim).unwrap();
        let mut last = first;
        for _ in 0..20 {
            last = session.train_step(&loss, &feeds, &mut optim).unwrap();
        }
        assert_eq_float!(first, 10.0);
        assert!(last < 0.01);
        assert_eq_float!(graph.variable("w").unwrap().data()[0], 2.0);
    }
}
