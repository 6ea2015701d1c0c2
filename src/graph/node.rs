//! Graph storage: nodes, tensor handles and the variable store

use std::collections::HashMap;

use crate::values::Value;

use super::{
    GraphError,
    shape::{DType, Dim, Shape},
};

pub type NodeId = usize;
pub type VariableId = usize;

/// Handle to a node of a [`Graph`], annotated with its static shape
#[derive(Debug, Clone)]
pub struct Tensor {
    id: NodeId,
    shape: Shape,
    dtype: DType,
}

impl Tensor {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dim(&self, axis: usize) -> Option<Dim> {
        self.shape.dim(axis)
    }
}

/// Two handles are equal when they refer to the same node
impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Tensor {}

/// Where a dimension of a [`Op::Zeros`] output comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimSource {
    Static(usize),
    /// Read at run time from axis `axis` of the node's `input`-th operand
    Runtime { input: usize, axis: usize },
}

#[derive(Debug, Clone)]
pub enum Op {
    Placeholder,
    Variable(VariableId),
    Constant(Vec<f32>),
    Zeros(Vec<DimSource>),
    /// Takes slice `index` along `axis` and drops that axis
    Select {
        axis: usize,
        index: usize,
    },
    MatMul,
    Add,
    Sub,
    Mul,
    Tanh,
    Sigmoid,
    Relu,
    /// Over the last axis
    Softmax,
    /// Per example cross entropy of `softmax(logits)` against `labels`
    SoftmaxCrossEntropy,
    AddN,
    ReduceSum,
    ReduceMean,
    Concat {
        axis: usize,
    },
}

impl Op {
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Placeholder => "placeholder",
            Op::Variable(_) => "variable",
            Op::Constant(_) => "constant",
            Op::Zeros(_) => "zeros",
            Op::Select { .. } => "select",
            Op::MatMul => "matmul",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Tanh => "tanh",
            Op::Sigmoid => "sigmoid",
            Op::Relu => "relu",
            Op::Softmax => "softmax",
            Op::SoftmaxCrossEntropy => "softmax_cross_entropy",
            Op::AddN => "add_n",
            Op::ReduceSum => "reduce_sum",
            Op::ReduceMean => "reduce_mean",
            Op::Concat { .. } => "concat",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op: Op,
    pub inputs: Vec<NodeId>,
    pub shape: Shape,
}

/// A trainable parameter. Its values are autograd leaves that outlive every run.
#[derive(Debug)]
pub struct Variable {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<Value>,
    pub(crate) node: NodeId,
}

impl Variable {
    pub fn data(&self) -> Vec<f32> {
        self.values.iter().map(Value::data).collect()
    }
}

/// A dataflow graph, nodes are stored in the order they were added so every
/// node's inputs precede it
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    variables: Vec<Variable>,
    variable_index: HashMap<String, VariableId>,
    name_counts: HashMap<String, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(id).ok_or(GraphError::UnknownNode { id })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variable_index.get(name).map(|&id| &self.variables[id])
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        let id = *self.variable_index.get(name)?;
        Some(&mut self.variables[id])
    }

    /// Handle of the node backing variable `name`
    pub fn variable_tensor(&self, name: &str) -> Option<Tensor> {
        let var = self.variable(name)?;
        Some(self.tensor(var.node))
    }

    /// Every trainable value, shared with the variable store
    pub fn trainable_values(&self) -> Vec<Value> {
        self.variables
            .iter()
            .flat_map(|v| v.values.iter().cloned())
            .collect()
    }

    pub(crate) fn tensor(&self, id: NodeId) -> Tensor {
        Tensor {
            id,
            shape: self.nodes[id].shape.clone(),
            dtype: DType::F32,
        }
    }

    /// Registers a node under a name made unique within the graph
    pub(crate) fn add_node(&mut self, name: &str, op: Op, inputs: &[&Tensor], shape: Shape) -> Tensor {
        let name = self.unique_name(name);
        let id = self.nodes.len();
        self.nodes.push(Node {
            name,
            op,
            inputs: inputs.iter().map(|t| t.id()).collect(),
            shape,
        });
        self.tensor(id)
    }

    pub(crate) fn add_variable(&mut self, name: &str, shape: &[usize], values: Vec<Value>) -> Tensor {
        let id = self.variables.len();
        let tensor = self.add_node(name, Op::Variable(id), &[], Shape::known(shape));
        self.variables.push(Variable {
            name: name.to_string(),
            shape: shape.to_vec(),
            values,
            node: tensor.id(),
        });
        self.variable_index.insert(name.to_string(), id);
        tensor
    }

    fn unique_name(&mut self, name: &str) -> String {
        let count = self.name_counts.entry(name.to_string()).or_insert(0);
        let unique = if *count == 0 {
            name.to_string()
        } else {
            format!("{}_{}", name, count)
        };
        *count += 1;
        unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        let mut graph = Graph::new();
        let a = graph.add_node("x", Op::Placeholder, &[], Shape::known(&[2]));
        let b = graph.add_node("x", Op::Placeholder, &[], Shape::known(&[2]));
        assert_eq!(graph.node(a.id()).unwrap().name, "x");
        assert_eq!(graph.node(b.id()).unwrap().name, "x_1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_variable_lookup() {
        let mut graph = Graph::new();
        let values = vec![Value::new(1.0), Value::new(2.0)];
        let t = graph.add_variable("layer/weights", &[1, 2], values);
        assert_eq!(graph.variable("layer/weights").unwrap().data(), vec![1.0, 2.0]);
        assert_eq!(graph.variable_tensor("layer/weights"), Some(t));
        assert_eq!(graph.trainable_values().len(), 2);
        assert!(graph.node(99).is_err());
    }
}
