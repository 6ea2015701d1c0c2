//! Dense layers on top of the graph engine
//!
//! A layer owns nothing itself, its parameters are variables of the graph named
//! `<scope>/weights` and `<scope>/bias`, which is how estimators find them again.

use serde::{Deserialize, Serialize};

use crate::graph::{BuildContext, GraphError, Initializer, Tensor, ops};

/// Nonlinearity applied after each hidden layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(&self, ctx: &mut BuildContext, x: &Tensor) -> Tensor {
        match self {
            Activation::Relu => ops::relu(ctx, x),
            Activation::Tanh => ops::tanh(ctx, x),
            Activation::Sigmoid => ops::sigmoid(ctx, x),
        }
    }
}

/// Weights and bias of a dense layer reading `n_inputs` features
pub fn dense_variables(
    ctx: &mut BuildContext,
    n_inputs: usize,
    n_outputs: usize,
) -> Result<(Tensor, Tensor), GraphError> {
    // He initialization
    let std = (2.0 / n_inputs.max(1) as f32).sqrt();
    let weights = ctx.get_variable("weights", &[n_inputs, n_outputs], Initializer::Normal { std })?;
    let bias = ctx.get_variable("bias", &[n_outputs], Initializer::Zeros)?;
    Ok((weights, bias))
}

/// `x * weights + bias` in variable scope `scope`
pub fn linear(
    ctx: &mut BuildContext,
    scope: &str,
    x: &Tensor,
    n_outputs: usize,
) -> Result<Tensor, GraphError> {
    let n_inputs = input_size(x)?;
    ctx.variable_scope(scope, |ctx| {
        let (weights, bias) = dense_variables(ctx, n_inputs, n_outputs)?;
        let y = ops::matmul(ctx, x, &weights)?;
        ops::add(ctx, &y, &bias)
    })
}

/// Stack of dense layers with `activation` after each, layer `i` in scope
/// `dnn/layer{i}`
pub fn dnn(
    ctx: &mut BuildContext,
    x: &Tensor,
    hidden_units: &[usize],
    activation: Activation,
) -> Result<Tensor, GraphError> {
    if hidden_units.contains(&0) {
        return Err(GraphError::Configuration(format!(
            "hidden units must be positive, got {:?}",
            hidden_units
        )));
    }
    ctx.variable_scope("dnn", |ctx| {
        let mut out = x.clone();
        for (i, &units) in hidden_units.iter().enumerate() {
            let pre = linear(ctx, &format!("layer{}", i), &out, units)?;
            out = activation.apply(ctx, &pre);
        }
        Ok(out)
    })
}

/// Static feature size of a `[batch, features]` tensor
pub(crate) fn input_size(x: &Tensor) -> Result<usize, GraphError> {
    match x.dim(1).and_then(|d| d.known()) {
        Some(n) if x.rank() == 2 => Ok(n),
        _ => Err(GraphError::shape(
            "dense",
            format!("expected [batch, known features], got {}", x.shape()),
        )),
    }
}
