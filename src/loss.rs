//! Loss heads, each returns the predictions and the scalar loss of a model

use crate::graph::{BuildContext, GraphError, Tensor, ops};

/// Predictions `x * weights + bias` and their mean squared error against `y`
pub fn mean_squared_error_regressor(
    ctx: &mut BuildContext,
    x: &Tensor,
    y: &Tensor,
    weights: &Tensor,
    bias: &Tensor,
) -> Result<(Tensor, Tensor), GraphError> {
    ctx.name_scope("mean_squared_error_regressor", |ctx| {
        let predictions = ops::matmul(ctx, x, weights)?;
        let predictions = ops::add(ctx, &predictions, bias)?;
        let diff = ops::sub(ctx, &predictions, y)?;
        let squared = ops::mul(ctx, &diff, &diff)?;
        let loss = ops::reduce_mean(ctx, &squared);
        Ok((predictions, loss))
    })
}

/// Class probabilities `softmax(x * weights + bias)` and the mean cross entropy
/// of the logits against the one hot `y`
pub fn softmax_classifier(
    ctx: &mut BuildContext,
    x: &Tensor,
    y: &Tensor,
    weights: &Tensor,
    bias: &Tensor,
) -> Result<(Tensor, Tensor), GraphError> {
    ctx.name_scope("softmax_classifier", |ctx| {
        let logits = ops::matmul(ctx, x, weights)?;
        let logits = ops::add(ctx, &logits, bias)?;
        let xent = ops::softmax_cross_entropy(ctx, &logits, y)?;
        let loss = ops::reduce_mean(ctx, &xent);
        let probabilities = ops::softmax(ctx, &logits)?;
        Ok((probabilities, loss))
    })
}
