//! Graph building operations
//!
//! Each function checks the static shapes of its operands, then registers one
//! node under the current scope of the [`BuildContext`]. Nothing is computed
//! until the graph is run by a [`super::Session`].

use super::{
    GraphError,
    context::BuildContext,
    node::{DimSource, Op, Tensor},
    shape::{Dim, Shape},
};

/// A dimension for [`zeros`], either fixed or read from another tensor when run
#[derive(Debug, Clone, Copy)]
pub enum DimRef<'a> {
    Static(usize),
    RuntimeOf(&'a Tensor, usize),
}

pub fn placeholder(ctx: &mut BuildContext, name: &str, shape: Shape) -> Tensor {
    ctx.add_op(name, Op::Placeholder, &[], shape)
}

pub fn constant(ctx: &mut BuildContext, data: Vec<f32>, shape: &[usize]) -> Result<Tensor, GraphError> {
    let expected: usize = shape.iter().product();
    if data.len() != expected {
        return Err(GraphError::shape(
            "constant",
            format!("{} values do not fill shape {:?}", data.len(), shape),
        ));
    }
    Ok(ctx.add_op("Const", Op::Constant(data), &[], Shape::known(shape)))
}

/// A zero tensor whose dimensions may be resolved from other tensors at run time
pub fn zeros(ctx: &mut BuildContext, dims: &[DimRef]) -> Result<Tensor, GraphError> {
    let mut inputs: Vec<&Tensor> = vec![];
    let mut sources = vec![];
    let mut static_dims = vec![];
    for dim in dims {
        match *dim {
            DimRef::Static(n) => {
                sources.push(DimSource::Static(n));
                static_dims.push(Dim::Known(n));
            }
            DimRef::RuntimeOf(tensor, axis) => {
                let static_dim = tensor.dim(axis).ok_or_else(|| {
                    GraphError::shape(
                        "zeros",
                        format!("axis {} out of range for shape {}", axis, tensor.shape()),
                    )
                })?;
                sources.push(DimSource::Runtime {
                    input: inputs.len(),
                    axis,
                });
                inputs.push(tensor);
                static_dims.push(static_dim);
            }
        }
    }
    Ok(ctx.add_op("zeros", Op::Zeros(sources), &inputs, Shape::new(static_dims)))
}

/// Slice `index` of `x` along `axis`, with that axis removed
pub fn select(ctx: &mut BuildContext, x: &Tensor, axis: usize, index: usize) -> Result<Tensor, GraphError> {
    let dim = x.dim(axis).ok_or_else(|| {
        GraphError::shape("select", format!("axis {} out of range for shape {}", axis, x.shape()))
    })?;
    if let Dim::Known(n) = dim {
        if index >= n {
            return Err(GraphError::shape(
                "select",
                format!("index {} out of range for axis {} of {}", index, axis, x.shape()),
            ));
        }
    }
    let shape = x.shape().without_axis(axis);
    Ok(ctx.add_op("select", Op::Select { axis, index }, &[x], shape))
}

/// Splits `x` into `num` tensors along `axis` and squeezes that axis out of each.
/// A dynamic `axis` dimension is accepted here and checked when the graph is run.
pub fn split_squeeze(
    ctx: &mut BuildContext,
    axis: usize,
    num: usize,
    x: &Tensor,
) -> Result<Vec<Tensor>, GraphError> {
    match x.dim(axis) {
        None => Err(GraphError::shape(
            "split_squeeze",
            format!("axis {} out of range for shape {}", axis, x.shape()),
        )),
        Some(Dim::Known(n)) if n != num => Err(GraphError::shape(
            "split_squeeze",
            format!("cannot split axis {} of {} into {} pieces", axis, x.shape(), num),
        )),
        Some(_) => ctx.name_scope("split", |ctx| {
            (0..num).map(|i| select(ctx, x, axis, i)).collect()
        }),
    }
}

pub fn matmul(ctx: &mut BuildContext, a: &Tensor, b: &Tensor) -> Result<Tensor, GraphError> {
    if a.rank() != 2 || b.rank() != 2 {
        return Err(GraphError::shape(
            "matmul",
            format!("expected rank 2 operands, got {} and {}", a.shape(), b.shape()),
        ));
    }
    let dims = (a.shape().dims(), b.shape().dims());
    dims.0[1].merge(&dims.1[0]).ok_or_else(|| {
        GraphError::shape(
            "matmul",
            format!("inner dimensions of {} and {} differ", a.shape(), b.shape()),
        )
    })?;
    let shape = Shape::new(vec![dims.0[0], dims.1[1]]);
    Ok(ctx.add_op("MatMul", Op::MatMul, &[a, b], shape))
}

/// Result shape of an elementwise op. The lower rank operand must match the
/// trailing dimensions of the other, and is repeated across the leading ones.
fn broadcast_shape(op: &str, a: &Shape, b: &Shape) -> Result<Shape, GraphError> {
    let (long, short) = if a.rank() >= b.rank() { (a, b) } else { (b, a) };
    let offset = long.rank() - short.rank();
    let mut dims = long.dims().to_vec();
    for (i, d) in short.dims().iter().enumerate() {
        dims[offset + i] = dims[offset + i]
            .merge(d)
            .ok_or_else(|| GraphError::shape(op, format!("cannot broadcast {} with {}", a, b)))?;
    }
    Ok(Shape::new(dims))
}

fn binary(ctx: &mut BuildContext, op: Op, a: &Tensor, b: &Tensor) -> Result<Tensor, GraphError> {
    let kind = op.kind();
    let shape = broadcast_shape(kind, a.shape(), b.shape())?;
    Ok(ctx.add_op(kind, op, &[a, b], shape))
}

pub fn add(ctx: &mut BuildContext, a: &Tensor, b: &Tensor) -> Result<Tensor, GraphError> {
    binary(ctx, Op::Add, a, b)
}

pub fn sub(ctx: &mut BuildContext, a: &Tensor, b: &Tensor) -> Result<Tensor, GraphError> {
    binary(ctx, Op::Sub, a, b)
}

pub fn mul(ctx: &mut BuildContext, a: &Tensor, b: &Tensor) -> Result<Tensor, GraphError> {
    binary(ctx, Op::Mul, a, b)
}

fn unary(ctx: &mut BuildContext, op: Op, x: &Tensor) -> Tensor {
    let kind = op.kind();
    ctx.add_op(kind, op, &[x], x.shape().clone())
}

pub fn tanh(ctx: &mut BuildContext, x: &Tensor) -> Tensor {
    unary(ctx, Op::Tanh, x)
}

pub fn sigmoid(ctx: &mut BuildContext, x: &Tensor) -> Tensor {
    unary(ctx, Op::Sigmoid, x)
}

pub fn relu(ctx: &mut BuildContext, x: &Tensor) -> Tensor {
    unary(ctx, Op::Relu, x)
}

pub fn softmax(ctx: &mut BuildContext, logits: &Tensor) -> Result<Tensor, GraphError> {
    if logits.rank() == 0 {
        return Err(GraphError::shape("softmax", "logits must have at least one axis"));
    }
    Ok(unary(ctx, Op::Softmax, logits))
}

/// Cross entropy between `softmax(logits)` and `labels` for each row, computed
/// through log-sum-exp so confident wrong predictions do not underflow
pub fn softmax_cross_entropy(
    ctx: &mut BuildContext,
    logits: &Tensor,
    labels: &Tensor,
) -> Result<Tensor, GraphError> {
    if logits.rank() != 2 || labels.rank() != 2 {
        return Err(GraphError::shape(
            "softmax_cross_entropy",
            format!("expected [batch, classes], got {} and {}", logits.shape(), labels.shape()),
        ));
    }
    let merged = broadcast_shape("softmax_cross_entropy", logits.shape(), labels.shape())?;
    let shape = Shape::new(vec![merged.dims()[0]]);
    Ok(ctx.add_op("xent", Op::SoftmaxCrossEntropy, &[logits, labels], shape))
}

pub fn add_n(ctx: &mut BuildContext, inputs: &[Tensor]) -> Result<Tensor, GraphError> {
    let first = inputs
        .first()
        .ok_or_else(|| GraphError::shape("add_n", "no inputs"))?;
    let mut shape = first.shape().clone();
    for t in &inputs[1..] {
        if t.rank() != shape.rank() {
            return Err(GraphError::shape("add_n", format!("{} differs from {}", t.shape(), shape)));
        }
        shape = broadcast_shape("add_n", &shape, t.shape())?;
    }
    let refs: Vec<&Tensor> = inputs.iter().collect();
    Ok(ctx.add_op("AddN", Op::AddN, &refs, shape))
}

/// Sum of every element, a scalar
pub fn reduce_sum(ctx: &mut BuildContext, x: &Tensor) -> Tensor {
    ctx.add_op("Sum", Op::ReduceSum, &[x], Shape::scalar())
}

/// Mean of every element, a scalar
pub fn reduce_mean(ctx: &mut BuildContext, x: &Tensor) -> Tensor {
    ctx.add_op("Mean", Op::ReduceMean, &[x], Shape::scalar())
}

pub fn concat(ctx: &mut BuildContext, axis: usize, inputs: &[Tensor]) -> Result<Tensor, GraphError> {
    let first = inputs
        .first()
        .ok_or_else(|| GraphError::shape("concat", "no inputs"))?;
    if axis >= first.rank() {
        return Err(GraphError::shape(
            "concat",
            format!("axis {} out of range for shape {}", axis, first.shape()),
        ));
    }
    let mut dims = first.shape().dims().to_vec();
    for t in &inputs[1..] {
        if t.rank() != dims.len() {
            return Err(GraphError::shape(
                "concat",
                format!("{} differs in rank from {}", t.shape(), first.shape()),
            ));
        }
        for (i, d) in t.shape().dims().iter().enumerate() {
            dims[i] = if i == axis {
                match (dims[i], d) {
                    (Dim::Known(a), Dim::Known(b)) => Dim::Known(a + b),
                    _ => Dim::Dynamic,
                }
            } else {
                dims[i].merge(d).ok_or_else(|| {
                    GraphError::shape("concat", format!("{} differs from {}", t.shape(), first.shape()))
                })?
            };
        }
    }
    let refs: Vec<&Tensor> = inputs.iter().collect();
    Ok(ctx.add_op("concat", Op::Concat { axis }, &refs, Shape::new(dims)))
}
