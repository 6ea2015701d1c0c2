//! Model functions
//!
//! A model function turns the input placeholder `x` and the target placeholder `y`
//! into a [`ModelOutput`]. Estimators pick one through a [`ModelKind`], custom ones
//! are plain closures ([`ModelFn`]).

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::{
    graph::{BuildContext, DType, Dim, GraphError, Shape, Tensor, ops},
    loss::{mean_squared_error_regressor, softmax_classifier},
    nn::{self, Activation},
    rnn::{Bidirectional, CellType, build_cell, static_rnn},
    seq2seq::{rnn_seq2seq, seq2seq_inputs, sequence_classifier},
};

/// What a model function hands back to the estimator
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Values for regressors, class probabilities for classifiers
    pub predictions: Tensor,
    /// Scalar training objective
    pub loss: Tensor,
}

/// A user supplied model function
pub type ModelFn = Rc<dyn Fn(&mut BuildContext, &Tensor, &Tensor) -> Result<ModelOutput, GraphError>>;

/// Whether a model ends in a regression or a classification head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Regression,
    Classification,
}

fn output_size(y: &Tensor) -> Result<usize, GraphError> {
    match y.dim(1).and_then(|d| d.known()) {
        Some(n) if y.rank() == 2 => Ok(n),
        _ => Err(GraphError::shape(
            "model",
            format!("expected targets of shape [batch, known outputs], got {}", y.shape()),
        )),
    }
}

/// `x * weights + bias` fitted by mean squared error, in scope `linear_regression`
pub fn linear_regression(ctx: &mut BuildContext, x: &Tensor, y: &Tensor) -> Result<ModelOutput, GraphError> {
    let (n_inputs, n_outputs) = (nn::input_size(x)?, output_size(y)?);
    ctx.variable_scope("linear_regression", |ctx| {
        let (weights, bias) = nn::dense_variables(ctx, n_inputs, n_outputs)?;
        let (predictions, loss) = mean_squared_error_regressor(ctx, x, y, &weights, &bias)?;
        Ok(ModelOutput { predictions, loss })
    })
}

/// Softmax over `x * weights + bias` fitted by cross entropy against the one hot
/// `y`, in scope `logistic_regression`
pub fn logistic_regression(ctx: &mut BuildContext, x: &Tensor, y: &Tensor) -> Result<ModelOutput, GraphError> {
    let (n_inputs, n_classes) = (nn::input_size(x)?, output_size(y)?);
    ctx.variable_scope("logistic_regression", |ctx| {
        let (weights, bias) = nn::dense_variables(ctx, n_inputs, n_classes)?;
        let (predictions, loss) = softmax_classifier(ctx, x, y, &weights, &bias)?;
        Ok(ModelOutput { predictions, loss })
    })
}

fn head(ctx: &mut BuildContext, x: &Tensor, y: &Tensor, target: Target) -> Result<ModelOutput, GraphError> {
    match target {
        Target::Regression => linear_regression(ctx, x, y),
        Target::Classification => logistic_regression(ctx, x, y),
    }
}

/// Hidden dense layers followed by a regression or classification head
pub fn dnn_model(
    ctx: &mut BuildContext,
    x: &Tensor,
    y: &Tensor,
    hidden_units: &[usize],
    activation: Activation,
    target: Target,
) -> Result<ModelOutput, GraphError> {
    let hidden = nn::dnn(ctx, x, hidden_units, activation)?;
    head(ctx, &hidden, y, target)
}

/// Recurrent model hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RnnParams {
    pub cell_type: CellType,
    pub rnn_size: usize,
    pub num_layers: usize,
    pub bidirectional: bool,
    /// Number of timesteps each input row is cut into
    pub sequence_length: usize,
}

impl Default for RnnParams {
    fn default() -> Self {
        Self {
            cell_type: CellType::Gru,
            rnn_size: 8,
            num_layers: 1,
            bidirectional: false,
            sequence_length: 1,
        }
    }
}

/// Unrolls a cell over the timesteps of `x` (`[batch, steps, dim]`) and feeds
/// the last output to the head
pub fn rnn_model(
    ctx: &mut BuildContext,
    x: &Tensor,
    y: &Tensor,
    params: &RnnParams,
    target: Target,
) -> Result<ModelOutput, GraphError> {
    let steps = ops::split_squeeze(ctx, 1, params.sequence_length, x)?;
    let outputs = if params.bidirectional {
        let birnn = Bidirectional::new(
            build_cell(params.cell_type, params.rnn_size, params.num_layers)?,
            build_cell(params.cell_type, params.rnn_size, params.num_layers)?,
        );
        birnn.unroll(ctx, &steps, DType::F32)?.0
    } else {
        let cell = build_cell(params.cell_type, params.rnn_size, params.num_layers)?;
        static_rnn(ctx, cell.as_ref(), &steps, None, DType::F32)?.0
    };
    let encoding = outputs
        .last()
        .ok_or_else(|| GraphError::shape("rnn_model", "no timesteps"))?;
    head(ctx, encoding, y, target)
}

/// Sequence to sequence hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seq2SeqParams {
    pub cell_type: CellType,
    pub num_layers: usize,
    pub input_length: usize,
    pub output_length: usize,
}

/// Encoder-decoder classifier over one hot sequences, `x` is
/// `[batch, input_length, dim]` and `y` is `[batch, output_length, vocab]`.
///
/// The cells are `vocab` wide so sampled outputs can be fed back as decoder
/// inputs. Predictions are the class probabilities of the sampling pass for the
/// `output_length + 1` decoder steps, the last one standing for the sentinel.
pub fn seq2seq_model(
    ctx: &mut BuildContext,
    x: &Tensor,
    y: &Tensor,
    params: &Seq2SeqParams,
) -> Result<ModelOutput, GraphError> {
    let vocab = y.dim(2).and_then(|d| d.known()).ok_or_else(|| {
        GraphError::shape("seq2seq_model", format!("unknown vocabulary size in {}", y.shape()))
    })?;
    let (encoder_inputs, decoder_inputs, decoder_targets) =
        seq2seq_inputs(ctx, x, y, params.input_length, params.output_length, None)?;
    let cell = build_cell(params.cell_type, vocab, params.num_layers)?;
    let decoded = rnn_seq2seq(ctx, &encoder_inputs, &decoder_inputs, cell.as_ref(), None, DType::F32)?;

    // one projection shared by every step of both passes
    let n_steps = decoded.outputs.len();
    let logits = ctx.variable_scope("output_projection", |ctx| {
        decoded
            .outputs
            .iter()
            .chain(&decoded.sampling_outputs)
            .enumerate()
            .map(|(i, output)| {
                if i > 0 {
                    ctx.reuse_variables();
                }
                nn::linear(ctx, "linear", output, vocab)
            })
            .collect::<Result<Vec<_>, _>>()
    })?;
    let (training, sampling) = logits.split_at(n_steps);
    let (predictions, loss) = sequence_classifier(ctx, training, &decoder_targets, Some(sampling))?;
    Ok(ModelOutput { predictions, loss })
}

/// The built-in model families an estimator can be configured with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelKind {
    /// Linear or logistic regression
    Linear,
    Dnn {
        hidden_units: Vec<usize>,
        activation: Activation,
    },
    Rnn(RnnParams),
    /// Encoder-decoder over one hot sequences, see [`seq2seq_model`]
    Seq2Seq(Seq2SeqParams),
    /// Built by a [`ModelFn`] that has to be supplied again on restore
    Custom,
}

/// `[steps, width / steps]`, when `width` splits evenly into `steps`
fn timesteps(width: usize, steps: usize) -> Result<Vec<usize>, GraphError> {
    if steps == 0 || width % steps != 0 {
        return Err(GraphError::Configuration(format!(
            "{} values cannot be cut into {} timesteps",
            width, steps
        )));
    }
    Ok(vec![steps, width / steps])
}

impl ModelKind {
    pub fn dnn(hidden_units: Vec<usize>) -> Self {
        ModelKind::Dnn {
            hidden_units,
            activation: Activation::Relu,
        }
    }

    /// Shape of one input example as fed to the graph. Recurrent models see each
    /// row of `n_features` as `sequence_length` equal steps.
    pub fn example_shape(&self, n_features: usize) -> Result<Vec<usize>, GraphError> {
        match self {
            ModelKind::Rnn(params) => timesteps(n_features, params.sequence_length),
            ModelKind::Seq2Seq(params) => timesteps(n_features, params.input_length),
            _ => Ok(vec![n_features]),
        }
    }

    /// Shape of one target row as fed to the graph. Seq2seq targets are
    /// `output_length` one hot steps.
    pub fn target_shape(&self, n_outputs: usize) -> Result<Vec<usize>, GraphError> {
        match self {
            ModelKind::Seq2Seq(params) => timesteps(n_outputs, params.output_length),
            _ => Ok(vec![n_outputs]),
        }
    }

    /// Placeholder shape for a batch of inputs
    pub fn input_shape(&self, n_features: usize) -> Result<Shape, GraphError> {
        let mut dims = vec![Dim::Dynamic];
        dims.extend(self.example_shape(n_features)?.into_iter().map(Dim::Known));
        Ok(Shape::new(dims))
    }

    pub fn build(
        &self,
        ctx: &mut BuildContext,
        x: &Tensor,
        y: &Tensor,
        target: Target,
    ) -> Result<ModelOutput, GraphError> {
        match self {
            ModelKind::Linear => head(ctx, x, y, target),
            ModelKind::Dnn {
                hidden_units,
                activation,
            } => dnn_model(ctx, x, y, hidden_units, *activation, target),
            ModelKind::Rnn(params) => rnn_model(ctx, x, y, params, target),
            ModelKind::Seq2Seq(params) => seq2seq_model(ctx, x, y, params),
            ModelKind::Custom => Err(GraphError::Configuration(
                "custom models are built by their model function".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::{Graph, HostTensor, Session},
        optim::Adagrad,
    };

    fn placeholders(ctx: &mut BuildContext, x: Shape, n_outputs: usize) -> (Tensor, Tensor) {
        let x = ops::placeholder(ctx, "input", x);
        let y = ops::placeholder(ctx, "output", Shape::new(vec![Dim::Dynamic, Dim::Known(n_outputs)]));
        (x, y)
    }

    #[test]
    fn test_linear_regression_variables() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let (x, y) = placeholders(&mut ctx, ModelKind::Linear.input_shape(3).unwrap(), 2);
        let output = ModelKind::Linear
            .build(&mut ctx, &x, &y, Target::Regression)
            .unwrap();
        assert_eq!(output.loss.shape(), &Shape::scalar());
        assert_eq!(output.predictions.dim(1), Some(Dim::Known(2)));
        assert_eq!(graph.variable("linear_regression/weights").unwrap().shape, vec![3, 2]);
        assert_eq!(graph.variable("linear_regression/bias").unwrap().shape, vec![2]);
    }

    #[test]
    fn test_dnn_classifier_variables() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let kind = ModelKind::dnn(vec![10, 20, 10]);
        let (x, y) = placeholders(&mut ctx, kind.input_shape(4).unwrap(), 3);
        kind.build(&mut ctx, &x, &y, Target::Classification).unwrap();
        let weights: Vec<(&str, Vec<usize>)> = graph
            .variables()
            .iter()
            .filter(|v| v.name.ends_with("/weights"))
            .map(|v| (v.name.as_str(), v.shape.clone()))
            .collect();
        assert_eq!(
            weights,
            vec![
                ("dnn/layer0/weights", vec![4, 10]),
                ("dnn/layer1/weights", vec![10, 20]),
                ("dnn/layer2/weights", vec![20, 10]),
                ("logistic_regression/weights", vec![10, 3]),
            ]
        );
    }

    #[test]
    fn test_rnn_example_shape() {
        let kind = ModelKind::Rnn(RnnParams {
            sequence_length: 5,
            ..RnnParams::default()
        });
        assert_eq!(kind.example_shape(10).unwrap(), vec![5, 2]);
        assert!(matches!(kind.example_shape(7), Err(GraphError::Configuration(_))));
        assert_eq!(ModelKind::Linear.example_shape(7).unwrap(), vec![7]);
        assert_eq!(ModelKind::Linear.target_shape(3).unwrap(), vec![3]);
    }

    #[test]
    fn test_seq2seq_kind_shapes() {
        let kind = ModelKind::Seq2Seq(Seq2SeqParams {
            cell_type: CellType::Gru,
            num_layers: 1,
            input_length: 3,
            output_length: 2,
        });
        assert_eq!(kind.example_shape(12).unwrap(), vec![3, 4]);
        assert_eq!(kind.target_shape(8).unwrap(), vec![2, 4]);
        assert!(matches!(kind.target_shape(7), Err(GraphError::Configuration(_))));
        assert!(matches!(kind.example_shape(10), Err(GraphError::Configuration(_))));

        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = ops::placeholder(&mut ctx, "input", kind.input_shape(12).unwrap());
        let y = ops::placeholder(&mut ctx, "output", Shape::new(vec![Dim::Dynamic, Dim::Known(2), Dim::Known(4)]));
        let output = kind.build(&mut ctx, &x, &y, Target::Regression).unwrap();
        assert_eq!(output.predictions.dim(1), Some(Dim::Known(12)));
    }

    #[test]
    fn test_rnn_model_builds() {
        for bidirectional in [false, true] {
            let mut graph = Graph::new();
            let mut ctx = BuildContext::new(&mut graph, 0);
            let kind = ModelKind::Rnn(RnnParams {
                cell_type: CellType::Lstm,
                rnn_size: 2,
                num_layers: 1,
                bidirectional,
                sequence_length: 5,
            });
            let (x, y) = placeholders(&mut ctx, kind.input_shape(5).unwrap(), 2);
            let output = kind.build(&mut ctx, &x, &y, Target::Classification).unwrap();

            let session = Session::new(&graph);
            let input = HostTensor::new(vec![1.0; 10], &[2, 5, 1]).unwrap();
            let out = session.run(&[&output.predictions], &[(&x, &input)]).unwrap();
            assert_eq!(out[0].shape(), &[2, 2]);
            let head = graph.variable("logistic_regression/weights").unwrap();
            let width = if bidirectional { 4 } else { 2 };
            assert_eq!(head.shape, vec![width, 2]);
        }
    }

    #[test]
    fn test_custom_kind_needs_a_function() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let (x, y) = placeholders(&mut ctx, Shape::new(vec![Dim::Dynamic, Dim::Known(2)]), 1);
        assert!(ModelKind::Custom.build(&mut ctx, &x, &y, Target::Regression).is_err());
    }

    #[test]
    fn test_seq2seq_model_trains() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 1);
        let x = ops::placeholder(&mut ctx, "input", Shape::new(vec![Dim::Dynamic, Dim::Known(2), Dim::Known(3)]));
        let y = ops::placeholder(&mut ctx, "output", Shape::new(vec![Dim::Dynamic, Dim::Known(2), Dim::Known(3)]));
        let params = Seq2SeqParams {
            cell_type: CellType::Gru,
            num_layers: 1,
            input_length: 2,
            output_length: 2,
        };
        let output = seq2seq_model(&mut ctx, &x, &y, &params).unwrap();
        assert_eq!(output.predictions.dim(1), Some(Dim::Known(9)));
        // encoder, decoder and one shared projection
        assert_eq!(graph.variables().len(), 6 + 6 + 2);
        assert!(graph.variable("output_projection/linear/weights").is_some());

        // reverse [a, b] into [b, a]
        let xs = HostTensor::new(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0], &[1, 2, 3]).unwrap();
        let ys = HostTensor::new(vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0], &[1, 2, 3]).unwrap();
        let mut optim = Adagrad::new(graph.trainable_values(), 0.3);
        let session = Session::new(&graph);
        let feeds = [(&x, &xs), (&y, &ys)];
        let first = session.train_step(&output.loss, &feeds, &mut optim).unwrap();
        let mut last = first;
        for _ in 0..30 {
            last = session.train_step(&output.loss, &feeds, &mut optim).unwrap();
        }
        assert!(last < first);

        // sampling predictions need only the inputs
        let out = session.run(&[&output.predictions], &[(&x, &xs)]).unwrap();
        assert_eq!(out[0].shape(), &[1, 9]);
    }
}
