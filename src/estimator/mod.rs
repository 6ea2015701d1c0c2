//! Estimators with a `fit` / `predict` interface over the graph engine
//!
//! An [`Estimator`] builds its graph the first time it is fitted, from the
//! configured [`ModelKind`] (or a custom [`ModelFn`]), then trains it on random
//! mini batches. Classifiers take one column of class ids as targets, regressors
//! any number of target columns and seq2seq models flattened one hot sequences.

mod persist;

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    dataloader::{DataLoader, DataLoaderError, stack_rows},
    graph::{BuildContext, Dim, Graph, GraphError, HostTensor, Session, Shape, Tensor, ops},
    metrics,
    models::{ModelFn, ModelKind, ModelOutput, RnnParams, Seq2SeqParams, Target},
    monitors::{BaseMonitor, Monitor},
    optim::{LearningRate, Optim, OptimizerKind},
    rnn::CellType,
};

pub use persist::{CHECKPOINT_FILE, MODEL_FILE, VARIABLES_FILE};

/// Errors for estimators
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("data error: {0}")]
    Data(#[from] DataLoaderError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("estimator must be fitted first")]
    NotFitted,
    #[error("no saved model found at {path}")]
    ModelNotFound { path: String },
    #[error("no checkpoint found at {path}")]
    CheckpointMissing { path: String },
    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
    #[error("a custom model can only be restored with its model function")]
    CustomModelRequired,
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("invalid labels: {0}")]
    InvalidLabels(String),
    #[error("expected {expected} features, got {got}")]
    FeatureMismatch { expected: usize, got: usize },
}

/// Training hyper-parameters shared by every estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Number of classes, below 2 for regression
    pub n_classes: usize,
    pub batch_size: usize,
    /// Training steps per call to `fit`
    pub steps: usize,
    pub optimizer: OptimizerKind,
    pub learning_rate: LearningRate,
    /// Seeds variable initialization and batch sampling
    pub random_seed: u64,
    /// Keep the trained graph across calls to `fit`
    pub continue_training: bool,
    /// Log the training loss every `print_steps` steps, never when 0
    pub print_steps: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            n_classes: 0,
            batch_size: 32,
            steps: 200,
            optimizer: OptimizerKind::Adagrad,
            learning_rate: LearningRate::Constant(0.1),
            random_seed: 42,
            continue_training: false,
            print_steps: 100,
        }
    }
}

/// A single hyper-parameter change, as explored by [`crate::grid_search::GridSearch`]
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    LearningRate(LearningRate),
    BatchSize(usize),
    Steps(usize),
    Optimizer(OptimizerKind),
    RandomSeed(u64),
    HiddenUnits(Vec<usize>),
    CellType(CellType),
    RnnSize(usize),
    NumLayers(usize),
    Bidirectional(bool),
}

/// The graph of a fitted estimator and the handles needed to run it
struct Fitted {
    graph: Graph,
    x: Tensor,
    y: Tensor,
    output: ModelOutput,
    n_features: usize,
    n_outputs: usize,
    /// Shape of one example as fed to `x`
    example_shape: Vec<usize>,
    /// Shape of one target row as fed to `y`
    target_shape: Vec<usize>,
    optimizer: Box<dyn Optim>,
    global_step: usize,
}

pub struct Estimator {
    model: ModelKind,
    model_fn: Option<ModelFn>,
    config: EstimatorConfig,
    fitted: Option<Fitted>,
}

impl Estimator {
    pub fn new(model: ModelKind, config: EstimatorConfig) -> Self {
        Self {
            model,
            model_fn: None,
            config,
            fitted: None,
        }
    }

    /// An estimator whose graph is built by `model_fn`
    pub fn custom(model_fn: ModelFn, config: EstimatorConfig) -> Self {
        Self {
            model: ModelKind::Custom,
            model_fn: Some(model_fn),
            config,
            fitted: None,
        }
    }

    pub fn linear_regressor(config: EstimatorConfig) -> Self {
        Self::new(ModelKind::Linear, EstimatorConfig { n_classes: 0, ..config })
    }

    pub fn linear_classifier(n_classes: usize, config: EstimatorConfig) -> Self {
        Self::new(ModelKind::Linear, EstimatorConfig { n_classes, ..config })
    }

    pub fn dnn_regressor(hidden_units: Vec<usize>, config: EstimatorConfig) -> Self {
        Self::new(ModelKind::dnn(hidden_units), EstimatorConfig { n_classes: 0, ..config })
    }

    pub fn dnn_classifier(hidden_units: Vec<usize>, n_classes: usize, config: EstimatorConfig) -> Self {
        Self::new(ModelKind::dnn(hidden_units), EstimatorConfig { n_classes, ..config })
    }

    pub fn rnn_regressor(params: RnnParams, config: EstimatorConfig) -> Self {
        Self::new(ModelKind::Rnn(params), EstimatorConfig { n_classes: 0, ..config })
    }

    pub fn rnn_classifier(params: RnnParams, n_classes: usize, config: EstimatorConfig) -> Self {
        Self::new(ModelKind::Rnn(params), EstimatorConfig { n_classes, ..config })
    }

    /// Learns to map flattened one hot input sequences to flattened one hot
    /// output sequences
    pub fn seq2seq(params: Seq2SeqParams, config: EstimatorConfig) -> Self {
        Self::new(ModelKind::Seq2Seq(params), EstimatorConfig { n_classes: 0, ..config })
    }

    /// Same model and configuration, without the trained graph
    pub fn clone_unfitted(&self) -> Self {
        Self {
            model: self.model.clone(),
            model_fn: self.model_fn.clone(),
            config: self.config.clone(),
            fitted: None,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn model(&self) -> &ModelKind {
        &self.model
    }

    pub fn is_classifier(&self) -> bool {
        self.config.n_classes > 1
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Training steps taken since the graph was built
    pub fn global_step(&self) -> usize {
        self.fitted.as_ref().map_or(0, |f| f.global_step)
    }

    fn target(&self) -> Target {
        if self.is_classifier() {
            Target::Classification
        } else {
            Target::Regression
        }
    }

    fn fitted(&self) -> Result<&Fitted, EstimatorError> {
        self.fitted.as_ref().ok_or(EstimatorError::NotFitted)
    }

    /// Changes one hyper-parameter. Model parameters must match the model family,
    /// and any change drops the trained graph.
    pub fn set_param(&mut self, param: Param) -> Result<&mut Self, EstimatorError> {
        let mismatch = |param: &Param, model: &ModelKind| {
            EstimatorError::InvalidParam(format!("{:?} does not apply to a {:?} model", param, model))
        };
        match (&param, &mut self.model) {
            (Param::LearningRate(lr), _) => self.config.learning_rate = *lr,
            (Param::BatchSize(0), _) => {
                return Err(EstimatorError::InvalidParam("batch size must be positive".into()));
            }
            (Param::BatchSize(n), _) => self.config.batch_size = *n,
            (Param::Steps(n), _) => self.config.steps = *n,
            (Param::Optimizer(kind), _) => self.config.optimizer = *kind,
            (Param::RandomSeed(seed), _) => self.config.random_seed = *seed,
            (Param::HiddenUnits(units), ModelKind::Dnn { hidden_units, .. }) => {
                *hidden_units = units.clone()
            }
            (Param::CellType(cell_type), ModelKind::Rnn(params)) => params.cell_type = *cell_type,
            (Param::RnnSize(n), ModelKind::Rnn(params)) => params.rnn_size = *n,
            (Param::NumLayers(n), ModelKind::Rnn(params)) => params.num_layers = *n,
            (Param::CellType(cell_type), ModelKind::Seq2Seq(params)) => params.cell_type = *cell_type,
            (Param::NumLayers(n), ModelKind::Seq2Seq(params)) => params.num_layers = *n,
            (Param::Bidirectional(b), ModelKind::Rnn(params)) => params.bidirectional = *b,
            (param, model) => return Err(mismatch(param, &*model)),
        }
        self.fitted = None;
        Ok(self)
    }

    /// Builds a fresh graph for inputs of `n_features` and targets of `n_outputs`
    fn build(&self, n_features: usize, n_outputs: usize) -> Result<Fitted, EstimatorError> {
        let (example_shape, target_shape) = match self.model_fn {
            Some(_) => (vec![n_features], vec![n_outputs]),
            None => (
                self.model.example_shape(n_features)?,
                self.model.target_shape(n_outputs)?,
            ),
        };
        let mut graph = Graph::new();
        let (x, y, output) = {
            let mut ctx = BuildContext::new(&mut graph, self.config.random_seed);
            let mut input_dims = vec![Dim::Dynamic];
            input_dims.extend(example_shape.iter().copied().map(Dim::Known));
            let x = ops::placeholder(&mut ctx, "input", Shape::new(input_dims));
            let mut target_dims = vec![Dim::Dynamic];
            target_dims.extend(target_shape.iter().copied().map(Dim::Known));
            let y = ops::placeholder(&mut ctx, "output", Shape::new(target_dims));
            let output = match (&self.model_fn, &self.model) {
                (Some(model_fn), _) => model_fn(&mut ctx, &x, &y)?,
                (None, ModelKind::Custom) => return Err(EstimatorError::CustomModelRequired),
                (None, kind) => kind.build(&mut ctx, &x, &y, self.target())?,
            };
            (x, y, output)
        };
        if output.loss.rank() != 0 {
            return Err(GraphError::shape("model", format!("loss must be a scalar, got {}", output.loss.shape())).into());
        }
        let optimizer = self
            .config
            .optimizer
            .build(graph.trainable_values(), self.config.learning_rate.at(0));
        log::info!(
            "built {:?} graph with {} nodes and {} variables",
            self.model,
            graph.len(),
            graph.variables().len()
        );
        Ok(Fitted {
            graph,
            x,
            y,
            output,
            n_features,
            n_outputs,
            example_shape,
            target_shape,
            optimizer,
            global_step: 0,
        })
    }

    /// Classifiers get one hot rows of `n_classes`, regressors their targets as is
    fn encode_labels(&self, y: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, EstimatorError> {
        if !self.is_classifier() {
            return Ok(y.to_vec());
        }
        let n_classes = self.config.n_classes;
        y.iter()
            .map(|row| match row.as_slice() {
                [class] if class.fract() == 0.0 && *class >= 0.0 && (*class as usize) < n_classes => {
                    let mut one_hot = vec![0.0; n_classes];
                    one_hot[*class as usize] = 1.0;
                    Ok(one_hot)
                }
                _ => Err(EstimatorError::InvalidLabels(format!(
                    "expected a single class id below {}, got {:?}",
                    n_classes, row
                ))),
            })
            .collect()
    }

    fn check_features(&self, x: &[Vec<f32>]) -> Result<&Fitted, EstimatorError> {
        let fitted = self.fitted()?;
        if let Some(row) = x.iter().find(|r| r.len() != fitted.n_features) {
            return Err(EstimatorError::FeatureMismatch {
                expected: fitted.n_features,
                got: row.len(),
            });
        }
        Ok(fitted)
    }

    /// Trains for `config.steps` steps, logging through a [`BaseMonitor`]
    pub fn fit(&mut self, x: &[Vec<f32>], y: &[Vec<f32>]) -> Result<&mut Self, EstimatorError> {
        let mut monitor = BaseMonitor::new(self.config.print_steps);
        self.fit_with_monitor(x, y, &mut monitor)
    }

    /// Trains for `config.steps` steps or until `monitor` stops it. The graph is
    /// rebuilt first unless `continue_training` is set and it already exists.
    pub fn fit_with_monitor(
        &mut self,
        x: &[Vec<f32>],
        y: &[Vec<f32>],
        monitor: &mut dyn Monitor,
    ) -> Result<&mut Self, EstimatorError> {
        if !self.config.continue_training {
            self.fitted = None;
        }
        self.train(x, y, monitor)
    }

    /// Continues training the existing graph, building it if needed
    pub fn partial_fit(&mut self, x: &[Vec<f32>], y: &[Vec<f32>]) -> Result<&mut Self, EstimatorError> {
        let mut monitor = BaseMonitor::new(self.config.print_steps);
        self.train(x, y, &mut monitor)
    }

    fn train(
        &mut self,
        x: &[Vec<f32>],
        y: &[Vec<f32>],
        monitor: &mut dyn Monitor,
    ) -> Result<&mut Self, EstimatorError> {
        let labels = self.encode_labels(y)?;
        let loader = DataLoader::new(x.to_vec(), labels, self.config.batch_size)?;
        let (n_features, n_outputs) = (loader.n_features(), loader.n_outputs());
        if self.fitted.is_none() {
            self.fitted = Some(self.build(n_features, n_outputs)?);
        }
        let fitted = self.check_features(x)?;
        if fitted.n_outputs != n_outputs {
            return Err(EstimatorError::InvalidLabels(format!(
                "expected {} target columns, got {}",
                fitted.n_outputs, n_outputs
            )));
        }

        // batches differ between successive calls on the same graph
        let mut rng = Pcg64Mcg::seed_from_u64(self.config.random_seed.wrapping_add(fitted.global_step as u64));
        for _ in 0..self.config.steps {
            let loss = self.train_step(&loader, &mut rng)?;
            let step = self.global_step();
            if monitor.update(step, loss, self)? {
                log::info!("stopping early at step {}", step);
                break;
            }
        }
        Ok(self)
    }

    fn train_step(&mut self, loader: &DataLoader, rng: &mut Pcg64Mcg) -> Result<f32, EstimatorError> {
        let fitted = self.fitted.as_mut().ok_or(EstimatorError::NotFitted)?;
        let (data, labels) = loader.sample(rng);
        let x = stack_rows(&data, &fitted.example_shape)?;
        let y = stack_rows(&labels, &fitted.target_shape)?;
        fitted
            .optimizer
            .set_learning_rate(self.config.learning_rate.at(fitted.global_step));
        let session = Session::new(&fitted.graph);
        let loss = session.train_step(
            &fitted.output.loss,
            &[(&fitted.x, &x), (&fitted.y, &y)],
            fitted.optimizer.as_mut(),
        )?;
        fitted.global_step += 1;
        log::debug!("step {}, loss {}", fitted.global_step, loss);
        Ok(loss)
    }

    fn input_tensor(fitted: &Fitted, x: &[Vec<f32>]) -> Result<HostTensor, EstimatorError> {
        let rows: Vec<&[f32]> = x.iter().map(Vec::as_slice).collect();
        Ok(stack_rows(&rows, &fitted.example_shape)?)
    }

    /// Raw model predictions, class probabilities for classifiers
    pub fn predict_proba(&self, x: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, EstimatorError> {
        let fitted = self.check_features(x)?;
        if x.is_empty() {
            return Ok(vec![]);
        }
        let input = Self::input_tensor(fitted, x)?;
        let session = Session::new(&fitted.graph);
        let out = session.run(&[&fitted.output.predictions], &[(&fitted.x, &input)])?;
        Ok(out[0].to_rows())
    }

    /// The most likely token of each of the `output_length` steps of seq2seq
    /// rows, which are either targets or sampled probabilities
    fn sequence_tokens(fitted: &Fitted, rows: &[Vec<f32>]) -> Vec<Vec<f32>> {
        match fitted.target_shape.as_slice() {
            &[steps, vocab] => rows
                .iter()
                .map(|row| metrics::argmax_steps(row, vocab, steps))
                .collect(),
            _ => rows.to_vec(),
        }
    }

    /// One row per example: the predicted class id for classifiers, the predicted
    /// token id per output step for seq2seq models, the predicted values for
    /// regressors
    pub fn predict(&self, x: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, EstimatorError> {
        let predictions = self.predict_proba(x)?;
        if let ModelKind::Seq2Seq(_) = self.model {
            return Ok(Self::sequence_tokens(self.fitted()?, &predictions));
        }
        if !self.is_classifier() {
            return Ok(predictions);
        }
        Ok(predictions
            .iter()
            .map(|row| vec![metrics::argmax(row) as f32])
            .collect())
    }

    /// Value of the training objective on `x` and `y`
    pub fn evaluate_loss(&self, x: &[Vec<f32>], y: &[Vec<f32>]) -> Result<f32, EstimatorError> {
        let fitted = self.check_features(x)?;
        let labels = self.encode_labels(y)?;
        if labels.len() != x.len() {
            return Err(DataLoaderError::LabelLengthMismatch {
                label_len: labels.len(),
                data_len: x.len(),
            }
            .into());
        }
        let input = Self::input_tensor(fitted, x)?;
        let rows: Vec<&[f32]> = labels.iter().map(Vec::as_slice).collect();
        let targets = stack_rows(&rows, &fitted.target_shape)?;
        let session = Session::new(&fitted.graph);
        let out = session.run(&[&fitted.output.loss], &[(&fitted.x, &input), (&fitted.y, &targets)])?;
        out[0]
            .scalar_value()
            .ok_or_else(|| GraphError::shape("loss", "not a scalar").into())
    }

    /// Accuracy for classifiers, token accuracy for seq2seq models, negated mean
    /// squared error for regressors, so higher is better for all of them
    pub fn score(&self, x: &[Vec<f32>], y: &[Vec<f32>]) -> Result<f32, EstimatorError> {
        let predictions = self.predict(x)?;
        if let ModelKind::Seq2Seq(_) = self.model {
            let targets = Self::sequence_tokens(self.fitted()?, y);
            Ok(metrics::token_accuracy(&targets, &predictions))
        } else if self.is_classifier() {
            Ok(metrics::accuracy_score(y, &predictions))
        } else {
            Ok(-metrics::mean_squared_error(y, &predictions))
        }
    }

    fn variables_ending_with(&self, suffix: &str) -> Result<Vec<HostTensor>, EstimatorError> {
        let fitted = self.fitted()?;
        fitted
            .graph
            .variables()
            .iter()
            .filter(|v| v.name.ends_with(suffix))
            .map(|v| HostTensor::new(v.data(), &v.shape).map_err(EstimatorError::from))
            .collect()
    }

    /// Weight matrices of the dense layers, input layer first
    pub fn weights(&self) -> Result<Vec<HostTensor>, EstimatorError> {
        self.variables_ending_with("/weights")
    }

    /// Bias vectors of the dense layers, input layer first
    pub fn biases(&self) -> Result<Vec<HostTensor>, EstimatorError> {
        self.variables_ending_with("/bias")
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{datasets, models, monitors::ValidationMonitor};

    fn blobs(seed: u64) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        datasets::gen_blobs(3, 4, 30, &mut rng)
    }

    #[test]
    fn test_linear_classifier() {
        let (x, y) = blobs(0);
        let mut classifier = Estimator::linear_classifier(3, EstimatorConfig::default());
        classifier.fit(&x, &y).unwrap();
        assert!(classifier.score(&x, &y).unwrap() > 0.9);
        let probabilities = classifier.predict_proba(&x[..2]).unwrap();
        assert_eq!(probabilities.len(), 2);
        assert!((probabilities[0].iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert_eq!(classifier.global_step(), 200);
    }

    #[test]
    fn test_dnn_classifier_weights() {
        let (x, y) = blobs(1);
        let mut classifier = Estimator::dnn_classifier(vec![10, 20, 10], 3, EstimatorConfig::default());
        classifier.fit(&x, &y).unwrap();
        assert!(classifier.score(&x, &y).unwrap() > 0.5);
        let shapes: Vec<Vec<usize>> = classifier
            .weights()
            .unwrap()
            .iter()
            .map(|w| w.shape().to_vec())
            .collect();
        assert_eq!(shapes, vec![vec![4, 10], vec![10, 20], vec![20, 10], vec![10, 3]]);
        assert_eq!(classifier.biases().unwrap().len(), 4);
    }

    #[test]
    fn test_multi_output_regression() {
        let x: Vec<Vec<f32>> = (0..40).map(|i| vec![i as f32 / 20.0 - 1.0]).collect();
        let y: Vec<Vec<f32>> = x.iter().map(|r| vec![2.0 * r[0] + 1.0, -r[0]]).collect();
        let config = EstimatorConfig {
            steps: 500,
            learning_rate: LearningRate::Constant(0.3),
            ..EstimatorConfig::default()
        };
        let mut regressor = Estimator::linear_regressor(config);
        regressor.fit(&x, &y).unwrap();
        let predictions = regressor.predict(&x).unwrap();
        assert_eq!(predictions[0].len(), 2);
        assert!(metrics::mean_squared_error(&y, &predictions) < 0.1);
    }

    #[test]
    fn test_rnn_classifier_trains() {
        let x = vec![
            vec![2.0, 1.0, 2.0, 2.0, 3.0],
            vec![2.0, 2.0, 3.0, 4.0, 5.0],
            vec![3.0, 3.0, 1.0, 2.0, 1.0],
            vec![2.0, 4.0, 5.0, 4.0, 1.0],
        ];
        let y = vec![vec![1.0], vec![0.0], vec![1.0], vec![0.0]];
        for (cell_type, bidirectional) in [(CellType::Lstm, false), (CellType::Lstm, true), (CellType::BasicRnn, false)] {
            let params = RnnParams {
                cell_type,
                rnn_size: 2,
                num_layers: 1,
                bidirectional,
                sequence_length: 5,
            };
            let mut classifier = Estimator::rnn_classifier(params, 2, EstimatorConfig::default());
            let mut monitor = BaseMonitor::new(0);
            classifier.fit_with_monitor(&x, &y, &mut monitor).unwrap();
            let history = monitor.history();
            let first: f32 = history[..10].iter().map(|(_, l)| l).sum();
            let last: f32 = history[history.len() - 10..].iter().map(|(_, l)| l).sum();
            assert!(last < first);
            let predictions = classifier.predict(&[vec![1.0, 3.0, 3.0, 2.0, 1.0]]).unwrap();
            assert!(predictions[0][0] == 0.0 || predictions[0][0] == 1.0);
        }
    }

    #[test]
    fn test_seq2seq_estimator_trains() {
        let mut rng = Pcg64Mcg::seed_from_u64(6);
        let (x, y) = datasets::gen_sequence_reversal(20, 3, 3, &mut rng);
        let params = Seq2SeqParams {
            cell_type: CellType::Gru,
            num_layers: 1,
            input_length: 3,
            output_length: 3,
        };
        let config = EstimatorConfig {
            steps: 50,
            learning_rate: LearningRate::Constant(0.3),
            ..EstimatorConfig::default()
        };
        let mut estimator = Estimator::seq2seq(params, config);
        let mut monitor = BaseMonitor::new(0);
        estimator.fit_with_monitor(&x, &y, &mut monitor).unwrap();
        let history = monitor.history();
        let first: f32 = history[..5].iter().map(|(_, l)| l).sum();
        let last: f32 = history[history.len() - 5..].iter().map(|(_, l)| l).sum();
        assert!(last < first);

        // sentinel step included in the probabilities, not in the tokens
        assert_eq!(estimator.predict_proba(&x[..2]).unwrap()[0].len(), 12);
        let tokens = estimator.predict(&x[..2]).unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().flatten().all(|&t| t == 0.0 || t == 1.0 || t == 2.0));
        let score = estimator.score(&x, &y).unwrap();
        assert!((0.0..=1.0).contains(&score));
        assert!(estimator.evaluate_loss(&x, &y).unwrap().is_finite());

        estimator.set_param(Param::CellType(CellType::Lstm)).unwrap();
        assert!(!estimator.is_fitted());
        assert!(estimator.set_param(Param::RnnSize(4)).is_err());
    }

    #[test]
    fn test_invalid_cell_configuration() {
        let params = RnnParams {
            rnn_size: 0,
            sequence_length: 5,
            ..RnnParams::default()
        };
        let mut classifier = Estimator::rnn_classifier(params, 2, EstimatorConfig::default());
        let x = vec![vec![1.0; 5]; 4];
        let y = vec![vec![0.0], vec![1.0], vec![0.0], vec![1.0]];
        assert!(matches!(
            classifier.fit(&x, &y),
            Err(EstimatorError::Graph(GraphError::Configuration(_)))
        ));
    }

    #[test]
    fn test_custom_model() {
        let model_fn: ModelFn = Rc::new(models::logistic_regression);
        let (x, y) = blobs(2);
        let mut classifier = Estimator::custom(
            model_fn,
            EstimatorConfig {
                n_classes: 3,
                ..EstimatorConfig::default()
            },
        );
        classifier.fit(&x, &y).unwrap();
        assert!(classifier.score(&x, &y).unwrap() > 0.9);
    }

    #[test]
    fn test_not_fitted_and_bad_inputs() {
        let classifier = Estimator::linear_classifier(3, EstimatorConfig::default());
        assert!(matches!(classifier.predict(&[vec![1.0]]), Err(EstimatorError::NotFitted)));
        assert!(matches!(classifier.weights(), Err(EstimatorError::NotFitted)));

        let (x, y) = blobs(3);
        let mut classifier = Estimator::linear_classifier(
            3,
            EstimatorConfig {
                steps: 5,
                ..EstimatorConfig::default()
            },
        );
        let bad_labels = vec![vec![5.0]; x.len()];
        assert!(matches!(classifier.fit(&x, &bad_labels), Err(EstimatorError::InvalidLabels(_))));
        classifier.fit(&x, &y).unwrap();
        assert!(matches!(
            classifier.predict(&[vec![1.0, 2.0]]),
            Err(EstimatorError::FeatureMismatch { expected: 4, got: 2 })
        ));
    }

    #[test]
    fn test_continue_training() {
        let (x, y) = blobs(4);
        let config = EstimatorConfig {
            steps: 10,
            continue_training: true,
            ..EstimatorConfig::default()
        };
        let mut classifier = Estimator::linear_classifier(3, config.clone());
        classifier.fit(&x, &y).unwrap();
        classifier.fit(&x, &y).unwrap();
        assert_eq!(classifier.global_step(), 20);

        let mut fresh = Estimator::linear_classifier(3, EstimatorConfig { continue_training: false, ..config });
        fresh.fit(&x, &y).unwrap();
        fresh.fit(&x, &y).unwrap();
        assert_eq!(fresh.global_step(), 10);
        fresh.partial_fit(&x, &y).unwrap();
        assert_eq!(fresh.global_step(), 20);
    }

    #[test]
    fn test_set_param() {
        let mut classifier = Estimator::dnn_classifier(vec![5], 3, EstimatorConfig::default());
        classifier
            .set_param(Param::HiddenUnits(vec![4, 4]))
            .unwrap()
            .set_param(Param::LearningRate(LearningRate::Constant(0.05)))
            .unwrap();
        assert_eq!(classifier.model(), &ModelKind::dnn(vec![4, 4]));
        assert_eq!(classifier.config().learning_rate, LearningRate::Constant(0.05));
        assert!(matches!(
            classifier.set_param(Param::RnnSize(3)),
            Err(EstimatorError::InvalidParam(_))
        ));
        assert!(classifier.set_param(Param::BatchSize(0)).is_err());
    }

    #[test]
    fn test_validation_monitor_stops_early() {
        let (x, y) = blobs(5);
        // validation labels disagree with training, so fitting makes them worse
        let y_val: Vec<Vec<f32>> = y.iter().map(|r| vec![(r[0] + 1.0) % 3.0]).collect();
        let mut monitor = ValidationMonitor::new(x.clone(), y_val)
            .with_print_steps(1)
            .with_early_stopping_rounds(2);
        let mut classifier = Estimator::linear_classifier(
            3,
            EstimatorConfig {
                steps: 2000,
                ..EstimatorConfig::default()
            },
        );
        classifier.fit_with_monitor(&x, &y, &mut monitor).unwrap();
        assert!(classifier.global_step() < 2000);
        assert!(monitor.best_step().is_some());
        assert_eq!(monitor.history().len(), classifier.global_step());
    }
}
