//! Trains the estimators provided by `skflow_rs` on toy datasets
//!
//! # Usage
//! Runnable via
//! ```sh
//! cargo run -- -h
//! cargo run -- --model dnn --dataset moon
//! cargo run -- --model seq2seq --cell-type gru
//! ```
//!
//! Classifiers are trained on a two feature dataset and their decision boundary
//! is plotted. `seq2seq` learns to reverse random token sequences. Loss curves are
//! written to the output directory.

use std::{error::Error, fs};

use clap::{Parser, ValueEnum};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use skflow_rs::{
    datasets::{
        Dataset, gen_sequence_reversal, load_dataset, plot_data, plot_decision_boundary,
        plot_loss_curve,
    },
    estimator::{Estimator, EstimatorConfig},
    models::{ModelKind, RnnParams, Seq2SeqParams},
    monitors::BaseMonitor,
    optim::{LearningRate, OptimizerKind},
    rnn::CellType,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Model {
    Linear,
    Dnn,
    Rnn,
    Seq2seq,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Optimizer {
    Sgd,
    Adagrad,
}

#[derive(Parser)]
struct Args {
    #[clap(short, long, value_enum, default_value_t = Model::Dnn)]
    model: Model,
    #[clap(short, long, default_value_t = Dataset::Moon)]
    dataset: Dataset,
    #[clap(short, long, default_value_t = 200)]
    class_size: usize,
    #[clap(short, long, default_value_t = 500)]
    steps: usize,
    #[clap(short, long, default_value_t = 32)]
    batch_size: usize,
    #[clap(short, long, default_value_t = 0.1)]
    lr: f32,
    /// Exponential decay rate of the learning rate, constant when unset
    #[clap(long)]
    decay: Option<f32>,
    #[clap(long, default_value_t = 100)]
    decay_steps: usize,
    #[clap(long, value_enum, default_value_t = Optimizer::Adagrad)]
    optimizer: Optimizer,
    #[clap(long, default_value_t = 0.9)]
    momentum: f32,
    #[clap(long, value_delimiter = ',', default_value = "10,20,10")]
    hidden_units: Vec<usize>,
    /// rnn, gru or lstm
    #[clap(long, default_value = "gru")]
    cell_type: CellType,
    #[clap(long, default_value_t = 8)]
    rnn_size: usize,
    #[clap(long, default_value_t = 1)]
    num_layers: usize,
    #[clap(long, default_value_t = false)]
    bidirectional: bool,
    /// Tokens per sequence for seq2seq
    #[clap(long, default_value_t = 4)]
    seq_length: usize,
    /// Vocabulary size for seq2seq
    #[clap(long, default_value_t = 5)]
    vocab: usize,
    #[clap(short, long, default_value_t = 100)]
    print_steps: usize,
    #[clap(long, default_value_t = 42)]
    seed: u64,
    /// Directory to save the trained estimator to
    #[clap(long)]
    save: Option<String>,
    #[clap(short, long, default_value_t = format!("output"))]
    output_dir: String,
}

impl Args {
    fn learning_rate(&self) -> LearningRate {
        match self.decay {
            Some(decay_rate) => LearningRate::ExponentialDecay {
                initial: self.lr,
                decay_steps: self.decay_steps,
                decay_rate,
                staircase: false,
            },
            None => LearningRate::Constant(self.lr),
        }
    }

    fn optimizer(&self) -> OptimizerKind {
        match self.optimizer {
            Optimizer::Sgd => OptimizerKind::Sgd {
                momentum: self.momentum,
            },
            Optimizer::Adagrad => OptimizerKind::Adagrad,
        }
    }

    fn config(&self, n_classes: usize) -> EstimatorConfig {
        EstimatorConfig {
            n_classes,
            batch_size: self.batch_size,
            steps: self.steps,
            optimizer: self.optimizer(),
            learning_rate: self.learning_rate(),
            random_seed: self.seed,
            continue_training: false,
            print_steps: self.print_steps,
        }
    }
}

fn train_classifier(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut rng = Pcg64Mcg::seed_from_u64(args.seed);
    let (data, labels) = load_dataset(args.dataset, args.class_size, &mut rng);
    let n_classes = labels.iter().map(|l| l[0] as usize + 1).max().unwrap_or(2);
    plot_data(
        &data,
        &labels,
        &format!("{}/dataset_{}.png", args.output_dir, args.dataset),
        args.dataset,
    )?;

    let kind = match args.model {
        Model::Linear => ModelKind::Linear,
        Model::Dnn => ModelKind::dnn(args.hidden_units.clone()),
        // each point is read as two timesteps of one feature
        _ => ModelKind::Rnn(RnnParams {
            cell_type: args.cell_type,
            rnn_size: args.rnn_size,
            num_layers: args.num_layers,
            bidirectional: args.bidirectional,
            sequence_length: 2,
        }),
    };
    let mut estimator = Estimator::new(kind, args.config(n_classes));
    let mut monitor = BaseMonitor::new(args.print_steps);
    estimator.fit_with_monitor(&data, &labels, &mut monitor)?;
    log::info!("training accuracy: {:.3}", estimator.score(&data, &labels)?);

    plot_loss_curve(
        monitor.history(),
        &format!("{}/loss_{:?}_{}.png", args.output_dir, args.model, args.dataset),
        &format!("{:?} on {}", args.model, args.dataset),
    )?;
    plot_decision_boundary(
        &estimator,
        &format!("{}/decision_boundary_{:?}_{}.png", args.output_dir, args.model, args.dataset),
        args.dataset,
        &data,
        &labels,
    )?;
    if let Some(dir) = &args.save {
        estimator.save(dir)?;
    }
    Ok(())
}

fn train_seq2seq(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut rng = Pcg64Mcg::seed_from_u64(args.seed);
    let (inputs, targets) = gen_sequence_reversal(args.class_size, args.seq_length, args.vocab, &mut rng);

    let params = Seq2SeqParams {
        cell_type: args.cell_type,
        num_layers: args.num_layers,
        input_length: args.seq_length,
        output_length: args.seq_length,
    };
    let mut estimator = Estimator::seq2seq(params, args.config(0));
    let mut monitor = BaseMonitor::new(args.print_steps);
    estimator.fit_with_monitor(&inputs, &targets, &mut monitor)?;
    // the sampling decoder never sees the targets
    log::info!(
        "sampling token accuracy: {:.3}",
        estimator.score(&inputs, &targets)?
    );

    plot_loss_curve(
        monitor.history(),
        &format!("{}/loss_seq2seq_{}.png", args.output_dir, args.cell_type),
        &format!("seq2seq ({})", args.cell_type),
    )?;
    if let Some(dir) = &args.save {
        estimator.save(dir)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    fs::create_dir_all(&args.output_dir)?;
    match args.model {
        Model::Seq2seq => train_seq2seq(&args),
        _ => train_classifier(&args),
    }
}
