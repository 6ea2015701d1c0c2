//! Scikit-learn style estimators over a small dataflow graph engine, with
//! recurrent and sequence-to-sequence model builders.

pub mod backprop_fns;
pub mod dataloader;
pub mod datasets;
pub mod estimator;
pub mod graph;
pub mod grid_search;
pub mod io;
pub mod loss;
pub mod metrics;
pub mod models;
pub mod monitors;
pub mod nn;
pub mod optim;
pub mod rnn;
pub mod seq2seq;
pub mod values;
