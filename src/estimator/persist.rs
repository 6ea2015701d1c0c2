//! Saving a fitted estimator to a directory and restoring it

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Component, Path},
};

use serde::{Deserialize, Serialize};

use super::{Estimator, EstimatorConfig, EstimatorError};
use crate::models::{ModelFn, ModelKind};

pub const MODEL_FILE: &str = "model.json";
pub const VARIABLES_FILE: &str = "variables.json";
pub const CHECKPOINT_FILE: &str = "checkpoint";

/// Everything needed to rebuild the graph
#[derive(Debug, Serialize, Deserialize)]
struct SavedModel {
    model: ModelKind,
    config: EstimatorConfig,
    n_features: usize,
    n_outputs: usize,
    global_step: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedVariable {
    name: String,
    shape: Vec<usize>,
    data: Vec<f32>,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EstimatorError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, EstimatorError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// The variables file named by a checkpoint. It must be a plain file name so
/// it resolves inside the checkpoint's directory.
fn checkpoint_path(checkpoint: &str) -> Result<&str, EstimatorError> {
    let name = checkpoint
        .lines()
        .find_map(|line| {
            line.strip_prefix("model_checkpoint_path:")
                .map(|rest| rest.trim().trim_matches('"'))
        })
        .ok_or_else(|| EstimatorError::InvalidCheckpoint("no model_checkpoint_path".into()))?;
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(EstimatorError::InvalidCheckpoint(format!(
            "model_checkpoint_path {:?} is not a file name",
            name
        ))),
    }
}

impl Estimator {
    /// Writes the model description, the variable values and a checkpoint file
    /// into `dir`, creating it if needed
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), EstimatorError> {
        let dir = dir.as_ref();
        let fitted = self.fitted()?;
        fs::create_dir_all(dir)?;

        let saved = SavedModel {
            model: self.model.clone(),
            config: self.config.clone(),
            n_features: fitted.n_features,
            n_outputs: fitted.n_outputs,
            global_step: fitted.global_step,
        };
        write_json(&dir.join(MODEL_FILE), &saved)?;

        let variables: Vec<SavedVariable> = fitted
            .graph
            .variables()
            .iter()
            .map(|v| SavedVariable {
                name: v.name.clone(),
                shape: v.shape.clone(),
                data: v.data(),
            })
            .collect();
        write_json(&dir.join(VARIABLES_FILE), &variables)?;

        fs::write(
            dir.join(CHECKPOINT_FILE),
            format!(
                "model_checkpoint_path: \"{}\"\nglobal_step: {}\n",
                VARIABLES_FILE, fitted.global_step
            ),
        )?;
        log::info!(
            "saved {} variables at step {} to {}",
            variables.len(),
            fitted.global_step,
            dir.display()
        );
        Ok(())
    }

    /// Restores an estimator saved with [`Estimator::save`]
    pub fn restore(dir: impl AsRef<Path>) -> Result<Self, EstimatorError> {
        Self::restore_from(dir.as_ref(), None)
    }

    /// Restores an estimator built from a custom model function
    pub fn restore_with_model_fn(dir: impl AsRef<Path>, model_fn: ModelFn) -> Result<Self, EstimatorError> {
        Self::restore_from(dir.as_ref(), Some(model_fn))
    }

    fn restore_from(dir: &Path, model_fn: Option<ModelFn>) -> Result<Self, EstimatorError> {
        let model_path = dir.join(MODEL_FILE);
        if !model_path.is_file() {
            return Err(EstimatorError::ModelNotFound {
                path: dir.display().to_string(),
            });
        }
        let saved: SavedModel = read_json(&model_path)?;
        if saved.model == ModelKind::Custom && model_fn.is_none() {
            return Err(EstimatorError::CustomModelRequired);
        }

        let checkpoint = dir.join(CHECKPOINT_FILE);
        if !checkpoint.is_file() {
            return Err(EstimatorError::CheckpointMissing {
                path: checkpoint.display().to_string(),
            });
        }
        let checkpoint = fs::read_to_string(&checkpoint)?;
        let variables_file = checkpoint_path(&checkpoint)?;
        let variables: Vec<SavedVariable> = read_json(&dir.join(variables_file))?;

        let mut estimator = Estimator {
            model: saved.model,
            model_fn,
            config: saved.config,
            fitted: None,
        };
        let mut fitted = estimator.build(saved.n_features, saved.n_outputs)?;
        if variables.len() != fitted.graph.variables().len() {
            return Err(EstimatorError::InvalidCheckpoint(format!(
                "expected {} variables, found {}",
                fitted.graph.variables().len(),
                variables.len()
            )));
        }
        for saved_var in variables {
            let variable = fitted
                .graph
                .variable_mut(&saved_var.name)
                .ok_or_else(|| EstimatorError::InvalidCheckpoint(format!("unknown variable {}", saved_var.name)))?;
            if variable.shape != saved_var.shape || variable.values.len() != saved_var.data.len() {
                return Err(EstimatorError::InvalidCheckpoint(format!(
                    "variable {} has shape {:?}, saved as {:?}",
                    saved_var.name, variable.shape, saved_var.shape
                )));
            }
            for (value, data) in variable.values.iter_mut().zip(saved_var.data) {
                value.set_data(data);
            }
        }
        fitted.global_step = saved.global_step;
        estimator.fitted = Some(fitted);
        log::info!("restored model from {}", dir.display());
        Ok(estimator)
    }
}
