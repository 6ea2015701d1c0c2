//! Training monitors, called by the estimator after every step

use crate::estimator::{Estimator, EstimatorError};

pub trait Monitor {
    /// Observes the training loss of `step`. Returning `true` stops training.
    fn update(&mut self, step: usize, train_loss: f32, estimator: &Estimator) -> Result<bool, EstimatorError>;
}

/// Records the training loss and logs it every `print_steps` steps
#[derive(Debug, Clone, Default)]
pub struct BaseMonitor {
    print_steps: usize,
    history: Vec<(usize, f32)>,
}

impl BaseMonitor {
    pub fn new(print_steps: usize) -> Self {
        Self {
            print_steps,
            history: vec![],
        }
    }

    /// `(step, training loss)` of every step seen so far
    pub fn history(&self) -> &[(usize, f32)] {
        &self.history
    }
}

fn is_print_step(step: usize, print_steps: usize) -> bool {
    print_steps > 0 && (step == 1 || step % print_steps == 0)
}

impl Monitor for BaseMonitor {
    fn update(&mut self, step: usize, train_loss: f32, _estimator: &Estimator) -> Result<bool, EstimatorError> {
        self.history.push((step, train_loss));
        if is_print_step(step, self.print_steps) {
            log::info!("Step #{}, loss: {:.5}", step, train_loss);
        }
        Ok(false)
    }
}

/// Evaluates the loss on held out data every `print_steps` steps and stops
/// training once it has not improved for more than `early_stopping_rounds`
/// evaluations
#[derive(Debug, Clone)]
pub struct ValidationMonitor {
    x: Vec<Vec<f32>>,
    y: Vec<Vec<f32>>,
    print_steps: usize,
    early_stopping_rounds: Option<usize>,
    best_step: Option<usize>,
    best_loss: f32,
    evaluations_since_best: usize,
    /// `(step, validation loss)` of every evaluation
    history: Vec<(usize, f32)>,
}

impl ValidationMonitor {
    pub fn new(x: Vec<Vec<f32>>, y: Vec<Vec<f32>>) -> Self {
        Self {
            x,
            y,
            print_steps: 100,
            early_stopping_rounds: None,
            best_step: None,
            best_loss: f32::INFINITY,
            evaluations_since_best: 0,
            history: vec![],
        }
    }

    pub fn with_print_steps(mut self, print_steps: usize) -> Self {
        self.print_steps = print_steps.max(1);
        self
    }

    pub fn with_early_stopping_rounds(mut self, rounds: usize) -> Self {
        self.early_stopping_rounds = Some(rounds);
        self
    }

    pub fn best_step(&self) -> Option<usize> {
        self.best_step
    }

    pub fn best_loss(&self) -> Option<f32> {
        self.best_step.map(|_| self.best_loss)
    }

    pub fn history(&self) -> &[(usize, f32)] {
        &self.history
    }
}

impl Monitor for ValidationMonitor {
    fn update(&mut self, step: usize, _train_loss: f32, estimator: &Estimator) -> Result<bool, EstimatorError> {
        if step % self.print_steps != 0 {
            return Ok(false);
        }
        let loss = estimator.evaluate_loss(&self.x, &self.y)?;
        self.history.push((step, loss));
        log::info!("Validation (step {}): loss = {:.5}", step, loss);
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_step = Some(step);
            self.evaluations_since_best = 0;
            return Ok(false);
        }
        self.evaluations_since_best += 1;
        match self.early_stopping_rounds {
            Some(rounds) if self.evaluations_since_best > rounds => {
                log::info!(
                    "Stopping. Best step: {:?} with loss {:.5}",
                    self.best_step,
                    self.best_loss
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimatorConfig;

    #[test]
    fn test_base_monitor_records_every_step() {
        let estimator = Estimator::linear_regressor(EstimatorConfig::default());
        let mut monitor = BaseMonitor::new(2);
        for step in 1..=3 {
            assert!(!monitor.update(step, step as f32, &estimator).unwrap());
        }
        assert_eq!(monitor.history().to_vec(), vec![(1, 1.0), (2, 2.0), (3, 3.0)]);
        assert!(is_print_step(1, 2) && is_print_step(4, 2) && !is_print_step(3, 2));
        assert!(!is_print_step(4, 0));
    }

    #[test]
    fn test_validation_monitor_needs_a_fitted_estimator() {
        let estimator = Estimator::linear_regressor(EstimatorConfig::default());
        let mut monitor = ValidationMonitor::new(vec![vec![1.0]], vec![vec![1.0]]).with_print_steps(1);
        assert!(matches!(
            monitor.update(1, 0.0, &estimator),
            Err(EstimatorError::NotFitted)
        ));
        assert_eq!(monitor.best_loss(), None);
    }
}
