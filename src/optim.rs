//! Optimizer(s) and learning rate schedules

use serde::{Deserialize, Serialize};

use crate::values::Value;

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients
    fn step(&mut self);
    /// Zeros gradients for all parameters
    fn zero_grad(&mut self);
    fn set_learning_rate(&mut self, lr: f32);
}

fn zero_all(params: &mut [Value]) {
    for param in params.iter_mut() {
        param.zero_grad();
    }
}

/// SGD with momentum
pub struct SGD {
    params: Vec<Value>,
    lr: f32,
    momentum: f32,
    // velocity per parameter
    velocity: Vec<f32>,
}

impl SGD {
    pub fn new(params: Vec<Value>, lr: f32, momentum: f32) -> Self {
        let velocity = vec![0.0; params.len()];
        Self {
            params,
            lr,
            momentum,
            velocity,
        }
    }

    #[cfg(test)]
    fn velocities(&self) -> &[f32] {
        &self.velocity
    }
}

impl Optim for SGD {
    fn step(&mut self) {
        for (idx, param) in self.params.iter_mut().enumerate() {
            let velocity = self.momentum * self.velocity[idx] - self.lr * param.grad();
            let new_val = param.data() + velocity;
            self.velocity[idx] = velocity;
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        zero_all(&mut self.params);
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Adagrad, scales each parameter's step by its accumulated squared gradients
pub struct Adagrad {
    params: Vec<Value>,
    lr: f32,
    accumulators: Vec<f32>,
}

impl Adagrad {
    pub const INITIAL_ACCUMULATOR: f32 = 0.1;

    pub fn new(params: Vec<Value>, lr: f32) -> Self {
        let accumulators = vec![Self::INITIAL_ACCUMULATOR; params.len()];
        Self {
            params,
            lr,
            accumulators,
        }
    }
}

impl Optim for Adagrad {
    fn step(&mut self) {
        for (param, acc) in self.params.iter_mut().zip(self.accumulators.iter_mut()) {
            let grad = param.grad();
            *acc += grad * grad;
            let new_val = param.data() - self.lr * grad / acc.sqrt();
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        zero_all(&mut self.params);
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Which optimizer an estimator trains with
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Sgd { momentum: f32 },
    Adagrad,
}

impl OptimizerKind {
    pub fn build(&self, params: Vec<Value>, lr: f32) -> Box<dyn Optim> {
        match *self {
            OptimizerKind::Sgd { momentum } => Box::new(SGD::new(params, lr, momentum)),
            OptimizerKind::Adagrad => Box::new(Adagrad::new(params, lr)),
        }
    }
}

/// Learning rate as a function of the global step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LearningRate {
    Constant(f32),
    /// `initial * decay_rate ^ (step / decay_steps)`, the exponent floored when `staircase`
    ExponentialDecay {
        initial: f32,
        decay_steps: usize,
        decay_rate: f32,
        staircase: bool,
    },
}

impl LearningRate {
    pub fn at(&self, step: usize) -> f32 {
        match *self {
            LearningRate::Constant(lr) => lr,
            LearningRate::ExponentialDecay {
                initial,
                decay_steps,
                decay_rate,
                staircase,
            } => {
                let mut exponent = step as f32 / decay_steps.max(1) as f32;
                if staircase {
                    exponent = exponent.floor();
                }
                initial * decay_rate.powf(exponent)
            }
        }
    }
}

impl From<f32> for LearningRate {
    fn from(lr: f32) -> Self {
        LearningRate::Constant(lr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_float;

    #[test]
    fn test_sgd_no_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone()], 0.1, 0.0);
        optim.step();
        assert_eq!(a.grad(), 1.0);
        assert_eq!(a.data(), 0.9);
        assert_eq!(b.data(), 1.9);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone()], 0.1, 0.9);
        optim.step();
        assert_eq!(a.data(), 0.9);
        assert_eq!(b.data(), 1.9);
        assert_eq!(optim.velocities(), &[-0.1, -0.1]);
        optim.step();
        assert_eq_float!(a.data(), 0.71);
        assert_eq_float!(b.data(), 1.71);
        assert_eq_float!(optim.velocities()[0], -0.19);
    }

    #[test]
    fn test_adagrad() {
        let a = Value::new(1.0);
        let c = &a * &Value::new(2.0);
        c.backward();

        let mut optim = Adagrad::new(vec![a.clone()], 0.1);
        optim.step();
        // accumulator 0.1 + 2^2, step 0.1 * 2 / sqrt(4.1)
        assert_eq_float!(a.data(), 1.0 - 0.2 / 4.1f32.sqrt());
        optim.zero_grad();
        assert_eq!(a.grad(), 0.0);
    }

    #[test]
    fn test_exponential_decay() {
        let lr = LearningRate::ExponentialDecay {
            initial: 0.1,
            decay_steps: 100,
            decay_rate: 0.5,
            staircase: false,
        };
        assert_eq_float!(lr.at(0), 0.1);
        assert_eq_float!(lr.at(100), 0.05);
        assert_eq_float!(lr.at(50), 0.1 * 0.5f32.sqrt());

        let stairs = LearningRate::ExponentialDecay {
            initial: 0.1,
            decay_steps: 100,
            decay_rate: 0.5,
            staircase: true,
        };
        assert_eq_float!(stairs.at(150), 0.05);
        assert_eq!(LearningRate::from(0.3).at(1000), 0.3);
    }
}
