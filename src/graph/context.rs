//! Explicit naming and variable sharing state for graph construction
//!
//! Every builder function takes a [`BuildContext`]. It carries the scope path
//! new nodes and variables are named under, and whether variables requested in
//! the current variable scope must be created or reused. Weight sharing between
//! unrolled timesteps is expressed by calling [`BuildContext::reuse_variables`].

use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};
use rand_pcg::Pcg64Mcg;

use crate::values::Value;

use super::{
    GraphError,
    node::{Graph, Op, Tensor},
    shape::Shape,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// Names variables and ops
    Variable,
    /// Names ops only
    Name,
}

#[derive(Debug)]
struct Frame {
    name: String,
    kind: FrameKind,
    reuse: bool,
}

/// How a new variable is filled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    Zeros,
    Constant(f32),
    /// Uniform in `±factor * sqrt(3 / fan_in)`, which keeps the output scale of
    /// a linear map close to its input scale
    UniformUnitScaling(f32),
    Normal { std: f32 },
}

pub struct BuildContext<'g> {
    graph: &'g mut Graph,
    frames: Vec<Frame>,
    root_reuse: bool,
    rng: Pcg64Mcg,
}

impl<'g> BuildContext<'g> {
    pub fn new(graph: &'g mut Graph, seed: u64) -> Self {
        Self {
            graph,
            frames: vec![],
            root_reuse: false,
            rng: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Runs `f` inside a variable scope named `name`, the scope is left on every path
    pub fn variable_scope<R>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        self.with_frame(name, FrameKind::Variable, f)
    }

    /// Like [`Self::variable_scope`], but only prefixes op names
    pub fn name_scope<R>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        self.with_frame(name, FrameKind::Name, f)
    }

    fn with_frame<R>(&mut self, name: &str, kind: FrameKind, f: impl FnOnce(&mut Self) -> R) -> R {
        self.frames.push(Frame {
            name: name.to_string(),
            kind,
            reuse: false,
        });
        let result = f(self);
        self.frames.pop();
        result
    }

    /// Marks the innermost variable scope as reusing its existing variables. Nested
    /// scopes inherit the flag, it is dropped when the scope is left.
    pub fn reuse_variables(&mut self) {
        match self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.kind == FrameKind::Variable)
        {
            Some(frame) => frame.reuse = true,
            None => self.root_reuse = true,
        }
    }

    pub fn is_reusing(&self) -> bool {
        self.root_reuse
            || self
                .frames
                .iter()
                .any(|f| f.kind == FrameKind::Variable && f.reuse)
    }

    /// Full scope path, as used for op names
    pub fn scope_path(&self) -> String {
        join(self.frames.iter().map(|f| f.name.as_str()))
    }

    fn variable_path(&self) -> String {
        join(
            self.frames
                .iter()
                .filter(|f| f.kind == FrameKind::Variable)
                .map(|f| f.name.as_str()),
        )
    }

    /// Adds an op named `base` under the current scope
    pub(crate) fn add_op(&mut self, base: &str, op: Op, inputs: &[&Tensor], shape: Shape) -> Tensor {
        let name = qualify(&self.scope_path(), base);
        self.graph.add_node(&name, op, inputs, shape)
    }

    /// Creates variable `name` in the current variable scope, or returns the existing
    /// one when the scope is reusing
    pub fn get_variable(
        &mut self,
        name: &str,
        shape: &[usize],
        init: Initializer,
    ) -> Result<Tensor, GraphError> {
        let full_name = qualify(&self.variable_path(), name);

        if self.is_reusing() {
            let existing = self
                .graph
                .variable(&full_name)
                .filter(|v| v.shape == shape)
                .and_then(|_| self.graph.variable_tensor(&full_name));
            log::debug!("reusing variable {}", full_name);
            return existing.ok_or(GraphError::VariableMissing { name: full_name });
        }

        if self.graph.variable(&full_name).is_some() {
            return Err(GraphError::VariableExists { name: full_name });
        }
        let values = self.initial_values(shape, init)?;
        log::debug!("creating variable {} {:?}", full_name, shape);
        Ok(self.graph.add_variable(&full_name, shape, values))
    }

    fn initial_values(&mut self, shape: &[usize], init: Initializer) -> Result<Vec<Value>, GraphError> {
        let n: usize = shape.iter().product();
        let data: Vec<f32> = match init {
            Initializer::Zeros => vec![0.0; n],
            Initializer::Constant(c) => vec![c; n],
            Initializer::UniformUnitScaling(factor) => {
                let fan_in: usize = shape[..shape.len().saturating_sub(1)].iter().product();
                let limit = factor * (3.0 / fan_in.max(1) as f32).sqrt();
                let uniform = Uniform::new(-limit, limit)
                    .map_err(|e| GraphError::Configuration(format!("initializer: {}", e)))?;
                (0..n).map(|_| uniform.sample(&mut self.rng)).collect()
            }
            Initializer::Normal { std } => {
                let normal = Normal::new(0.0, std)
                    .map_err(|e| GraphError::Configuration(format!("initializer: {}", e)))?;
                (0..n).map(|_| normal.sample(&mut self.rng)).collect()
            }
        };
        Ok(data.into_iter().map(Value::new).collect())
    }
}

fn join<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join("/")
}

fn qualify(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path, name)
    }
}
