//! Static shapes of graph tensors

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// One dimension of a static shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    Known(usize),
    /// Only known once the graph is run, e.g. the batch dimension of a placeholder
    Dynamic,
}

impl Dim {
    pub fn known(&self) -> Option<usize> {
        match self {
            Dim::Known(n) => Some(*n),
            Dim::Dynamic => None,
        }
    }

    /// True if a concrete run time size can satisfy this dimension
    pub fn accepts(&self, size: usize) -> bool {
        match self {
            Dim::Known(n) => *n == size,
            Dim::Dynamic => true,
        }
    }

    /// Combines two dimensions that must agree, `None` on a definite mismatch
    pub fn merge(&self, other: &Dim) -> Option<Dim> {
        match (self, other) {
            (Dim::Known(a), Dim::Known(b)) if a != b => None,
            (Dim::Known(a), _) | (_, Dim::Known(a)) => Some(Dim::Known(*a)),
            (Dim::Dynamic, Dim::Dynamic) => Some(Dim::Dynamic),
        }
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Dim::Known(n)
    }
}

impl Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{}", n),
            Dim::Dynamic => write!(f, "?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape(pub Vec<Dim>);

impl Shape {
    pub fn new(dims: Vec<Dim>) -> Self {
        Self(dims)
    }

    /// A fully known shape
    pub fn known(dims: &[usize]) -> Self {
        Self(dims.iter().map(|&d| Dim::Known(d)).collect())
    }

    pub fn scalar() -> Self {
        Self(vec![])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    pub fn dim(&self, axis: usize) -> Option<Dim> {
        self.0.get(axis).copied()
    }

    /// Concrete sizes, if every dimension is known
    pub fn to_known(&self) -> Option<Vec<usize>> {
        self.0.iter().map(Dim::known).collect()
    }

    pub fn is_compatible_with(&self, sizes: &[usize]) -> bool {
        self.rank() == sizes.len() && self.0.iter().zip(sizes).all(|(d, &s)| d.accepts(s))
    }

    /// This shape with `axis` removed
    pub fn without_axis(&self, axis: usize) -> Shape {
        let mut dims = self.0.clone();
        dims.remove(axis);
        Shape(dims)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

/// Element type of a tensor. The evaluator computes in 32 bit floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DType {
    #[default]
    F32,
}
