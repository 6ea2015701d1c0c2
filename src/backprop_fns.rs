//! Incremental gradient update functions for backprop
//!
//! Applied depending on the operation which created outputs from inputs. Each
//! tensor op of the graph engine is lowered onto a handful of these.

use crate::values::Value;

/// Represents the function in the computation graph
#[derive(Debug, Clone, Copy)]
pub enum BackpropFunc {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Pow,
    ReLU,
    Exp,
    Ln,
    Tanh,
    Sigmoid,
}

impl BackpropFunc {
    pub fn n_operands(&self) -> usize {
        match self {
            BackpropFunc::Add
            | BackpropFunc::Sub
            | BackpropFunc::Mul
            | BackpropFunc::Div
            | BackpropFunc::Pow => 2,
            BackpropFunc::Neg
            | BackpropFunc::ReLU
            | BackpropFunc::Exp
            | BackpropFunc::Ln
            | BackpropFunc::Tanh
            | BackpropFunc::Sigmoid => 1,
        }
    }
}

fn accumulate(value: &Value, delta: f32) {
    value.0.borrow_mut().grad += delta;
}

/// Represents backprop for the operation `in1 + in2 = out`
pub fn add(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    accumulate(in1, grad);
    accumulate(in2, grad);
}

/// Represents backprop for the operation `in1 - in2 = out`
pub fn sub(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    accumulate(in1, grad);
    accumulate(in2, -grad);
}

/// Represents backprop for the operation `in1 * in2 = out`
pub fn mul(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    // read both operands first, `in1` and `in2` may be the same value
    let (a, b) = (in1.data(), in2.data());
    accumulate(in1, b * grad);
    accumulate(in2, a * grad);
}

/// Represents backprop for the operation `in1 / in2 = out`
pub fn div(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    let (a, b) = (in1.data(), in2.data());
    accumulate(in1, grad / b);
    accumulate(in2, -a * grad / b.powi(2));
}

/// Represents backprop for the operation `-in = out`
pub fn neg(in1: &Value, out: &Value) {
    accumulate(in1, -out.grad());
}

/// Represents backprop for the operation `in1^in2 = out`
/// The exponent is treated as a constant, da^b/db is only defined for positive a
pub fn pow(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    let (a, b) = (in1.data(), in2.data());
    accumulate(in1, b * a.powf(b - 1.0) * grad);
}

/// Represents backprop for the operation `relu(in) = out`
pub fn relu(in1: &Value, out: &Value) {
    let grad = if in1.data() > 0.0 { out.grad() } else { 0.0 };
    accumulate(in1, grad);
}

/// Represents backprop for the operation `exp(in) = out`
pub fn exp(in1: &Value, out: &Value) {
    accumulate(in1, out.data() * out.grad());
}

/// Represents backprop for the operation `ln(in) = out`
pub fn ln(in1: &Value, out: &Value) {
    let grad = out.grad() / in1.data();
    accumulate(in1, grad);
}

/// Represents backprop for the operation `tanh(in) = out`
pub fn tanh(in1: &Value, out: &Value) {
    let t = out.data();
    accumulate(in1, (1.0 - t * t) * out.grad());
}

/// Represents backprop for the operation `sigmoid(in) = out`
pub fn sigmoid(in1: &Value, out: &Value) {
    let s = out.data();
    accumulate(in1, s * (1.0 - s) * out.grad());
}

/// Applies a backprop function for operators with two operands
pub fn update_gradients_two_operands(in1: &Value, in2: &Value, out: &Value) {
    let backprop_fn = { out.0.borrow().backprop_fn };
    match backprop_fn {
        Some(BackpropFunc::Add) => add(in1, in2, out),
        Some(BackpropFunc::Sub) => sub(in1, in2, out),
        Some(BackpropFunc::Mul) => mul(in1, in2, out),
        Some(BackpropFunc::Div) => div(in1, in2, out),
        Some(BackpropFunc::Pow) => pow(in1, in2, out),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}

/// Applies a backprop function for operators with one operand
pub fn update_gradients_one_operand(in1: &Value, out: &Value) {
    let backprop_fn = { out.0.borrow().backprop_fn };
    match backprop_fn {
        Some(BackpropFunc::Neg) => neg(in1, out),
        Some(BackpropFunc::ReLU) => relu(in1, out),
        Some(BackpropFunc::Exp) => exp(in1, out),
        Some(BackpropFunc::Ln) => ln(in1, out),
        Some(BackpropFunc::Tanh) => tanh(in1, out),
        Some(BackpropFunc::Sigmoid) => sigmoid(in1, out),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}
