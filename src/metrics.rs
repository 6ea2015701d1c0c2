//! Scoring helpers over rows of targets

/// Fraction of rows of `y_pred` equal to the matching row of `y_true`
pub fn accuracy_score(y_true: &[Vec<f32>], y_pred: &[Vec<f32>]) -> f32 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| t == p)
        .count();
    correct as f32 / y_true.len() as f32
}

/// Fraction of elements of `y_pred` equal to the matching element of `y_true`
pub fn token_accuracy(y_true: &[Vec<f32>], y_pred: &[Vec<f32>]) -> f32 {
    let (correct, total) = y_true
        .iter()
        .zip(y_pred)
        .flat_map(|(t, p)| t.iter().zip(p))
        .fold((0usize, 0usize), |(correct, total), (t, p)| {
            (correct + usize::from(t == p), total + 1)
        });
    if total == 0 { 0.0 } else { correct as f32 / total as f32 }
}

/// Mean of the squared differences over every element
pub fn mean_squared_error(y_true: &[Vec<f32>], y_pred: &[Vec<f32>]) -> f32 {
    let (sum, n) = y_true
        .iter()
        .zip(y_pred)
        .flat_map(|(t, p)| t.iter().zip(p))
        .fold((0.0, 0usize), |(sum, n), (t, p)| (sum + (t - p).powi(2), n + 1));
    if n == 0 { 0.0 } else { sum / n as f32 }
}

/// Index of the largest entry, the first one on ties
pub fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// [`argmax`] of each of the first `steps` chunks of `width` values in `row`
pub fn argmax_steps(row: &[f32], width: usize, steps: usize) -> Vec<f32> {
    row.chunks(width.max(1))
        .take(steps)
        .map(|chunk| argmax(chunk) as f32)
        .collect()
}
