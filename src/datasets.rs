//! Generates toy classification and sequence datasets and utilities for plotting
//! them, decision boundaries and loss curves
//!
//! Labels are class ids, one per row. Classes 0 and 1 are plotted in red and blue.

use std::{
    error::Error,
    f32::consts::PI,
    fmt::{self, Display},
};

use clap::ValueEnum;
use plotters::{
    chart::ChartBuilder,
    prelude::{BitMapBackend, Circle, IntoDrawingArea, PathElement, Rectangle},
    series::LineSeries,
    style::{BLACK, BLUE, Color, GREEN, MAGENTA, RED, RGBColor, WHITE},
};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::estimator::Estimator;

/// Toggles between dataset types
#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Line,
    Circle,
    Xor,
    Moon,
    Blobs,
}

impl Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Line => write!(f, "line"),
            Dataset::Circle => write!(f, "circle"),
            Dataset::Xor => write!(f, "xor"),
            Dataset::Moon => write!(f, "moon"),
            Dataset::Blobs => write!(f, "blobs"),
        }
    }
}

type Labeled = (Vec<Vec<f32>>, Vec<Vec<f32>>);

/// Loads a two feature dataset, `class_size` examples per class
pub fn load_dataset<R: Rng>(dataset: Dataset, class_size: usize, rng: &mut R) -> Labeled {
    match dataset {
        Dataset::Line => gen_linear_data(class_size, rng),
        Dataset::Circle => gen_circle_data(class_size, rng),
        Dataset::Xor => gen_xor_data(class_size, rng),
        Dataset::Moon => gen_moon_data(class_size, rng),
        Dataset::Blobs => gen_blobs(3, 2, class_size, rng),
    }
}

/// Generates a simple linearly separable dataset split by the line `x = y`
pub fn gen_linear_data<R: Rng>(class_size: usize, rng: &mut R) -> Labeled {
    (0..2 * class_size)
        .map(|_| {
            let x: f32 = rng.random_range(-5.0..5.0);
            let y: f32 = rng.random_range(-5.0..5.0);
            let class = if x > y { 0.0 } else { 1.0 };
            (vec![x, y], vec![class])
        })
        .unzip()
}

fn ring<R: Rng>(radius: f32, class: f32, n: usize, rng: &mut R) -> Labeled {
    (0..n)
        .map(|_| {
            let angle = rng.random_range(0.0..2.0 * PI);
            let r = radius + radius * rng.random_range(-0.25..0.25);
            (vec![r * angle.cos(), r * angle.sin()], vec![class])
        })
        .unzip()
}

/// Generates two concentric circles
pub fn gen_circle_data<R: Rng>(class_size: usize, rng: &mut R) -> Labeled {
    let (mut data, mut labels) = ring(3.0, 0.0, class_size, rng);
    let (outer_data, outer_labels) = ring(5.0, 1.0, class_size, rng);
    data.extend(outer_data);
    labels.extend(outer_labels);
    (data, labels)
}

/// Points in the first and third quadrants are class 0, the rest class 1
pub fn gen_xor_data<R: Rng>(class_size: usize, rng: &mut R) -> Labeled {
    (0..2 * class_size)
        .map(|_| {
            let x: f32 = rng.random_range(-5.0..5.0);
            let y: f32 = rng.random_range(-5.0..5.0);
            let class = if x * y > 0.0 { 0.0 } else { 1.0 };
            (vec![x, y], vec![class])
        })
        .unzip()
}

/// Generates a moons dataset (two interleaving partial circles)
pub fn gen_moon_data<R: Rng>(class_size: usize, rng: &mut R) -> Labeled {
    let radius = 3.0;
    let mut data = Vec::with_capacity(2 * class_size);
    let mut labels = Vec::with_capacity(2 * class_size);
    for class in 0..2 {
        for _ in 0..class_size {
            let theta: f32 = rng.random_range(-PI / 4.0..PI * 5.0 / 4.0);
            let (x, y) = if class == 0 {
                (radius * theta.cos(), radius * theta.sin())
            } else {
                (radius * theta.cos() + 2.0, -radius * theta.sin() - 0.2)
            };
            let noise_x: f32 = rng.random_range(-0.1..0.1);
            let noise_y: f32 = rng.random_range(-0.1..0.1);
            data.push(vec![x + noise_x, y + noise_y]);
            labels.push(vec![class as f32]);
        }
    }
    (data, labels)
}

/// Gaussian blobs of unit variance around `n_classes` centers spread on a circle
/// in the first two features, the other features centered on 0
pub fn gen_blobs<R: Rng>(n_classes: usize, n_features: usize, class_size: usize, rng: &mut R) -> Labeled {
    let radius = 3.0 * n_classes.max(2) as f32;
    let mut data = Vec::with_capacity(n_classes * class_size);
    let mut labels = Vec::with_capacity(n_classes * class_size);
    for class in 0..n_classes {
        let angle = 2.0 * PI * class as f32 / n_classes as f32;
        let mut center = vec![0.0; n_features];
        match n_features {
            0 => {}
            1 => center[0] = radius * class as f32,
            _ => {
                center[0] = radius * angle.cos();
                center[1] = radius * angle.sin();
            }
        }
        for _ in 0..class_size {
            data.push(center.iter().map(|c| c + rng.sample::<f32, _>(StandardNormal)).collect());
            labels.push(vec![class as f32]);
        }
    }
    (data, labels)
}

/// Random sequences of one hot tokens as inputs and the same sequences reversed
/// as targets, each row flattened to `length * vocab` values
pub fn gen_sequence_reversal<R: Rng>(n_examples: usize, length: usize, vocab: usize, rng: &mut R) -> Labeled {
    let one_hot = |tokens: &[usize]| -> Vec<f32> {
        let mut row = vec![0.0; tokens.len() * vocab];
        for (step, token) in tokens.iter().enumerate() {
            row[step * vocab + token] = 1.0;
        }
        row
    };
    (0..n_examples)
        .map(|_| {
            let tokens: Vec<usize> = (0..length).map(|_| rng.random_range(0..vocab)).collect();
            let reversed: Vec<usize> = tokens.iter().rev().copied().collect();
            (one_hot(&tokens), one_hot(&reversed))
        })
        .unzip()
}

const CLASS_COLORS: [RGBColor; 4] = [RED, BLUE, GREEN, MAGENTA];
const BACKGROUND_COLORS: [RGBColor; 4] = [
    RGBColor(255, 200, 200),
    RGBColor(200, 200, 255),
    RGBColor(200, 255, 200),
    RGBColor(255, 200, 255),
];

fn class_of(label: &[f32]) -> usize {
    label.first().map_or(0, |c| *c as usize)
}

/// Plots the data points and labels for a given dataset
pub fn plot_data(
    data: &[Vec<f32>],
    labels: &[Vec<f32>],
    file_name: &str,
    dataset: Dataset,
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(format!("Dataset: {}", dataset), ("sans-serif", 50))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(-10.0f32..10.0f32, -10.0f32..10.0f32)?;

    chart.configure_mesh().draw()?;

    chart.draw_series(data.iter().zip(labels).map(|(point, label)| {
        let color = CLASS_COLORS[class_of(label) % CLASS_COLORS.len()];
        Circle::new((point[0], point[1]), 3, color.filled())
    }))?;

    root_area.present()?;
    log::info!("Data plot has been saved to '{}'.", file_name);

    Ok(())
}

/// Points of a square grid covering `[min, max)` in steps of `step`
fn decision_grid(min: f32, max: f32, step: f32) -> Vec<Vec<f32>> {
    let n_steps = ((max - min) / step).round() as i32;
    (0..n_steps)
        .flat_map(|xi| {
            let x = min + (xi as f32 * step);
            (0..n_steps).map(move |yi| vec![x, min + (yi as f32 * step)])
        })
        .collect()
}

/// Plots the decision boundary of a fitted two feature classifier by predicting
/// a grid of points
pub fn plot_decision_boundary(
    estimator: &Estimator,
    file_name: &str,
    dataset: Dataset,
    data: &[Vec<f32>],
    labels: &[Vec<f32>],
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let grid_min: f32 = -10.0;
    let grid_max: f32 = 10.0;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(
            format!("Decision Boundary for {}", dataset),
            ("sans-serif", 50),
        )
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(grid_min..grid_max, grid_min..grid_max)?;

    chart.configure_mesh().draw()?;

    let step: f32 = 0.25;
    let grid_points = decision_grid(grid_min, grid_max, step);
    // one batch for the whole grid
    let classes = estimator.predict(&grid_points)?;

    chart.draw_series(grid_points.iter().zip(&classes).map(|(point, class)| {
        let (x, y) = (point[0], point[1]);
        let color = BACKGROUND_COLORS[class_of(class) % BACKGROUND_COLORS.len()];
        Rectangle::new(
            [
                (x - step / 2.0, y - step / 2.0),
                (x + step / 2.0, y + step / 2.0),
            ],
            color.filled(),
        )
    }))?;

    // plot the data points
    chart.draw_series(data.iter().zip(labels).map(|(point, label)| {
        let color = CLASS_COLORS[class_of(label) % CLASS_COLORS.len()];
        Circle::new((point[0], point[1]), 3, color.filled())
    }))?;

    root_area.present()?;
    log::info!("Decision boundary plot saved to '{}'.", file_name);
    Ok(())
}

/// Plots `(step, loss)` pairs as a line
pub fn plot_loss_curve(history: &[(usize, f32)], file_name: &str, title: &str) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let max_step = history.iter().map(|(s, _)| *s).max().unwrap_or(1).max(1);
    let max_loss = history
        .iter()
        .map(|(_, l)| *l)
        .filter(|l| l.is_finite())
        .fold(0.0f32, f32::max)
        .max(1e-3);

    let mut chart = ChartBuilder::on(&root_area)
        .caption(title, ("sans-serif", 40))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0..max_step, 0.0f32..max_loss * 1.05)?;

    chart
        .configure_mesh()
        .x_desc("step")
        .y_desc("loss")
        .draw()?;

    chart
        .draw_series(LineSeries::new(history.iter().copied(), &BLUE))?
        .label("training loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root_area.present()?;
    log::info!("Loss curve saved to '{}'.", file_name);
    Ok(())
}
