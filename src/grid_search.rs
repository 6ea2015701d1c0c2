//! Exhaustive hyper-parameter search with k-fold cross validation

use rand::{SeedableRng, seq::SliceRandom};
use rand_pcg::Pcg64Mcg;

use crate::estimator::{Estimator, EstimatorError, Param};

/// Cross validated score of one parameter combination
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResult {
    pub params: Vec<Param>,
    pub fold_scores: Vec<f32>,
    pub mean_score: f32,
}

/// Tries every combination of the `grid` axes on copies of `template`, keeps the
/// one with the best mean [`Estimator::score`] and refits it on all the data
pub struct GridSearch {
    template: Estimator,
    grid: Vec<Vec<Param>>,
    folds: usize,
    results: Vec<CandidateResult>,
    best: Option<(usize, Estimator)>,
}

/// Every way of picking one value per axis, the last axis varying fastest
fn cartesian_product(axes: &[Vec<Param>]) -> Vec<Vec<Param>> {
    axes.iter().fold(vec![vec![]], |combinations, axis| {
        combinations
            .iter()
            .flat_map(|prefix| {
                axis.iter().map(move |param| {
                    let mut combination = prefix.clone();
                    combination.push(param.clone());
                    combination
                })
            })
            .collect()
    })
}

fn select(rows: &[Vec<f32>], indices: &[usize]) -> Vec<Vec<f32>> {
    indices.iter().map(|&i| rows[i].clone()).collect()
}

/// Splits `indices` into `folds` contiguous parts whose sizes differ by at most
/// one, the larger parts first
fn partition(indices: &[usize], folds: usize) -> Vec<&[usize]> {
    let (size, larger) = (indices.len() / folds, indices.len() % folds);
    let mut parts = Vec::with_capacity(folds);
    let mut rest = indices;
    for k in 0..folds {
        let (part, tail) = rest.split_at(size + usize::from(k < larger));
        parts.push(part);
        rest = tail;
    }
    parts
}

impl GridSearch {
    pub const DEFAULT_FOLDS: usize = 3;

    pub fn new(template: Estimator, grid: Vec<Vec<Param>>) -> Self {
        Self {
            template,
            grid,
            folds: Self::DEFAULT_FOLDS,
            results: vec![],
            best: None,
        }
    }

    pub fn with_folds(mut self, folds: usize) -> Self {
        self.folds = folds;
        self
    }

    fn candidate(&self, params: &[Param]) -> Result<Estimator, EstimatorError> {
        let mut estimator = self.template.clone_unfitted();
        for param in params {
            estimator.set_param(param.clone())?;
        }
        Ok(estimator)
    }

    pub fn fit(&mut self, x: &[Vec<f32>], y: &[Vec<f32>]) -> Result<&mut Self, EstimatorError> {
        if self.folds < 2 {
            return Err(EstimatorError::InvalidParam("grid search needs at least 2 folds".into()));
        }
        if x.len() < self.folds || x.len() != y.len() {
            return Err(EstimatorError::InvalidParam(format!(
                "{} examples with {} labels cannot be split into {} folds",
                x.len(),
                y.len(),
                self.folds
            )));
        }
        let mut indices: Vec<usize> = (0..x.len()).collect();
        let mut rng = Pcg64Mcg::seed_from_u64(self.template.config().random_seed);
        indices.shuffle(&mut rng);
        let folds = partition(&indices, self.folds);

        self.results.clear();
        self.best = None;
        for params in cartesian_product(&self.grid) {
            let mut fold_scores = Vec::with_capacity(folds.len());
            for (k, held_out) in folds.iter().enumerate() {
                let train: Vec<usize> = folds
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != k)
                    .flat_map(|(_, fold)| fold.iter().copied())
                    .collect();
                let mut estimator = self.candidate(&params)?;
                estimator.fit(&select(x, &train), &select(y, &train))?;
                fold_scores.push(estimator.score(&select(x, held_out), &select(y, held_out))?);
            }
            let mean_score = fold_scores.iter().sum::<f32>() / fold_scores.len() as f32;
            log::info!("{:?}: mean score {:.4}", params, mean_score);
            self.results.push(CandidateResult {
                params,
                fold_scores,
                mean_score,
            });
        }

        let best_index = self
            .results
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.mean_score.total_cmp(&b.1.mean_score))
            .map(|(i, _)| i)
            .ok_or_else(|| EstimatorError::InvalidParam("empty parameter grid".into()))?;
        let mut best = self.candidate(&self.results[best_index].params)?;
        best.fit(x, y)?;
        self.best = Some((best_index, best));
        Ok(self)
    }

    pub fn results(&self) -> &[CandidateResult] {
        &self.results
    }

    pub fn best_params(&self) -> Option<&[Param]> {
        self.best
            .as_ref()
            .map(|(i, _)| self.results[*i].params.as_slice())
    }

    pub fn best_score(&self) -> Option<f32> {
        self.best.as_ref().map(|(i, _)| self.results[*i].mean_score)
    }

    /// The best candidate, refitted on all the data
    pub fn best_estimator(&self) -> Option<&Estimator> {
        self.best.as_ref().map(|(_, estimator)| estimator)
    }

    pub fn predict(&self, x: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, EstimatorError> {
        self.best_estimator()
            .ok_or(EstimatorError::NotFitted)?
            .predict(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{datasets, estimator::EstimatorConfig, optim::LearningRate};

    #[test]
    fn test_cartesian_product() {
        let grid = vec![
            vec![Param::Steps(1), Param::Steps(2)],
            vec![Param::BatchSize(4), Param::BatchSize(8), Param::BatchSize(16)],
        ];
        let combinations = cartesian_product(&grid);
        assert_eq!(combinations.len(), 6);
        assert_eq!(combinations[1], vec![Param::Steps(1), Param::BatchSize(8)]);
        assert_eq!(cartesian_product(&[]), vec![Vec::<Param>::new()]);
    }

    #[test]
    fn test_partition_keeps_every_fold() {
        let sizes = |n: usize, folds: usize| {
            let indices: Vec<usize> = (0..n).collect();
            partition(&indices, folds).iter().map(|p| p.len()).collect::<Vec<_>>()
        };
        assert_eq!(sizes(4, 3), vec![2, 1, 1]);
        assert_eq!(sizes(5, 4), vec![2, 1, 1, 1]);
        assert_eq!(sizes(6, 3), vec![2, 2, 2]);
        assert_eq!(sizes(3, 3), vec![1, 1, 1]);

        let indices: Vec<usize> = vec![7, 3, 5, 1, 0];
        let parts = partition(&indices, 2);
        assert_eq!(parts, vec![&indices[..3], &indices[3..]]);
    }

    #[test]
    fn test_grid_search_prefers_training() {
        let mut rng = Pcg64Mcg::seed_from_u64(21);
        let (x, y) = datasets::gen_blobs(2, 2, 15, &mut rng);
        let template = Estimator::linear_classifier(2, EstimatorConfig::default());
        // a zero learning rate leaves the initial weights untouched
        let grid = vec![vec![
            Param::LearningRate(LearningRate::Constant(0.0)),
            Param::LearningRate(LearningRate::Constant(0.1)),
        ]];
        let mut search = GridSearch::new(template, grid);
        search.fit(&x, &y).unwrap();

        assert_eq!(search.results().len(), 2);
        assert!(search.results().iter().all(|r| r.fold_scores.len() == 3));
        assert!(search.best_score().unwrap() > 0.9);
        assert_eq!(search.predict(&x).unwrap().len(), x.len());
    }

    #[test]
    fn test_grid_search_errors() {
        let template = Estimator::linear_regressor(EstimatorConfig::default());
        let mut search = GridSearch::new(template, vec![vec![Param::Steps(1)]]);
        assert!(matches!(search.predict(&[vec![1.0]]), Err(EstimatorError::NotFitted)));
        let x = vec![vec![1.0], vec![2.0]];
        assert!(search.fit(&x, &x).is_err());

        let template = Estimator::linear_regressor(EstimatorConfig::default());
        let mut search = GridSearch::new(template, vec![vec![Param::HiddenUnits(vec![3])]]).with_folds(2);
        let x = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        assert!(matches!(search.fit(&x, &x), Err(EstimatorError::InvalidParam(_))));
    }
}
