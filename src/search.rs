//! Randomized, cross-validated hyperparameter search over an external estimator.

use crate::error::SearchError;
use crate::estimator::{
    Estimator, EstimatorFactory, EstimatorFamily, EstimatorKind, EstimatorRequest,
};
use crate::metrics::{accuracy_score, r2_score};
use crate::models::{format_params, ParamSet, ParamValue};
use crate::partition::{select_rows, select_values};
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use statrs::distribution::Exp;
use std::collections::BTreeMap;

pub const DEFAULT_SEARCH_ITERATIONS: usize = 10;
pub const DEFAULT_SEARCH_FOLDS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamDistribution {
    /// Uniform pick from a fixed list
    Choice(Vec<ParamValue>),
    /// Uniform integer in `[low, high)`
    IntRange { low: i64, high: i64 },
    Exponential { scale: f64 },
}

impl ParamDistribution {
    pub fn choice<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        Self::Choice(values.into_iter().map(Into::into).collect())
    }

    fn validate(&self, name: &str) -> Result<(), SearchError> {
        let reason = match self {
            Self::Choice(values) if values.is_empty() => Some("empty choice list".to_string()),
            Self::IntRange { low, high } if low >= high => {
                Some(format!("empty integer range [{}, {})", low, high))
            }
            Self::Exponential { scale } if !scale.is_finite() || *scale <= 0.0 => {
                Some(format!("exponential scale must be > 0 (value: {})", scale))
            }
            _ => None,
        };
        match reason {
            Some(reason) => Err(SearchError::InvalidDistribution {
                name: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, name: &str, rng: &mut R) -> Result<ParamValue, SearchError> {
        self.validate(name)?;
        let value = match self {
            Self::Choice(values) => values[rng.gen_range(0..values.len())].clone(),
            Self::IntRange { low, high } => ParamValue::Int(rng.gen_range(*low..*high)),
            Self::Exponential { scale } => {
                let exp = Exp::new(1.0 / scale).map_err(|err| SearchError::InvalidDistribution {
                    name: name.to_string(),
                    reason: err.to_string(),
                })?;
                ParamValue::Float(exp.sample(rng))
            }
        };
        Ok(value)
    }
}

/// Named distributions sampled in name order, so a seed fully determines the candidates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSpace {
    entries: BTreeMap<String, ParamDistribution>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, distribution: ParamDistribution) -> Self {
        self.entries.insert(name.to_string(), distribution);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamDistribution> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        self.entries
            .iter()
            .try_for_each(|(name, distribution)| distribution.validate(name))
    }

    /// Number of distinct candidates the space can produce; `None` once a continuous
    /// distribution is involved.
    pub fn grid_size(&self) -> Option<usize> {
        self.entries.values().try_fold(1_usize, |size, distribution| {
            let count = match distribution {
                ParamDistribution::Choice(values) => values
                    .iter()
                    .enumerate()
                    .filter(|(i, value)| !values[..*i].contains(value))
                    .count(),
                ParamDistribution::IntRange { low, high } => high.saturating_sub(*low).max(0) as usize,
                ParamDistribution::Exponential { .. } => return None,
            };
            Some(size.saturating_mul(count))
        })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ParamSet, SearchError> {
        self.entries
            .iter()
            .map(|(name, distribution)| Ok((name.clone(), distribution.sample(name, rng)?)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

fn chunk_sizes(n: usize, k: usize) -> Vec<usize> {
    (0..k).map(|i| n / k + usize::from(i < n % k)).collect()
}

fn complement(n: usize, test: &[usize]) -> Vec<usize> {
    let mut in_test = vec![false; n];
    for &idx in test {
        in_test[idx] = true;
    }
    (0..n).filter(|idx| !in_test[*idx]).collect()
}

/// Contiguous, unshuffled k-fold splits; the first `n % k` folds get one extra row.
pub fn k_fold(n: usize, k: usize) -> Result<Vec<Fold>, SearchError> {
    if k < 2 || n < k {
        return Err(SearchError::TooFewSamples {
            folds: k,
            samples: n,
        });
    }

    let mut start = 0;
    let mut folds = Vec::with_capacity(k);
    for size in chunk_sizes(n, k) {
        let test: Vec<usize> = (start..start + size).collect();
        start += size;
        folds.push(Fold {
            train: complement(n, &test),
            test,
        });
    }
    Ok(folds)
}

/// k-fold splits that keep each label's share roughly constant across folds.
///
/// Rows of each label are cut into `k` contiguous chunks in their original order and
/// fold `i` tests on chunk `i` of every label.
pub fn stratified_k_fold(labels: &[f64], k: usize) -> Result<Vec<Fold>, SearchError> {
    let n = labels.len();
    if k < 2 || n < k {
        return Err(SearchError::TooFewSamples {
            folds: k,
            samples: n,
        });
    }

    let mut classes: Vec<(f64, Vec<usize>)> = Vec::new();
    for (idx, label) in labels.iter().enumerate() {
        match classes.iter_mut().find(|(value, _)| value == label) {
            Some((_, members)) => members.push(idx),
            None => classes.push((*label, vec![idx])),
        }
    }

    let mut tests: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (_, members) in &classes {
        let mut start = 0;
        for (fold, size) in chunk_sizes(members.len(), k).into_iter().enumerate() {
            tests[fold].extend_from_slice(&members[start..start + size]);
            start += size;
        }
    }

    let folds: Vec<Fold> = tests
        .into_iter()
        .filter(|test| !test.is_empty())
        .map(|mut test| {
            test.sort_unstable();
            Fold {
                train: complement(n, &test),
                test,
            }
        })
        .collect();

    if folds.len() < 2 {
        return Err(SearchError::TooFewSamples {
            folds: k,
            samples: n,
        });
    }
    Ok(folds)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub params: ParamSet,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
}

/// The search as it ran: its configuration, every candidate score and the winner.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    pub family: EstimatorFamily,
    pub kind: EstimatorKind,
    pub space: ParameterSpace,
    pub n_iter: usize,
    pub folds: usize,
    pub seed: u64,
    pub candidates: Vec<CandidateScore>,
    pub best_index: usize,
}

impl SearchReport {
    pub fn best_params(&self) -> &ParamSet {
        &self.candidates[self.best_index].params
    }

    pub fn best_score(&self) -> f64 {
        self.candidates[self.best_index].mean_score
    }
}

pub struct SearchOutcome {
    /// Best candidate refit on every row handed to the search
    pub estimator: Box<dyn Estimator>,
    pub report: SearchReport,
}

#[derive(Debug, Clone)]
pub struct RandomizedSearch {
    pub space: ParameterSpace,
    pub n_iter: usize,
    pub folds: usize,
    pub seed: u64,
    pub threads: usize,
}

impl RandomizedSearch {
    pub fn new(space: ParameterSpace) -> Self {
        Self {
            space,
            n_iter: DEFAULT_SEARCH_ITERATIONS,
            folds: DEFAULT_SEARCH_FOLDS,
            seed: 0,
            threads: num_cpus::get(),
        }
    }

    pub fn with_iterations(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn with_folds(mut self, folds: usize) -> Self {
        self.folds = folds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Draws `n_iter` candidates. A space made only of lists and integer ranges is a
    /// finite grid and is sampled without replacement, capped at the grid size.
    pub fn sample_candidates(&self) -> Result<Vec<ParamSet>, SearchError> {
        self.space.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let Some(grid_size) = self.space.grid_size() else {
            return (0..self.n_iter)
                .map(|_| self.space.sample(&mut rng))
                .collect();
        };

        if self.n_iter > grid_size {
            warn!(
                "Search grid has only {} combinations; sampling all of them instead of {}",
                grid_size, self.n_iter
            );
        }
        let wanted = self.n_iter.min(grid_size);
        let mut candidates: Vec<ParamSet> = Vec::with_capacity(wanted);
        while candidates.len() < wanted {
            let params = self.space.sample(&mut rng)?;
            if !candidates.contains(&params) {
                candidates.push(params);
            }
        }
        Ok(candidates)
    }

    /// Cross-validates every sampled candidate on `inputs`/`targets`, then refits the
    /// best one on all of them.
    pub fn fit(
        &self,
        factory: &dyn EstimatorFactory,
        family: EstimatorFamily,
        kind: EstimatorKind,
        base_params: &ParamSet,
        inputs: &[Vec<f64>],
        targets: &[f64],
    ) -> Result<SearchOutcome> {
        if inputs.len() != targets.len() {
            return Err(anyhow!(
                "Search inputs have {} rows but targets have {}",
                inputs.len(),
                targets.len()
            ));
        }

        let folds = match kind {
            EstimatorKind::Regressor => k_fold(inputs.len(), self.folds)?,
            EstimatorKind::Classifier => stratified_k_fold(targets, self.folds)?,
        };
        let candidates = self.sample_candidates()?;

        info!(
            "Randomized search for {} {}: {} candidates x {} folds on {} rows ({} threads, seed {})",
            family.label(),
            kind.label(),
            candidates.len(),
            folds.len(),
            inputs.len(),
            self.threads,
            self.seed
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .context("Failed to build search thread pool")?;

        let scored: Vec<CandidateScore> = pool.install(|| {
            candidates
                .par_iter()
                .map(|params| {
                    let request = EstimatorRequest::new(family, kind)
                        .with_params(base_params)
                        .with_params(params);
                    match cross_validate(factory, &request, inputs, targets, &folds) {
                        Ok(fold_scores) => {
                            let mean_score =
                                fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
                            CandidateScore {
                                params: params.clone(),
                                fold_scores,
                                mean_score,
                            }
                        }
                        Err(err) => {
                            warn!(
                                "Candidate [{}] failed during cross-validation: {:#}",
                                format_params(params),
                                err
                            );
                            CandidateScore {
                                params: params.clone(),
                                fold_scores: Vec::new(),
                                mean_score: f64::NAN,
                            }
                        }
                    }
                })
                .collect()
        });

        let best_index = best_candidate_index(&scored).ok_or(SearchError::NoValidCandidate {
            candidates: scored.len(),
        })?;
        let best = &scored[best_index];
        info!(
            "Best {} candidate: mean CV score {:.6} with [{}]",
            family.label(),
            best.mean_score,
            format_params(&best.params)
        );

        let request = EstimatorRequest::new(family, kind)
            .with_params(base_params)
            .with_params(&best.params);
        let mut estimator = factory.create(&request)?;
        estimator
            .fit(inputs, targets)
            .with_context(|| format!("Refitting best {} candidate failed", family.label()))?;

        Ok(SearchOutcome {
            estimator,
            report: SearchReport {
                family,
                kind,
                space: self.space.clone(),
                n_iter: self.n_iter,
                folds: self.folds,
                seed: self.seed,
                candidates: scored,
                best_index,
            },
        })
    }
}

fn cross_validate(
    factory: &dyn EstimatorFactory,
    request: &EstimatorRequest,
    inputs: &[Vec<f64>],
    targets: &[f64],
    folds: &[Fold],
) -> Result<Vec<f64>> {
    folds
        .iter()
        .map(|fold| {
            let mut estimator = factory.create(request)?;
            estimator.fit(
                &select_rows(inputs, &fold.train),
                &select_values(targets, &fold.train),
            )?;
            let actual = select_values(targets, &fold.test);
            let predicted = estimator.predict(&select_rows(inputs, &fold.test))?;
            if predicted.len() != actual.len() {
                return Err(anyhow!(
                    "Estimator returned {} predictions for {} rows",
                    predicted.len(),
                    actual.len()
                ));
            }
            Ok(match request.kind {
                EstimatorKind::Regressor => r2_score(&actual, &predicted),
                EstimatorKind::Classifier => accuracy_score(&actual, &predicted),
            })
        })
        .collect()
}

/// Highest finite mean score; ties go to the earliest candidate.
fn best_candidate_index(scored: &[CandidateScore]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, candidate) in scored.iter().enumerate() {
        if !candidate.mean_score.is_finite() {
            continue;
        }
        match best {
            Some(current) if scored[current].mean_score >= candidate.mean_score => {}
            _ => best = Some(idx),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Predicts the training mean shifted by its `bias` parameter.
    struct BiasedMean {
        bias: f64,
        mean: f64,
        fail: bool,
    }

    impl Estimator for BiasedMean {
        fn fit(&mut self, _inputs: &[Vec<f64>], targets: &[f64]) -> Result<()> {
            if self.fail {
                return Err(anyhow!("does not converge"));
            }
            self.mean = targets.iter().sum::<f64>() / targets.len() as f64;
            Ok(())
        }

        fn predict(&self, inputs: &[Vec<f64>]) -> Result<Vec<f64>> {
            Ok(vec![self.mean + self.bias; inputs.len()])
        }
    }

    #[derive(Default)]
    struct BiasedMeanFactory {
        created: Arc<AtomicUsize>,
        fail_all: bool,
    }

    impl EstimatorFactory for BiasedMeanFactory {
        fn create(&self, request: &EstimatorRequest) -> Result<Box<dyn Estimator>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let bias = request
                .param("bias")
                .and_then(ParamValue::as_f64)
                .unwrap_or(0.0);
            Ok(Box::new(BiasedMean {
                bias,
                mean: 0.0,
                fail: self.fail_all,
            }))
        }
    }

    fn sample_rows(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let inputs = (0..n).map(|i| vec![i as f64]).collect();
        let targets = (0..n).map(|i| (i % 7) as f64).collect();
        (inputs, targets)
    }

    #[test]
    fn k_fold_matches_contiguous_layout() {
        let folds = k_fold(12, 5).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2, 2]);
        assert_eq!(folds[0].test, vec![0, 1, 2]);
        assert_eq!(folds[1].train[..3], [0, 1, 2]);
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), 12);
        }
        assert!(matches!(
            k_fold(3, 5),
            Err(SearchError::TooFewSamples { folds: 5, samples: 3 })
        ));
    }

    #[test]
    fn stratified_folds_spread_each_label() {
        let labels: Vec<f64> = (0..20).map(|i| if i < 10 { 0.0 } else { 1.0 }).collect();
        let folds = stratified_k_fold(&labels, 5).unwrap();
        assert_eq!(folds.len(), 5);
        for fold in &folds {
            let ones = fold.test.iter().filter(|&&i| labels[i] == 1.0).count();
            assert_eq!(ones, 2);
            assert_eq!(fold.test.len(), 4);
        }
    }

    #[test]
    fn sampling_is_reproducible_and_within_bounds() {
        let space = ParameterSpace::new()
            .with("n_estimators", ParamDistribution::IntRange { low: 2, high: 1000 })
            .with(
                "max_depth",
                ParamDistribution::Choice(vec![
                    ParamValue::Int(1),
                    ParamValue::Int(2),
                    ParamValue::Int(3),
                    ParamValue::Unbounded,
                ]),
            )
            .with("C", ParamDistribution::Exponential { scale: 0.01 });
        let search = RandomizedSearch::new(space).with_seed(17).with_iterations(50);
        let first = search.sample_candidates().unwrap();
        assert_eq!(first, search.sample_candidates().unwrap());
        for params in &first {
            let n = params["n_estimators"].as_i64().unwrap();
            assert!((2..1000).contains(&n));
            assert!(params["C"].as_f64().unwrap() >= 0.0);
        }
    }

    #[test]
    fn finite_grid_is_sampled_without_replacement() {
        let space = ParameterSpace::new()
            .with("n_estimators", ParamDistribution::IntRange { low: 2, high: 1000 })
            .with(
                "max_depth",
                ParamDistribution::Choice(vec![
                    ParamValue::Int(1),
                    ParamValue::Int(2),
                    ParamValue::Int(3),
                    ParamValue::Unbounded,
                ]),
            );
        assert_eq!(space.grid_size(), Some(998 * 4));
        for seed in 0..1000 {
            let candidates = RandomizedSearch::new(space.clone())
                .with_seed(seed)
                .sample_candidates()
                .unwrap();
            assert_eq!(candidates.len(), 10);
            for (i, params) in candidates.iter().enumerate() {
                assert!(!candidates[..i].contains(params), "seed {} repeats {:?}", seed, params);
            }
        }

        let small = ParameterSpace::new()
            .with("kernel", ParamDistribution::choice(["rbf", "rbf"]))
            .with("degree", ParamDistribution::IntRange { low: 1, high: 4 });
        assert_eq!(small.grid_size(), Some(3));
        let all = RandomizedSearch::new(small)
            .with_iterations(10)
            .sample_candidates()
            .unwrap();
        assert_eq!(all.len(), 3);

        let continuous = ParameterSpace::new().with("C", ParamDistribution::Exponential { scale: 0.01 });
        assert_eq!(continuous.grid_size(), None);
        let draws = RandomizedSearch::new(continuous)
            .with_iterations(10)
            .sample_candidates()
            .unwrap();
        assert_eq!(draws.len(), 10);
    }

    #[test]
    fn search_picks_unbiased_candidate_and_refits() {
        let space = ParameterSpace::new().with(
            "bias",
            ParamDistribution::choice([0.0_f64, 5.0, -3.0]),
        );
        let factory = BiasedMeanFactory::default();
        let (inputs, targets) = sample_rows(40);
        let outcome = RandomizedSearch::new(space)
            .with_iterations(30)
            .with_seed(3)
            .with_threads(2)
            .fit(
                &factory,
                EstimatorFamily::Svm,
                EstimatorKind::Regressor,
                &ParamSet::new(),
                &inputs,
                &targets,
            )
            .unwrap();

        assert_eq!(outcome.report.best_params()["bias"], ParamValue::Float(0.0));
        // the 3-value grid caps the 30 requested candidates
        assert_eq!(outcome.report.candidates.len(), 3);
        // 3 candidates x 5 folds, plus the refit
        assert_eq!(factory.created.load(Ordering::SeqCst), 16);
        let predictions = outcome.estimator.predict(&inputs[..2]).unwrap();
        let mean = targets.iter().sum::<f64>() / targets.len() as f64;
        assert!((predictions[0] - mean).abs() < 1e-12);
    }

    #[test]
    fn search_fails_when_no_candidate_scores() {
        let space = ParameterSpace::new().with("bias", ParamDistribution::choice([1.0_f64, 2.0]));
        let factory = BiasedMeanFactory {
            fail_all: true,
            ..Default::default()
        };
        let (inputs, targets) = sample_rows(20);
        let err = RandomizedSearch::new(space)
            .with_iterations(2)
            .fit(
                &factory,
                EstimatorFamily::AdaBoost,
                EstimatorKind::Regressor,
                &ParamSet::new(),
                &inputs,
                &targets,
            )
            .err()
            .expect("search should fail");
        assert!(matches!(
            err.downcast_ref::<SearchError>(),
            Some(SearchError::NoValidCandidate { candidates: 2 })
        ));
    }
}
