use crate::config::{RegressionMode, StrategyConfig};
use crate::features::TrainingVariables;
use crate::models::{format_params, FittingResult, ModelReference};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use std::time::{Duration, Instant};

/// Wall-clock stopwatch for one fitting cycle.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    started: Instant,
}

impl Timer {
    pub fn tic() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn toc(&self) -> Duration {
        self.started.elapsed()
    }
}

/// What the strategy would actually have earned on each row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationData {
    pub dates: Vec<DateTime<Utc>>,
    /// Fractional return of the candle following each row
    pub realized_returns: Vec<f64>,
}

impl From<&TrainingVariables> for EvaluationData {
    fn from(variables: &TrainingVariables) -> Self {
        Self {
            dates: variables.dates.clone(),
            realized_returns: variables.continuous_targets.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentPerformance {
    pub positions: Vec<f64>,
    pub strategy_returns: Vec<f64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub profit_fraction: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_percent: f64,
    pub hit_rate: f64,
    pub position_changes: usize,
}

impl SegmentPerformance {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StrategyReport {
    pub training: SegmentPerformance,
    pub test: SegmentPerformance,
    pub validation: SegmentPerformance,
    pub error: f64,
    pub model: ModelReference,
}

impl StrategyReport {
    /// Profit of the most out-of-sample segment that has rows.
    pub fn headline_profit(&self) -> f64 {
        if !self.validation.is_empty() {
            self.validation.profit_fraction
        } else if !self.test.is_empty() {
            self.test.profit_fraction
        } else {
            0.0
        }
    }
}

fn position_for(prediction: f64, mode: RegressionMode, allow_short: bool) -> f64 {
    let short = if allow_short { -1.0 } else { 0.0 };
    match mode {
        RegressionMode::Regression if prediction > 0.0 => 1.0,
        RegressionMode::Regression if prediction < 0.0 => short,
        RegressionMode::Regression => 0.0,
        RegressionMode::Classification if prediction >= 0.5 => 1.0,
        RegressionMode::Classification => short,
    }
}

fn evaluate_segment(
    indices: &[usize],
    predictions: &[f64],
    data: &EvaluationData,
    config: &StrategyConfig,
) -> Result<SegmentPerformance> {
    if predictions.is_empty() {
        return Ok(SegmentPerformance::default());
    }
    if predictions.len() != indices.len() {
        return Err(anyhow!(
            "Segment has {} rows but {} predictions",
            indices.len(),
            predictions.len()
        ));
    }
    if let Some(bad) = indices.iter().find(|idx| **idx >= data.realized_returns.len()) {
        return Err(anyhow!(
            "Row {} is outside the {} evaluation rows",
            bad,
            data.realized_returns.len()
        ));
    }

    let positions: Vec<f64> = predictions
        .iter()
        .map(|p| position_for(*p, config.regression_mode, config.allow_short))
        .collect();

    let mut previous = 0.0;
    let mut position_changes = 0;
    let mut strategy_returns = Vec::with_capacity(positions.len());
    for (position, idx) in positions.iter().zip(indices) {
        let turnover = (position - previous).abs();
        if turnover > 0.0 {
            position_changes += 1;
        }
        strategy_returns.push(position * data.realized_returns[*idx] - config.fee_fraction * turnover);
        previous = *position;
    }

    let invested: Vec<(f64, f64)> = positions
        .iter()
        .zip(indices)
        .filter(|(position, _)| **position != 0.0)
        .map(|(position, idx)| (*position, data.realized_returns[*idx]))
        .collect();
    let hit_rate = if invested.is_empty() {
        0.0
    } else {
        invested.iter().filter(|(p, r)| p * r > 0.0).count() as f64 / invested.len() as f64
    };

    let profit_fraction = strategy_returns.iter().fold(1.0, |equity, r| equity * (1.0 + r)) - 1.0;

    Ok(SegmentPerformance {
        sharpe_ratio: sharpe_ratio(&strategy_returns, config.periods_per_year()),
        max_drawdown_percent: max_drawdown_percent(&strategy_returns),
        start: indices.first().and_then(|i| data.dates.get(*i)).copied(),
        end: indices.last().and_then(|i| data.dates.get(*i)).copied(),
        positions,
        strategy_returns,
        profit_fraction,
        hit_rate,
        position_changes,
    })
}

/// Annualized mean over standard deviation of per-candle returns; 0 when undefined.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean_return = returns.mean();
    let std_dev = returns.std_dev();
    if std_dev == 0.0 || !std_dev.is_finite() {
        return 0.0;
    }
    mean_return / std_dev * periods_per_year.sqrt()
}

/// Largest peak-to-trough fall of the compounded equity curve, in percent.
pub fn max_drawdown_percent(returns: &[f64]) -> f64 {
    let mut equity = 1.0;
    let mut peak = 1.0;
    let mut max_drawdown = 0.0;
    for r in returns {
        equity *= 1.0 + r;
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            let drawdown = (peak - equity) / peak * 100.0;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }
    max_drawdown
}

/// Turns segment predictions into positions and fee-adjusted strategy returns.
pub fn post_process_training_results(
    config: &StrategyConfig,
    result: &FittingResult,
    data: &EvaluationData,
) -> Result<StrategyReport> {
    let partition = &result.partition;
    Ok(StrategyReport {
        training: evaluate_segment(
            &partition.train,
            &result.training_strategy_score,
            data,
            config,
        )?,
        test: evaluate_segment(
            &partition.test,
            &result.fitted_strategy_score,
            data,
            config,
        )?,
        validation: evaluate_segment(
            &partition.validation,
            &result.validation_strategy_score,
            data,
            config,
        )?,
        error: result.error,
        model: result.model.clone(),
    })
}

fn print_segment(label: &str, segment: &SegmentPerformance) {
    if segment.is_empty() {
        println!("{:<11} no rows", label);
        return;
    }
    let span = match (segment.start, segment.end) {
        (Some(start), Some(end)) => format!(
            "{} .. {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        ),
        _ => String::from("-"),
    };
    println!(
        "{:<11} rows={:<6} profit={:>8.3}% sharpe={:>7.3} max_dd={:>7.3}% hit_rate={:>6.2}% changes={:<5} {}",
        label,
        segment.positions.len(),
        segment.profit_fraction * 100.0,
        segment.sharpe_ratio,
        segment.max_drawdown_percent,
        segment.hit_rate * 100.0,
        segment.position_changes,
        span
    );
}

/// Prints the summary when `output_flag` is set and returns the headline profit
/// fraction.
pub fn output_strategy_results(config: &StrategyConfig, report: &StrategyReport, timer: &Timer) -> f64 {
    if config.output_flag {
        println!(
            "\n{} ({}) offset={} days",
            config.ml_mode.key(),
            config.regression_mode.label(),
            config.offset
        );
        println!("----------------------");
        print_segment("training", &report.training);
        print_segment("test", &report.test);
        print_segment("validation", &report.validation);
        println!("Training error: {}", report.error);
        match &report.model {
            ModelReference::Search(search) => println!(
                "Best parameters: [{}] (mean CV score {:.6})",
                format_params(search.best_params()),
                search.best_score()
            ),
            ModelReference::Fixed { family, params } => {
                println!("Model: {} [{}]", family.label(), format_params(params))
            }
            ModelReference::None => {}
        }
        println!("Fitting time: {:.2}s", timer.toc().as_secs_f64());
    }
    report.headline_profit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexPartition;

    fn evaluation(returns: &[f64]) -> EvaluationData {
        EvaluationData {
            dates: Vec::new(),
            realized_returns: returns.to_vec(),
        }
    }

    fn fitting(train: Vec<f64>, test: Vec<f64>, validation: Vec<f64>) -> FittingResult {
        let train_len = train.len();
        let test_len = test.len();
        let validation_len = validation.len();
        FittingResult {
            training_strategy_score: train,
            fitted_strategy_score: test,
            validation_strategy_score: validation,
            partition: IndexPartition {
                train: (0..train_len).collect(),
                test: (train_len..train_len + test_len).collect(),
                validation: (train_len + test_len..train_len + test_len + validation_len)
                    .collect(),
            },
            ..FittingResult::default()
        }
    }

    #[test]
    fn long_only_regression_charges_fees_on_changes() {
        let config = StrategyConfig {
            fee_fraction: 0.01,
            ..StrategyConfig::default()
        };
        let data = evaluation(&[0.1, -0.05, 0.2, 0.0]);
        let result = fitting(vec![0.3, -0.2, 0.5, 0.1], Vec::new(), Vec::new());
        let report = post_process_training_results(&config, &result, &data).unwrap();

        assert_eq!(report.training.positions, vec![1.0, 0.0, 1.0, 1.0]);
        assert_eq!(report.training.position_changes, 3);
        let expected = [0.1 - 0.01, -0.01, 0.2 - 0.01, 0.0];
        for (got, want) in report.training.strategy_returns.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
        assert!((report.training.hit_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!(report.test.is_empty());
        assert_eq!(report.headline_profit(), 0.0);
    }

    #[test]
    fn classification_shorts_when_allowed() {
        let config = StrategyConfig {
            regression_mode: RegressionMode::Classification,
            allow_short: true,
            fee_fraction: 0.0,
            ..StrategyConfig::default()
        };
        let data = evaluation(&[0.1, -0.1, 0.05, -0.02]);
        let result = fitting(vec![1.0, 0.0], vec![1.0], vec![0.0]);
        let report = post_process_training_results(&config, &result, &data).unwrap();

        assert_eq!(report.training.positions, vec![1.0, -1.0]);
        assert!((report.training.profit_fraction - (1.1 * 1.1 - 1.0)).abs() < 1e-12);
        assert!((report.test.profit_fraction - 0.05).abs() < 1e-12);
        assert!((report.headline_profit() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn headline_profit_falls_back_to_test() {
        let config = StrategyConfig {
            fee_fraction: 0.0,
            ..StrategyConfig::default()
        };
        let data = evaluation(&[0.1, 0.3]);
        let result = fitting(vec![1.0], vec![1.0], Vec::new());
        let report = post_process_training_results(&config, &result, &data).unwrap();
        assert!((report.headline_profit() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn drawdown_and_sharpe_edge_cases() {
        assert_eq!(max_drawdown_percent(&[]), 0.0);
        assert!((max_drawdown_percent(&[0.1, -0.5, 0.2]) - 50.0).abs() < 1e-9);
        assert_eq!(sharpe_ratio(&[0.01], 365.0), 0.0);
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 365.0), 0.0);
        assert!(sharpe_ratio(&[0.02, 0.01, 0.03], 365.0) > 0.0);
    }

    #[test]
    fn mismatched_predictions_are_rejected() {
        let mut result = fitting(vec![1.0, 1.0], Vec::new(), Vec::new());
        result.training_strategy_score.pop();
        let err = post_process_training_results(
            &StrategyConfig::default(),
            &result,
            &evaluation(&[0.1, 0.1]),
        );
        assert!(err.is_err());
    }
}
