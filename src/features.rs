use crate::config::StrategyConfig;
use crate::data::MarketData;
use crate::indicators::{calculate_ema, calculate_rsi, calculate_sma, fractional_change};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::info;

const RETURN_LAGS: usize = 3;
const RSI_PERIOD: usize = 14;

/// Model inputs with both target encodings, one entry per usable candle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingVariables {
    pub inputs: Vec<Vec<f64>>,
    /// Fractional return of the next candle
    pub continuous_targets: Vec<f64>,
    /// 1 when the next candle closes higher, else 0
    pub classification_targets: Vec<f64>,
    pub dates: Vec<DateTime<Utc>>,
}

impl TrainingVariables {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn targets(&self, classification: bool) -> &[f64] {
        if classification {
            &self.classification_targets
        } else {
            &self.continuous_targets
        }
    }

    /// Keeps only the last `len` rows.
    fn keep_tail(&mut self, len: usize) {
        keep_last(&mut self.inputs, len);
        keep_last(&mut self.continuous_targets, len);
        keep_last(&mut self.classification_targets, len);
        keep_last(&mut self.dates, len);
    }
}

fn keep_last<T>(values: &mut Vec<T>, len: usize) {
    let skip = values.len().saturating_sub(len);
    values.drain(..skip);
}

/// Builds one feature row per candle that has enough history behind it and a next
/// candle to label it with.
///
/// With `prior`, each row also carries the prior asset's latest return as of the row's
/// date and the log ratio of the two closes; rows dated before the prior's first candle
/// are dropped.
pub fn generate_training_variables(
    data: &MarketData,
    config: &StrategyConfig,
    prior: Option<&MarketData>,
) -> Result<TrainingVariables> {
    let closes = data.closes();
    let volumes: Vec<f64> = data.candles.iter().map(|c| c.volume).collect();
    let longest_window = config.feature_windows.iter().copied().max().unwrap_or(1);
    let warmup = longest_window.max(RETURN_LAGS);

    let returns = fractional_change(&closes, 1);
    let smas: Vec<Vec<f64>> = config
        .feature_windows
        .iter()
        .map(|w| calculate_sma(&closes, *w))
        .collect();
    let emas: Vec<Vec<f64>> = config
        .feature_windows
        .iter()
        .map(|w| calculate_ema(&closes, *w))
        .collect();
    let rsi = calculate_rsi(&closes, RSI_PERIOD);
    let volume_sma = calculate_sma(&volumes, longest_window);

    let prior_closes = prior.map(MarketData::closes);
    let prior_returns = prior_closes.as_deref().map(|c| fractional_change(c, 1));

    let mut variables = TrainingVariables::default();
    for i in warmup..closes.len().saturating_sub(1) {
        let candle = &data.candles[i];
        let close = closes[i];
        if close == 0.0 {
            continue;
        }

        let mut row = Vec::with_capacity(RETURN_LAGS + 2 * smas.len() + 5);
        row.extend((0..RETURN_LAGS).map(|lag| returns[i - lag]));
        for (sma, ema) in smas.iter().zip(&emas) {
            row.push(ratio_minus_one(close, sma[i]));
            row.push(ratio_minus_one(close, ema[i]));
        }
        row.push(rsi[i] / 100.0 - 0.5);
        row.push((candle.high - candle.low) / close);
        row.push(if volume_sma[i] > 0.0 {
            volumes[i] / volume_sma[i]
        } else {
            1.0
        });

        if let (Some(prior_data), Some(prior_closes), Some(prior_returns)) =
            (prior, prior_closes.as_ref(), prior_returns.as_ref())
        {
            let as_of = prior_data
                .candles
                .partition_point(|c| c.date <= candle.date);
            if as_of == 0 {
                continue;
            }
            let prior_close = prior_closes[as_of - 1];
            row.push(prior_returns[as_of - 1]);
            row.push(if close > 0.0 && prior_close > 0.0 {
                (close / prior_close).ln()
            } else {
                0.0
            });
        }

        let next_return = closes[i + 1] / close - 1.0;
        variables.inputs.push(row);
        variables.continuous_targets.push(next_return);
        variables
            .classification_targets
            .push(if next_return > 0.0 { 1.0 } else { 0.0 });
        variables.dates.push(candle.date);
    }

    if variables.is_empty() {
        return Err(anyhow!(
            "Not enough candles for {}/{} to build features ({} candles, need more than {})",
            data.ticker,
            data.currency,
            data.len(),
            warmup + 1
        ));
    }
    Ok(variables)
}

fn ratio_minus_one(value: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        0.0
    } else {
        value / reference - 1.0
    }
}

/// Drops leading rows so both matrices keep their `min(len)` most recent rows.
pub fn trim_inputs(
    mut inputs_1: Vec<Vec<f64>>,
    mut inputs_2: Vec<Vec<f64>>,
) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let min_len = inputs_1.len().min(inputs_2.len());
    keep_last(&mut inputs_1, min_len);
    keep_last(&mut inputs_2, min_len);
    (inputs_1, inputs_2)
}

/// Concatenates two equally long matrices along the feature axis.
pub fn hstack(left: &[Vec<f64>], right: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    if left.len() != right.len() {
        return Err(anyhow!(
            "Cannot stack feature matrices with {} and {} rows",
            left.len(),
            right.len()
        ));
    }
    Ok(left
        .iter()
        .zip(right)
        .map(|(l, r)| l.iter().chain(r).copied().collect())
        .collect())
}

/// Features of both assets side by side, labelled with the first asset's targets.
pub fn input_processing(
    data_1: &MarketData,
    data_2: &MarketData,
    config: &StrategyConfig,
) -> Result<TrainingVariables> {
    info!("Generating training variables [1]");
    let mut primary = generate_training_variables(data_1, config, None)?;

    info!("Generating training variables [2]");
    let secondary = generate_training_variables(data_2, config, Some(data_1))?;

    info!("Trimming inputs");
    let (inputs_1, inputs_2) = trim_inputs(std::mem::take(&mut primary.inputs), secondary.inputs);
    primary.inputs = inputs_1;
    primary.keep_tail(inputs_2.len());

    info!("Hstacking");
    primary.inputs = hstack(&primary.inputs, &inputs_2)?;
    Ok(primary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candle;
    use chrono::TimeZone;

    fn market(ticker: &str, n: usize, start_hour: i64) -> MarketData {
        let candles = (0..n)
            .map(|i| {
                let close = 1.0 + 0.1 * ((i as f64) * 0.7).sin() + 0.001 * i as f64;
                Candle {
                    date: Utc
                        .timestamp_opt((start_hour + i as i64) * 3600, 0)
                        .unwrap(),
                    open: close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume: 10.0 + (i % 5) as f64,
                    quote_volume: 0.0,
                    weighted_average: close,
                }
            })
            .collect();
        MarketData::new(ticker, "BTC", 3600, candles)
    }

    fn config() -> StrategyConfig {
        StrategyConfig {
            feature_windows: vec![5, 10],
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn rows_skip_warmup_and_last_candle() {
        let data = market("ETH", 60, 0);
        let vars = generate_training_variables(&data, &config(), None).unwrap();
        assert_eq!(vars.len(), 60 - 10 - 1);
        assert_eq!(vars.inputs[0].len(), 3 + 4 + 3);
        assert_eq!(vars.dates[0], data.candles[10].date);

        let expected = data.candles[11].close / data.candles[10].close - 1.0;
        assert!((vars.continuous_targets[0] - expected).abs() < 1e-12);
        for (c, label) in vars.continuous_targets.iter().zip(&vars.classification_targets) {
            assert_eq!(*label, if *c > 0.0 { 1.0 } else { 0.0 });
        }
    }

    #[test]
    fn prior_adds_two_columns_and_drops_unmatched_rows() {
        let prior = market("ETH", 60, 20);
        let data = market("LTC", 60, 0);
        let vars = generate_training_variables(&data, &config(), Some(&prior)).unwrap();
        assert_eq!(vars.inputs[0].len(), 3 + 4 + 3 + 2);
        assert!(vars.dates.iter().all(|d| *d >= prior.candles[0].date));
        assert_eq!(vars.len(), 60 - 20 - 1);
    }

    #[test]
    fn too_few_candles_is_an_error() {
        let data = market("ETH", 8, 0);
        assert!(generate_training_variables(&data, &config(), None).is_err());
    }

    #[test]
    fn trim_and_stack_keeps_most_recent_rows() {
        let first: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64]).collect();
        let second: Vec<Vec<f64>> = (0..80).map(|i| vec![1000.0 + i as f64, -1.0]).collect();
        let (first, second) = trim_inputs(first, second);
        let stacked = hstack(&first, &second).unwrap();

        assert_eq!(stacked.len(), 80);
        assert_eq!(stacked[0], vec![20.0, 1000.0, -1.0]);
        assert_eq!(stacked[79], vec![99.0, 1079.0, -1.0]);
    }

    #[test]
    fn input_processing_trims_targets_with_inputs() {
        let data_1 = market("ETH", 120, 0);
        let data_2 = market("LTC", 90, 30);
        let single = generate_training_variables(&data_1, &config(), None).unwrap();
        let combined = input_processing(&data_1, &data_2, &config()).unwrap();

        assert_eq!(combined.inputs.len(), combined.continuous_targets.len());
        assert_eq!(combined.inputs.len(), combined.dates.len());
        assert_eq!(combined.inputs[0].len(), 10 + 12);
        assert_eq!(
            combined.continuous_targets.last(),
            single.continuous_targets.last()
        );
        assert!(combined.len() < single.len());
    }
}
