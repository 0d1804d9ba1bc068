//! Rolling price indicators used as model features. Every series has the same length as
//! its input and never looks ahead.

/// Simple moving average; the first `period - 1` values average the rows seen so far.
pub fn calculate_sma(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut sma_values = Vec::with_capacity(values.len());
    let mut window_sum = 0.0;

    for (i, value) in values.iter().enumerate() {
        window_sum += value;
        if i >= period {
            window_sum -= values[i - period];
        }
        let count = (i + 1).min(period);
        sma_values.push(window_sum / count as f64);
    }

    sma_values
}

/// Exponential moving average seeded with the first value.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<f64> {
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values: Vec<f64> = Vec::with_capacity(values.len());

    for value in values {
        let next = match ema_values.last() {
            Some(previous) => value * multiplier + previous * (1.0 - multiplier),
            None => *value,
        };
        ema_values.push(next);
    }

    ema_values
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Wilder's RSI; neutral (50) until `period` changes have been observed.
pub fn calculate_rsi(values: &[f64], period: usize) -> Vec<f64> {
    let mut rsi_values = vec![50.0; values.len()];
    if period == 0 || values.len() <= period {
        return rsi_values;
    }

    let (mut avg_gain, mut avg_loss) = (0.0, 0.0);
    for i in 1..values.len() {
        let delta = values[i] - values[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        if i <= period {
            avg_gain += gain / period as f64;
            avg_loss += loss / period as f64;
            if i < period {
                continue;
            }
        } else {
            avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
            avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        }
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

/// `values[i] / values[i - lag] - 1`, or 0 where the lagged value is missing or zero.
pub fn fractional_change(values: &[f64], lag: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if lag == 0 || i < lag || values[i - lag] == 0.0 {
                0.0
            } else {
                values[i] / values[i - lag] - 1.0
            }
        })
        .collect()
}
