//! Candle retrieval from the chart-data endpoint or from files on disk.

use crate::config::StrategyConfig;
use crate::error::DataError;
use crate::models::Candle;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const SEC_IN_DAY: i64 = 24 * 60 * 60;
const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
const CHART_DATA_TIMEOUT_SECS: u64 = 30;

/// Candles of one ticker quoted in one currency.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    pub ticker: String,
    pub currency: String,
    /// Seconds per candle
    pub candle_size: u64,
    pub candles: Vec<Candle>,
}

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    ticker: String,
    currency: String,
    candle_size: u64,
    candles: Vec<Candle>,
}

impl MarketData {
    pub fn new(ticker: &str, currency: &str, candle_size: u64, candles: Vec<Candle>) -> Self {
        Self {
            ticker: ticker.to_string(),
            currency: currency.to_string(),
            candle_size,
            candles,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Rescales prices by the first close and volumes by their mean, so that assets
    /// quoted at very different levels produce comparable features.
    pub fn normalise_data(&mut self) {
        let Some(first_close) = self.candles.first().map(|c| c.close) else {
            return;
        };
        if first_close == 0.0 || !first_close.is_finite() {
            warn!(
                "Skipping normalisation of {}/{}: first close is {}",
                self.ticker, self.currency, first_close
            );
            return;
        }

        let n = self.candles.len() as f64;
        let mean_volume = self.candles.iter().map(|c| c.volume).sum::<f64>() / n;
        let mean_quote_volume = self.candles.iter().map(|c| c.quote_volume).sum::<f64>() / n;

        for candle in &mut self.candles {
            candle.open /= first_close;
            candle.high /= first_close;
            candle.low /= first_close;
            candle.close /= first_close;
            candle.weighted_average /= first_close;
            if mean_volume > 0.0 {
                candle.volume /= mean_volume;
            }
            if mean_quote_volume > 0.0 {
                candle.quote_volume /= mean_quote_volume;
            }
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DataError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: MarketDataSnapshot = bincode::deserialize_from(BufReader::new(file))
            .map_err(DataError::SnapshotDecode)?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        Ok(Self {
            ticker: snapshot.ticker,
            currency: snapshot.currency,
            candle_size: snapshot.candle_size,
            candles: snapshot.candles,
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path)
            .with_context(|| format!("Unable to create market data snapshot at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            ticker: self.ticker.clone(),
            currency: self.currency.clone(),
            candle_size: self.candle_size,
            candles: self.candles.clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }
}

/// Which slice of history to retrieve.
#[derive(Debug, Clone, PartialEq)]
pub enum DataRequest {
    /// Absolute window for the web endpoint
    Window {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// `n_days` ending `offset_days` before the last candle in `filename`
    Offset {
        offset_days: i64,
        n_days: u32,
        filename: String,
    },
}

impl DataRequest {
    pub fn from_config(config: &StrategyConfig, filename: &str, now: DateTime<Utc>) -> Self {
        if config.web_flag {
            let end = now - Duration::seconds(config.offset * SEC_IN_DAY);
            let start = end - Duration::seconds(i64::from(config.n_days) * SEC_IN_DAY);
            Self::Window { start, end }
        } else {
            Self::Offset {
                offset_days: config.offset,
                n_days: config.n_days,
                filename: filename.to_string(),
            }
        }
    }
}

/// One row of the `returnChartData` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartDataPoint {
    date: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    quote_volume: f64,
    #[serde(default)]
    weighted_average: f64,
}

impl ChartDataPoint {
    fn into_candle(self) -> Option<Candle> {
        let date = Utc.timestamp_opt(self.date, 0).single()?;
        Some(Candle {
            date,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            quote_volume: self.quote_volume,
            weighted_average: self.weighted_average,
        })
    }
}

/// Candle files are either our own candle records or a saved chart-data response.
#[derive(Deserialize)]
#[serde(untagged)]
enum CandleFile {
    Candles(Vec<Candle>),
    ChartData(Vec<ChartDataPoint>),
}

impl CandleFile {
    fn into_candles(self) -> Vec<Candle> {
        match self {
            Self::Candles(candles) => candles,
            Self::ChartData(points) => points
                .into_iter()
                .filter_map(ChartDataPoint::into_candle)
                .collect(),
        }
    }
}

fn parse_chart_data(body: &str) -> Result<Vec<Candle>, DataError> {
    let value: Value = serde_json::from_str(body)?;
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(DataError::ApiResponseError(message.to_string()));
    }
    let points: Vec<ChartDataPoint> = serde_json::from_value(value)?;
    Ok(points
        .into_iter()
        .filter_map(ChartDataPoint::into_candle)
        .collect())
}

/// Blocking client for the `returnChartData` endpoint.
pub struct ChartDataClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl ChartDataClient {
    pub fn new(base_url: &str) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(CHART_DATA_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn fetch(
        &self,
        ticker: &str,
        currency: &str,
        candle_size: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DataError> {
        let pair = format!("{}_{}", currency, ticker);
        info!(
            "Requesting {} candles of {}s from {} to {}",
            pair, candle_size, start, end
        );
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("command", "returnChartData".to_string()),
                ("currencyPair", pair),
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("period", candle_size.to_string()),
            ])
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(DataError::ApiResponseError(format!(
                "status {}: {}",
                status,
                body.trim()
            )));
        }
        parse_chart_data(&body)
    }
}

/// Reads every candle from a `.json` or `.bin` file, oldest first.
pub fn read_candle_file(path: &Path) -> Result<Vec<Candle>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let mut candles = match extension.as_deref() {
        Some("json") => {
            let raw = fs::read_to_string(path).map_err(|source| DataError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
            let parsed: CandleFile = serde_json::from_str(&raw)
                .map_err(DataError::from)
                .with_context(|| format!("Invalid candle file {}", path.display()))?;
            parsed.into_candles()
        }
        Some("bin") => MarketData::load_from_file(path)?.candles,
        _ => return Err(DataError::UnsupportedFormat(path.to_path_buf()).into()),
    };
    candles.sort_by_key(|candle| candle.date);
    Ok(candles)
}

/// Keeps the `n_days` of candles that end `offset_days` before the last one.
pub fn window_by_offset(candles: Vec<Candle>, offset_days: i64, n_days: u32) -> Vec<Candle> {
    let Some(last) = candles.last().map(|c| c.date) else {
        return candles;
    };
    let end = last - Duration::seconds(offset_days * SEC_IN_DAY);
    let start = end - Duration::seconds(i64::from(n_days) * SEC_IN_DAY);
    candles
        .into_iter()
        .filter(|candle| candle.date > start && candle.date <= end)
        .collect()
}

/// Fetches the raw candles of one asset for the configured window.
pub fn fetch_market_data(
    ticker: &str,
    currency: &str,
    config: &StrategyConfig,
    filename: &str,
) -> Result<MarketData> {
    info!("Attempting data retrieval for {}/{}", ticker, currency);
    let request = DataRequest::from_config(config, filename, Utc::now());
    let candles = match &request {
        DataRequest::Window { start, end } => ChartDataClient::new(&config.chart_data_url)?
            .fetch(ticker, currency, config.candle_size, *start, *end)
            .with_context(|| format!("Chart data request for {}/{} failed", ticker, currency))?,
        DataRequest::Offset {
            offset_days,
            n_days,
            filename,
        } => window_by_offset(read_candle_file(Path::new(filename))?, *offset_days, *n_days),
    };

    if candles.is_empty() {
        return Err(DataError::NoData {
            ticker: ticker.to_string(),
            currency: currency.to_string(),
        }
        .into());
    }
    info!(
        "Retrieved {} candles for {}/{} (offset {} days)",
        candles.len(),
        ticker,
        currency,
        config.offset
    );
    Ok(MarketData::new(ticker, currency, config.candle_size, candles))
}

/// Fetches the candles of one asset and normalises them.
pub fn retrieve_data(
    ticker: &str,
    currency: &str,
    config: &StrategyConfig,
    filename: &str,
) -> Result<MarketData> {
    let mut data = fetch_market_data(ticker, currency, config, filename)?;
    data.normalise_data();
    Ok(data)
}

/// Both configured assets, first the one whose returns are predicted.
pub fn import_data(config: &StrategyConfig) -> Result<(MarketData, MarketData)> {
    info!("Retrieving candlestick data for ticker1[{}]", config.ticker_1);
    let data_1 = retrieve_data(
        &config.ticker_1,
        &config.scraper_currency_1,
        config,
        &config.filename1,
    )?;
    info!("Retrieving candlestick data for ticker2[{}]", config.ticker_2);
    let data_2 = retrieve_data(
        &config.ticker_2,
        &config.scraper_currency_2,
        config,
        &config.filename2,
    )?;
    Ok((data_1, data_2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(day: i64, close: f64, volume: f64) -> Candle {
        Candle {
            date: Utc.timestamp_opt(day * SEC_IN_DAY, 0).unwrap(),
            open: close,
            high: close * 1.1,
            low: close * 0.9,
            close,
            volume,
            quote_volume: volume * close,
            weighted_average: close,
        }
    }

    #[test]
    fn normalise_scales_prices_by_first_close_and_volume_by_mean() {
        let mut data = MarketData::new(
            "ETH",
            "BTC",
            1800,
            vec![candle(1, 4.0, 10.0), candle(2, 6.0, 30.0)],
        );
        data.normalise_data();
        assert_eq!(data.candles[0].close, 1.0);
        assert_eq!(data.candles[1].close, 1.5);
        assert!((data.candles[1].high - 1.65).abs() < 1e-12);
        assert_eq!(data.candles[0].volume, 0.5);
        assert_eq!(data.candles[1].volume, 1.5);
    }

    #[test]
    fn web_request_window_ends_offset_days_before_now() {
        let now = Utc.timestamp_opt(100 * SEC_IN_DAY, 0).unwrap();
        let config = StrategyConfig {
            web_flag: true,
            offset: 3,
            n_days: 10,
            ..StrategyConfig::default()
        };
        assert_eq!(
            DataRequest::from_config(&config, "unused.json", now),
            DataRequest::Window {
                start: Utc.timestamp_opt(87 * SEC_IN_DAY, 0).unwrap(),
                end: Utc.timestamp_opt(97 * SEC_IN_DAY, 0).unwrap(),
            }
        );

        let file_config = StrategyConfig {
            web_flag: false,
            ..config
        };
        assert!(matches!(
            DataRequest::from_config(&file_config, "eth.json", now),
            DataRequest::Offset { offset_days: 3, n_days: 10, .. }
        ));
    }

    #[test]
    fn offset_window_counts_back_from_last_candle() {
        let candles: Vec<Candle> = (0..30).map(|d| candle(d, 1.0 + d as f64, 1.0)).collect();
        let window = window_by_offset(candles, 5, 10);
        assert_eq!(window.len(), 10);
        assert_eq!(window.first().unwrap().close, 16.0);
        assert_eq!(window.last().unwrap().close, 25.0);
    }

    #[test]
    fn chart_data_body_parses_candles_and_errors() {
        let body = r#"[{"date":86400,"high":2.0,"low":1.0,"open":1.5,"close":1.8,
                        "volume":12.0,"quoteVolume":7.0,"weightedAverage":1.6}]"#;
        let candles = parse_chart_data(body).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].date.timestamp(), 86400);
        assert_eq!(candles[0].quote_volume, 7.0);

        let err = parse_chart_data(r#"{"error":"Invalid currency pair."}"#).unwrap_err();
        assert!(matches!(err, DataError::ApiResponseError(ref m) if m == "Invalid currency pair."));
    }

    #[test]
    fn snapshot_and_json_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = MarketData::new("LTC", "BTC", 300, vec![candle(2, 3.0, 1.0), candle(1, 2.0, 1.0)]);

        let bin_path = dir.path().join("nested/ltc.bin");
        data.save_to_file(&bin_path).unwrap();
        let loaded = MarketData::load_from_file(&bin_path).unwrap();
        assert_eq!(loaded, data);

        let json_path = dir.path().join("ltc.json");
        fs::write(&json_path, serde_json::to_string(&data.candles).unwrap()).unwrap();
        let candles = read_candle_file(&json_path).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].date < candles[1].date);

        let csv_path = dir.path().join("ltc.csv");
        fs::write(&csv_path, "date,close").unwrap();
        let err = read_candle_file(&csv_path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let config = StrategyConfig::default();
        let err = retrieve_data("ETH", "BTC", &config, "/nonexistent/eth.json").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::FileRead { .. })
        ));
    }
}
