use crate::config::StrategyConfig;
use crate::data::fetch_market_data;
use anyhow::Result;
use log::info;
use std::path::{Path, PathBuf};

/// Writes a bincode snapshot of each configured asset's raw candles into `output_dir`.
pub fn run(config: &StrategyConfig, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let assets = [
        (&config.ticker_1, &config.scraper_currency_1, &config.filename1),
        (&config.ticker_2, &config.scraper_currency_2, &config.filename2),
    ];

    let mut written = Vec::with_capacity(assets.len());
    for (ticker, currency, filename) in assets {
        let data = fetch_market_data(ticker, currency, config, filename)?;
        let output_path = output_dir.join(format!(
            "{}_{}.bin",
            ticker.to_ascii_lowercase(),
            currency.to_ascii_lowercase()
        ));
        data.save_to_file(&output_path)?;
        info!(
            "Wrote {} candles for {}/{} to {}",
            data.len(),
            ticker,
            currency,
            output_path.display()
        );
        written.push(output_path);
    }

    Ok(written)
}
