pub mod export_data;
pub mod fit;
pub mod scan;

use crate::config::StrategyConfig;
use crate::data::{import_data, MarketData};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::process;

/// Loads both assets or terminates the process with status 1.
///
/// Data problems are not retried: the error chain and a backtrace go to stdout before
/// exiting.
pub fn import_data_or_exit(config: &StrategyConfig) -> (MarketData, MarketData) {
    match import_data(config) {
        Ok(data) => data,
        Err(err) => {
            println!("{}", data_failure_report(&err));
            process::exit(1);
        }
    }
}

fn data_failure_report(err: &anyhow::Error) -> String {
    let mut report = format!("*** data retrieval failed:\n{:?}", err);
    // anyhow only prints a backtrace it captured itself
    if err.backtrace().status() != BacktraceStatus::Captured {
        report.push_str(&format!(
            "\n\nStack backtrace:\n{}",
            Backtrace::force_capture()
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn failure_report_carries_chain_and_backtrace() {
        let err = anyhow!("No such file").context("Unable to read candle file eth_btc.json");
        let report = data_failure_report(&err);
        assert!(report.starts_with("*** data retrieval failed:\n"));
        assert!(report.contains("Unable to read candle file eth_btc.json"));
        assert!(report.contains("No such file"));
        assert!(report.contains("Stack backtrace:"), "{}", report);
    }
}
