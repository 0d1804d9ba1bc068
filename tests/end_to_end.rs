#![cfg(unix)]

use serde_json::json;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

const HOUR: i64 = 3600;
const CANDLES: i64 = 10 * 24;

/// Trains by recording its arguments and predicts a small positive return for every row.
const FAKE_BRIDGE: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    task=*) task="${arg#task=}" ;;
    data=*) data="${arg#data=}" ;;
    output_model=*) model="${arg#output_model=}" ;;
    output_result=*) result="${arg#output_result=}" ;;
  esac
done
case "$task" in
  train) echo "$@" > "$model" ;;
  predict) awk '{print 0.001}' "$data" > "$result" ;;
  *) exit 2 ;;
esac
"#;

fn write_chart_data(path: &Path, phase: f64) {
    let start = 1_600_000_000_i64 - 1_600_000_000 % HOUR;
    let points: Vec<_> = (0..CANDLES)
        .map(|i| {
            let close = 0.05 + 0.002 * ((i as f64) * 0.37 + phase).sin() + 0.00001 * i as f64;
            json!({
                "date": start + i * HOUR,
                "open": close,
                "high": close * 1.004,
                "low": close * 0.996,
                "close": close,
                "volume": 100.0 + (i % 7) as f64,
                "quoteVolume": 2000.0,
                "weightedAverage": close,
            })
        })
        .collect();
    fs::write(path, serde_json::to_string(&points).unwrap()).unwrap();
}

#[test]
fn fit_and_scan_run_against_candle_files() {
    let dir = tempfile::tempdir().unwrap();
    let tool = dir.path().join("fake-bridge");
    fs::write(&tool, FAKE_BRIDGE).unwrap();
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

    let eth = dir.path().join("eth_btc.json");
    let ltc = dir.path().join("ltc_btc.json");
    write_chart_data(&eth, 0.0);
    write_chart_data(&ltc, 1.3);

    let config_path = dir.path().join("strategy.json");
    let config = json!({
        "filename1": eth,
        "filename2": ltc,
        "candle_size": 3600,
        "n_days": 5,
        "ml_mode": "svm",
        "feature_windows": [5, 10],
        "search_iterations": 2,
        "search_folds": 2,
        "search_seed": 3,
        "n_jobs": 1,
        "estimators": { "lightgbm": tool, "bridge": tool },
    });
    fs::write(&config_path, config.to_string()).unwrap();

    let fit = Command::new(env!("CARGO_BIN_EXE_candlefit"))
        .arg("--config")
        .arg(&config_path)
        .arg("fit")
        .env("RUST_LOG", "warn")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&fit.stdout);
    assert!(
        fit.status.success(),
        "{}\n{}",
        stdout,
        String::from_utf8_lossy(&fit.stderr)
    );
    assert!(stdout.contains("svm (regression) offset=0 days"), "{}", stdout);
    assert!(stdout.contains("Training error:"), "{}", stdout);
    assert!(stdout.contains("Best parameters:"), "{}", stdout);

    let scan = Command::new(env!("CARGO_BIN_EXE_candlefit"))
        .arg("--config")
        .arg(&config_path)
        .args(["scan", "0,1"])
        .env("RUST_LOG", "warn")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&scan.stdout);
    assert!(scan.status.success(), "{}", stdout);
    assert!(stdout.contains("offset=1 days"), "{}", stdout);
    assert!(stdout.contains("Averages:"), "{}", stdout);
}
