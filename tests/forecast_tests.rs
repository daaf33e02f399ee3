use std::path::PathBuf;
use std::process::Command;

use anyhow::Result;
use candle_core::Device;
use etsformer::{apply_overrides, synthetic_series, EtsFormer, ForecastReport, ModelConfig};

fn small_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("configs/small.toml")
}

fn etsformer() -> Command {
    Command::new(env!("CARGO_BIN_EXE_etsformer"))
}

#[test]
fn bundled_config_forecasts_through_the_library() -> Result<()> {
    let config = ModelConfig::from_path(small_config_path())?;
    let model = EtsFormer::new(config, &Device::Cpu)?;
    let series = synthetic_series(2, 24, 1, &Device::Cpu)?;
    let prediction = model.forward(&series, 5)?;
    let report = ForecastReport::new(model.config(), 5, &prediction)?;
    assert_eq!(report.strategy, "fft");
    assert_eq!(report.forecast.len(), 2);
    for batch in &report.forecast {
        assert_eq!(batch.len(), 5);
        assert!(batch.iter().all(|step| step == &batch[0]));
        assert!(batch[0].iter().all(|v| v.is_finite()));
    }
    Ok(())
}

#[test]
fn overridden_strategy_matches_the_default() -> Result<()> {
    let config = ModelConfig::from_path(small_config_path())?;
    let naive = apply_overrides(&config, &["strategy=naive".into()])?;
    let series = synthetic_series(1, 20, 1, &Device::Cpu)?;
    let a = EtsFormer::new(config, &Device::Cpu)?.forward(&series, 2)?;
    let b = EtsFormer::new(naive, &Device::Cpu)?.forward(&series, 2)?;
    assert!(etsformer::max_abs_diff(&a, &b)? < 1e-3);
    Ok(())
}

#[test]
fn cli_prints_a_json_forecast() -> Result<()> {
    let output = etsformer()
        .args(["forecast", "--config"])
        .arg(small_config_path())
        .args(["--steps", "3", "--length", "16", "--override", "layers=1"])
        .output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["steps"], 3);
    assert_eq!(report["forecast"][0].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[test]
fn cli_verify_accepts_the_bundled_config() -> Result<()> {
    let output = etsformer()
        .args(["verify", "--config"])
        .arg(small_config_path())
        .args(["--length", "24"])
        .output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("strategies agree"));
    Ok(())
}

#[test]
fn cli_rejects_bad_overrides() -> Result<()> {
    let output = etsformer()
        .args(["forecast", "--config"])
        .arg(small_config_path())
        .args(["--override", "top_k=0"])
        .output()?;
    assert!(!output.status.success());
    Ok(())
}
