//! 学習のエントリポイント
//!
//! `glyph_trainer.json` があれば読み込み、設定されたデバイスで学習します。

#![recursion_limit = "256"]

use anyhow::Result;
use burn::backend::{Autodiff, Wgpu};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use tracing::info;
use tracing_subscriber::EnvFilter;

use glyph_trainer_lib::{train_model, AppConfig, DeviceType, TrainingReport};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load_or_default();
    config.display();

    // バックエンドごとに学習を実行
    let report = match config.device_type {
        DeviceType::Wgpu => train_model::<Autodiff<Wgpu>>(&config, WgpuDevice::default())?,
        DeviceType::Cpu => train_model::<Autodiff<NdArray>>(&config, NdArrayDevice::Cpu)?,
    };

    log_report(&report);
    Ok(())
}

fn log_report(report: &TrainingReport) {
    info!("Classes ({}): {}", report.class_labels.len(), report.class_labels.join(" "));
    info!(
        "Samples: {} train / {} test, parameters: {}",
        report.train_samples, report.test_samples, report.num_params
    );
    info!("Test accuracy: {:.2}%", report.test_accuracy * 100.0);
    info!("Model: {}", report.model_path.display());
    info!("Labels: {}", report.labels_path.display());
}
