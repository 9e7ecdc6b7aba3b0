//! モデルメタデータ
//!
//! モデルアーカイブ内に保存され、ネットワークの再構築に必要な構成と
//! 学習実行時の情報を記録します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::ml_model::ModelConfig;

/// `metadata.json` の内容
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// ネットワーク構成
    pub model: ModelConfig,

    /// 出力列順のラベル（ラベルエンコーダーのクラスと同じ）
    pub class_labels: Vec<String>,

    pub num_epochs: usize,
    pub batch_size: usize,
    pub train_samples: usize,
    pub test_samples: usize,

    /// 学習日時（RFC 3339）
    pub trained_at: String,
}

impl ModelMetadata {
    pub fn new(
        model: ModelConfig,
        class_labels: Vec<String>,
        num_epochs: usize,
        batch_size: usize,
        train_samples: usize,
        test_samples: usize,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            model,
            class_labels,
            num_epochs,
            batch_size,
            train_samples,
            test_samples,
            trained_at,
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
