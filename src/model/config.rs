//! アプリケーション設定管理モジュール
//!
//! デフォルト値は学習手順の固定定数そのもの。[`AppConfig::default_path`] の
//! JSONファイルで任意の項目を上書きできます。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ml::ml_model::{ModelConfig, NUM_CLASSES};
use crate::ml::preprocess::GLYPH_SIZE;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 入出力パス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// `<ラベル>/<画像>` 形式の文字画像フォルダ
    pub letter_images_folder: PathBuf,
    /// モデルアーカイブ（`.tar.gz` がなければ付与）
    pub model_path: PathBuf,
    /// ラベルエンコーダーのJSON
    pub labels_path: PathBuf,
    /// 学習ログ用の作業ディレクトリ
    ///
    /// 実行ごとにこの下へ専用サブディレクトリを作り、学習後はそれだけを削除する
    #[serde(default = "default_artifact_dir")]
    pub training_artifact_dir: PathBuf,
}

fn default_artifact_dir() -> PathBuf {
    std::env::temp_dir().join("glyph_trainer_training")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            letter_images_folder: PathBuf::from("extracted_letter_images"),
            model_path: PathBuf::from("captcha_model.tar.gz"),
            labels_path: PathBuf::from("model_labels.json"),
            training_artifact_dir: default_artifact_dir(),
        }
    }
}

/// 学習設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    pub num_epochs: usize,
    pub batch_size: usize,
    /// データローダーのワーカー数（0なら学習スレッドで読み込む）
    pub num_workers: usize,
    pub learning_rate: f64,
    /// 学習/テスト分割とエポックごとのシャッフルに使う乱数シード
    pub seed: u64,
    /// テスト用に取り分ける割合
    pub test_ratio: f32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            batch_size: 32,
            num_workers: 0,
            learning_rate: 1e-3,
            seed: 0,
            test_ratio: 0.25,
        }
    }
}

/// モデル入出力サイズ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 入力画像サイズ（正方形）
    pub glyph_size: usize,
    /// 出力層のユニット数
    pub num_classes: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            glyph_size: GLYPH_SIZE,
            num_classes: NUM_CLASSES,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub model: ModelSettings,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        PathBuf::from("glyph_trainer.json")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// [`Self::default_path`] を読み込む（存在しない・読めない場合はデフォルト）
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to read config {} ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// この設定に対応するネットワーク構成
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new()
            .with_glyph_size(self.model.glyph_size)
            .with_num_classes(self.model.num_classes)
    }

    /// 設定内容をログ出力
    pub fn display(&self) {
        info!("Device: {}", self.device_type);
        info!("Glyph folder: {}", self.paths.letter_images_folder.display());
        info!("Model output: {}", self.paths.model_path.display());
        info!("Label encoder output: {}", self.paths.labels_path.display());
        info!(
            "Epochs: {}, batch size: {}, learning rate: {}, seed: {}, test ratio: {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.seed,
            self.training.test_ratio
        );
        info!(
            "Glyph size: {}x{}, output classes: {}",
            self.model.glyph_size, self.model.glyph_size, self.model.num_classes
        );
    }
}
