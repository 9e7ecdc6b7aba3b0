//! 推論モジュール
//!
//! モデルアーカイブから分類器を再構築し、保存済みのラベルエンコーダーと
//! 組み合わせてスコアを文字ラベルに戻します。

use anyhow::{Context, Result};
use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use tracing::warn;

use crate::ml::label_binarizer::LabelBinarizer;
use crate::ml::ml_model::GlyphClassifier;
use crate::ml::preprocess::{load_glyph, GlyphPixels};
use crate::model::{load_model_with_metadata, ModelMetadata};

pub struct InferenceEngine<B: Backend> {
    model: GlyphClassifier<B>,
    binarizer: LabelBinarizer,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルアーカイブとラベルエンコーダーを読み込む
    pub fn load(model_path: &Path, labels_path: &Path, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path)?;
        let binarizer = LabelBinarizer::load(labels_path)
            .with_context(|| format!("Failed to load label encoder {}", labels_path.display()))?;

        if binarizer.classes() != metadata.class_labels.as_slice() {
            warn!(
                "Label encoder {} does not match the labels recorded in {}",
                labels_path.display(),
                model_path.display()
            );
        }

        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("Failed to restore model weights: {:?}", e))?;
        let model = metadata.model.init::<B>(&device).load_record(record);

        Ok(Self {
            model,
            binarizer,
            metadata,
            device,
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn binarizer(&self) -> &LabelBinarizer {
        &self.binarizer
    }

    /// 全出力ユニットのsoftmaxスコア
    pub fn probabilities(&self, pixels: &GlyphPixels) -> Result<Vec<f32>> {
        let [height, width, channels] = pixels.shape();
        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([1, channels, height, width]);

        self.model
            .predict(images)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to read prediction: {:?}", e))
    }

    pub fn classify_pixels(&self, pixels: &GlyphPixels) -> Result<String> {
        let scores = self.probabilities(pixels)?;
        self.binarizer
            .decode(&scores)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Model produced no scores"))
    }

    pub fn classify_image(&self, image_path: &Path) -> Result<String> {
        let pixels = load_glyph(image_path, self.metadata.model.glyph_size)?;
        self.classify_pixels(&pixels)
    }

    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<String>> {
        image_paths
            .iter()
            .map(|path| self.classify_image(path.as_ref()))
            .collect()
    }
}
