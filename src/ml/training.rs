//! 文字分類モデルの学習
//!
//! 画像読み込み -> 分割 -> ラベルエンコーダー作成 -> 学習 -> エンコーダーと
//! モデルアーカイブの保存、を順に行います。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use burn::{
    data::dataloader::{batcher::Batcher, DataLoaderBuilder},
    module::Module,
    optim::AdamConfig,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};
use tracing::{info, warn};

use crate::error::GlyphError;
use crate::ml::dataset::{GlyphBatch, GlyphBatcher, GlyphDataset, GlyphItem};
use crate::ml::label_binarizer::LabelBinarizer;
use crate::ml::ml_model::GlyphClassifier;
use crate::model::config::AppConfig;
use crate::model::{save_model_with_metadata, ModelMetadata};

impl<B: AutodiffBackend> TrainStep<GlyphBatch<B>, ClassificationOutput<B>> for GlyphClassifier<B> {
    fn step(&self, batch: GlyphBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

impl<B: Backend> ValidStep<GlyphBatch<B>, ClassificationOutput<B>> for GlyphClassifier<B> {
    fn step(&self, batch: GlyphBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub class_labels: Vec<String>,
    pub train_samples: usize,
    pub test_samples: usize,
    pub num_params: usize,
    /// テストデータの正解率（`[0, 1]`）
    pub test_accuracy: f32,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
}

/// `config` に従って `device` 上で学習を実行
///
/// 学習が完了するまでは何も書き込まない。完了後はラベルエンコーダー、
/// モデルアーカイブの順に保存する。
pub fn train_model<B: AutodiffBackend>(config: &AppConfig, device: B::Device) -> Result<TrainingReport> {
    let settings = &config.training;
    let model_config = config.model_config();
    model_config.validate()?;

    let dataset = GlyphDataset::from_directory(&config.paths.letter_images_folder, model_config.glyph_size)
        .context("Failed to load glyph images")?;

    let (train_set, test_set) = dataset.split(settings.test_ratio, settings.seed);
    if train_set.is_empty() || test_set.is_empty() {
        return Err(GlyphError::InsufficientSamples {
            train: train_set.len(),
            test: test_set.len(),
        }
        .into());
    }

    // テスト側にしかないクラスにも列を割り当てるため、両方のラベルで作成
    let binarizer = LabelBinarizer::fit(train_set.labels().chain(test_set.labels()))?;
    if binarizer.num_classes() > model_config.num_classes {
        return Err(GlyphError::TooManyClasses {
            found: binarizer.num_classes(),
            capacity: model_config.num_classes,
        }
        .into());
    }
    info!(
        "{} classes: {}",
        binarizer.num_classes(),
        binarizer.classes().join(", ")
    );
    info!("Training samples: {}, test samples: {}", train_set.len(), test_set.len());

    let train_split = train_set.encode(&binarizer)?;
    let test_split = test_set.encode(&binarizer)?;

    let batcher = GlyphBatcher::new(model_config.glyph_size);
    let dataloader_train = DataLoaderBuilder::new(batcher.clone())
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(settings.num_workers)
        .build(train_split);
    let dataloader_test = DataLoaderBuilder::new(batcher.clone())
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers)
        .build(test_split.clone());

    let model = model_config.init::<B>(&device);
    info!("Initialised glyph classifier with {} parameters", model.num_params());

    let scratch = ScratchDir::create(&config.paths.training_artifact_dir)?;
    let artifact_dir_str = scratch.path().to_string_lossy().to_string();

    info!(
        "Epochs: {}, batch size: {}, learning rate: {}",
        settings.num_epochs, settings.batch_size, settings.learning_rate
    );
    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), settings.learning_rate);

    let trained = learner.fit(dataloader_train, dataloader_test).model;
    let num_params = trained.num_params();

    let test_accuracy = evaluate(
        &trained,
        test_split.items(),
        &batcher,
        settings.batch_size,
        &device,
    );
    info!("Held-out accuracy: {:.2}%", test_accuracy * 100.0);

    let model_binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(trained.into_record(), ())
        .map_err(|e| anyhow::anyhow!("Failed to serialize model weights: {:?}", e))?;

    let metadata = ModelMetadata::new(
        model_config,
        binarizer.classes().to_vec(),
        settings.num_epochs,
        settings.batch_size,
        train_set.len(),
        test_set.len(),
    );

    binarizer
        .save(&config.paths.labels_path)
        .context("Failed to write label encoder")?;
    info!("Saved label encoder to {}", config.paths.labels_path.display());

    let model_path = save_model_with_metadata(&config.paths.model_path, &metadata, &model_binary)?;
    info!("Saved model to {}", model_path.display());

    drop(scratch);

    Ok(TrainingReport {
        class_labels: binarizer.classes().to_vec(),
        train_samples: train_set.len(),
        test_samples: test_set.len(),
        num_params,
        test_accuracy,
        model_path,
        labels_path: config.paths.labels_path.clone(),
    })
}

static RUN_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// 1回の学習専用の作業ディレクトリ（Drop時に削除）
///
/// 設定されたディレクトリ直下に毎回新しいサブディレクトリを作るので、
/// 削除されるのはこの実行で作ったものだけ。
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create training directory {}", root.display()))?;

        let name = format!(
            "run-{}-{}-{}",
            chrono::Local::now().format("%Y%m%d%H%M%S"),
            std::process::id(),
            RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = root.join(name);
        // create_dir は既存ディレクトリを再利用しない
        std::fs::create_dir(&path)
            .with_context(|| format!("Failed to create training directory {}", path.display()))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Could not clean up {}: {}", self.path.display(), e);
        }
    }
}

/// 最大スコアのクラスが正解と一致した割合
pub fn evaluate<B: Backend>(
    model: &GlyphClassifier<B>,
    items: &[GlyphItem],
    batcher: &GlyphBatcher,
    batch_size: usize,
    device: &B::Device,
) -> f32 {
    if items.is_empty() {
        return 0.0;
    }

    let mut correct = 0usize;
    for chunk in items.chunks(batch_size.max(1)) {
        let batch: GlyphBatch<B> = batcher.batch(chunk.to_vec(), device);
        let predictions = model.forward(batch.images).argmax(1).flatten::<1>(0, 1);
        let hits = predictions.equal(batch.targets).int().sum().into_scalar();
        correct += hits.elem::<i64>() as usize;
    }

    correct as f32 / items.len() as f32
}
