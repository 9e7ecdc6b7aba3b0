//! 文字画像データセットの読み込み・分割・バッチ化

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Int, Tensor},
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::{debug, info};

use crate::error::{GlyphError, Result};
use crate::ml::label_binarizer::LabelBinarizer;
use crate::ml::preprocess::{load_glyph, GlyphPixels};

/// 画像として扱う拡張子（大文字小文字は区別しない）
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// 前処理済みの1文字とフォルダ名のラベル
#[derive(Debug, Clone)]
pub struct GlyphSample {
    pub pixels: GlyphPixels,
    pub label: String,
}

/// ルートフォルダ以下の全文字画像（走査順）
#[derive(Debug, Clone, Default)]
pub struct GlyphDataset {
    samples: Vec<GlyphSample>,
}

impl GlyphDataset {
    /// `<root>/<ラベル>/<画像>` を読み込み、`glyph_size` に前処理する
    ///
    /// 画像の拡張子でないファイルは無視する。拡張子が画像なのに読めない場合はエラー。
    pub fn from_directory(root: &Path, glyph_size: usize) -> Result<Self> {
        if !root.is_dir() {
            return Err(GlyphError::MissingDirectory(root.to_path_buf()));
        }

        let mut samples = Vec::new();
        for path in list_images(root)? {
            let label = label_for(&path);
            let pixels = load_glyph(&path, glyph_size)?;
            samples.push(GlyphSample { pixels, label });
        }

        if samples.is_empty() {
            return Err(GlyphError::EmptyDataset(root.to_path_buf()));
        }

        let dataset = Self { samples };
        let counts = dataset.class_counts();
        info!(
            "Loaded {} glyphs from {} classes under {}",
            dataset.len(),
            counts.len(),
            root.display()
        );
        for (label, count) in &counts {
            debug!("  class {}: {} samples", label, count);
        }

        Ok(dataset)
    }

    pub fn from_samples(samples: Vec<GlyphSample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[GlyphSample] {
        &self.samples
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|s| s.label.as_str())
    }

    /// ラベルごとのサンプル数
    pub fn class_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for label in self.labels() {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }

    /// シード付きで `(train, test)` に分割（[`train_test_split`] を参照）
    pub fn split(self, test_ratio: f32, seed: u64) -> (Self, Self) {
        let (train, test) = train_test_split(self.samples, test_ratio, seed);
        (Self { samples: train }, Self { samples: test })
    }

    /// エンコーダーでラベルをクラス番号に変換
    pub fn encode(&self, binarizer: &LabelBinarizer) -> Result<GlyphSplit> {
        let items = self
            .samples
            .iter()
            .map(|sample| {
                Ok(GlyphItem {
                    pixels: sample.pixels.as_slice().to_vec(),
                    label: binarizer.index_of(&sample.label)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(GlyphSplit { items })
    }
}

/// `root` 以下の画像ファイルを再帰的に列挙
///
/// 各ディレクトリはファイル名順に走査するので、結果は `read_dir` の順序に依存しない。
pub fn list_images(root: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    walk(root, &mut images)?;
    Ok(images)
}

fn walk(dir: &Path, images: &mut Vec<PathBuf>) -> Result<()> {
    let io_err = |source| GlyphError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(io_err)?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            walk(&path, images)?;
        } else if has_image_extension(&path) {
            images.push(path);
        }
    }
    Ok(())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// 親フォルダ名
fn label_for(path: &Path) -> String {
    path.parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// シャッフルして切り分ける決定的な分割
///
/// `seed` で初期化した `StdRng` でシャッフルし、先頭 `ceil(n * test_ratio)` 個を
/// テスト側、残りを学習側にする。
pub fn train_test_split<T>(mut items: Vec<T>, test_ratio: f32, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);

    let n_test = ((items.len() as f64 * test_ratio.clamp(0.0, 1.0) as f64).ceil() as usize)
        .min(items.len());
    let train = items.split_off(n_test);
    (train, items)
}

/// バッチ化用のアイテム（平坦化した画素とクラス番号）
#[derive(Clone, Debug)]
pub struct GlyphItem {
    pub pixels: Vec<f32>,
    pub label: usize,
}

/// 分割後の片側（burnのDataset）
#[derive(Debug, Clone, Default)]
pub struct GlyphSplit {
    items: Vec<GlyphItem>,
}

impl GlyphSplit {
    pub fn items(&self) -> &[GlyphItem] {
        &self.items
    }
}

impl Dataset<GlyphItem> for GlyphSplit {
    fn get(&self, index: usize) -> Option<GlyphItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// `[batch, 1, size, size]` の画像テンソルと正解ラベルにまとめるバッチャー
#[derive(Clone, Debug)]
pub struct GlyphBatcher {
    glyph_size: usize,
}

impl GlyphBatcher {
    pub fn new(glyph_size: usize) -> Self {
        Self { glyph_size }
    }
}

#[derive(Clone, Debug)]
pub struct GlyphBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, GlyphItem, GlyphBatch<B>> for GlyphBatcher {
    fn batch(&self, items: Vec<GlyphItem>, device: &B::Device) -> GlyphBatch<B> {
        let batch_size = items.len();
        let size = self.glyph_size;

        let mut pixels = Vec::with_capacity(batch_size * size * size);
        let mut targets = Vec::with_capacity(batch_size);
        for item in items {
            pixels.extend_from_slice(&item.pixels);
            targets.push(item.label as i64);
        }

        // 1チャンネルならHWCとCHWのメモリ配置は同じ
        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), device)
            .reshape([batch_size, 1, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device);

        GlyphBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::preprocess::GLYPH_SIZE;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{GrayImage, Luma};

    fn write_glyph(path: &Path, shade: u8) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        GrayImage::from_fn(12, 18, |x, _| Luma([shade.wrapping_add(x as u8)]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn loads_labels_from_parent_folders_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_glyph(&root.join("B/2.png"), 10);
        write_glyph(&root.join("A/1.png"), 20);
        write_glyph(&root.join("B/1.PNG"), 30);
        write_glyph(&root.join("7/nested/x.png"), 40);
        fs::write(root.join("A/notes.txt"), "not a glyph").unwrap();

        let listed = list_images(root).unwrap();
        let names: Vec<_> = listed
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, ["7/nested/x.png", "A/1.png", "B/1.PNG", "B/2.png"]);

        let dataset = GlyphDataset::from_directory(root, GLYPH_SIZE).unwrap();
        let labels: Vec<_> = dataset.labels().collect();
        assert_eq!(labels, ["nested", "A", "B", "B"]);
        assert!(dataset.samples().iter().all(|s| s.pixels.shape() == [20, 20, 1]));
        assert_eq!(dataset.class_counts()["B"], 2);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GlyphDataset::from_directory(&dir.path().join("nope"), GLYPH_SIZE).unwrap_err();
        assert!(matches!(err, GlyphError::MissingDirectory(_)));
    }

    #[test]
    fn folder_without_images_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("A")).unwrap();
        fs::write(dir.path().join("A/readme.md"), "empty").unwrap();
        let err = GlyphDataset::from_directory(dir.path(), GLYPH_SIZE).unwrap_err();
        assert!(matches!(err, GlyphError::EmptyDataset(_)));
    }

    #[test]
    fn corrupt_image_aborts_loading() {
        let dir = tempfile::tempdir().unwrap();
        write_glyph(&dir.path().join("A/ok.png"), 0);
        fs::write(dir.path().join("A/bad.png"), [0u8, 1, 2, 3]).unwrap();
        let err = GlyphDataset::from_directory(dir.path(), GLYPH_SIZE).unwrap_err();
        assert!(matches!(err, GlyphError::Decode { .. }));
    }

    #[test]
    fn split_is_deterministic_and_uses_a_quarter_for_test() {
        let items: Vec<u32> = (0..20).collect();
        let (train_a, test_a) = train_test_split(items.clone(), 0.25, 0);
        let (train_b, test_b) = train_test_split(items.clone(), 0.25, 0);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!((train_a.len(), test_a.len()), (15, 5));

        let mut all: Vec<_> = train_a.iter().chain(&test_a).copied().collect();
        all.sort();
        assert_eq!(all, items);

        let (_, test_c) = train_test_split(items, 0.25, 7);
        assert_ne!(test_a, test_c);
    }

    #[test]
    fn split_rounds_the_test_side_up() {
        let (train, test) = train_test_split((0..10).collect::<Vec<_>>(), 0.25, 0);
        assert_eq!((train.len(), test.len()), (7, 3));
        let (train, test) = train_test_split(vec![1], 0.25, 0);
        assert_eq!((train.len(), test.len()), (0, 1));
    }

    #[test]
    fn encode_maps_labels_to_sorted_indices() {
        let pixels = |v: f32| {
            let image = image::DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([(v * 255.0) as u8])));
            crate::ml::preprocess::preprocess_image(&image, 4)
        };
        let dataset = GlyphDataset::from_samples(vec![
            GlyphSample { pixels: pixels(0.0), label: "Q".into() },
            GlyphSample { pixels: pixels(1.0), label: "C".into() },
        ]);
        let lb = LabelBinarizer::fit(dataset.labels()).unwrap();
        let split = dataset.encode(&lb).unwrap();

        assert_eq!(split.len(), 2);
        assert_eq!(split.get(0).unwrap().label, 1);
        assert_eq!(split.get(1).unwrap().label, 0);
        assert!(split.get(2).is_none());
    }

    #[test]
    fn batcher_produces_nchw_images() {
        let items = vec![
            GlyphItem { pixels: vec![0.5; 400], label: 3 },
            GlyphItem { pixels: vec![0.25; 400], label: 0 },
        ];
        let batch: GlyphBatch<NdArray> =
            GlyphBatcher::new(GLYPH_SIZE).batch(items, &NdArrayDevice::Cpu);

        assert_eq!(batch.images.dims(), [2, 1, 20, 20]);
        assert_eq!(batch.targets.dims(), [2]);
        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![3, 0]);
    }
}
