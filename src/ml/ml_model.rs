//! 文字分類CNNモデル
//!
//! 畳み込み+最大プーリングを2段重ね、全結合の隠れ層と固定幅の出力層を持ちます。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

use crate::error::GlyphError;

/// 出力クラス数（データのラベル数に関係なく固定）
pub const NUM_CLASSES: usize = 32;

/// モデル設定（重みと一緒に保存して再構築に使う）
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    #[config(default = 32)]
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 20)]
    pub glyph_size: usize,
    #[config(default = 20)]
    pub conv1_filters: usize,
    #[config(default = 50)]
    pub conv2_filters: usize,
    #[config(default = 5)]
    pub kernel_size: usize,
    #[config(default = 500)]
    pub hidden_units: usize,
}

impl ModelConfig {
    /// 2回のプーリング後の特徴マップサイズ
    ///
    /// 畳み込みはsameパディングでサイズを保ち、2x2プーリングごとに半分（切り捨て）。
    pub fn feature_map_size(&self) -> usize {
        self.glyph_size / 2 / 2
    }

    /// 隠れ層に入力する平坦化後の特徴数
    pub fn flattened_features(&self) -> usize {
        let side = self.feature_map_size();
        self.conv2_filters * side * side
    }

    pub fn validate(&self) -> Result<(), GlyphError> {
        if self.feature_map_size() == 0 {
            return Err(GlyphError::GlyphTooSmall(self.glyph_size));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GlyphClassifier<B> {
        let kernel = [self.kernel_size, self.kernel_size];

        GlyphClassifier {
            conv1: Conv2dConfig::new([1, self.conv1_filters], kernel)
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv2: Conv2dConfig::new([self.conv1_filters, self.conv2_filters], kernel)
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(self.flattened_features(), self.hidden_units).init(device),
            fc2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 文字分類CNN（`[batch, 1, 20, 20]` -> クラススコア）
#[derive(Module, Debug)]
pub struct GlyphClassifier<B: Backend> {
    conv1: Conv2d<B>, // 1 -> 20
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // 20 -> 50
    pool2: MaxPool2d,
    fc1: Linear<B>, // 1250 -> 500
    fc2: Linear<B>, // 500 -> 32
    activation: Relu,
}

impl<B: Backend> GlyphClassifier<B> {
    /// ロジット `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// softmax確率 `[batch, num_classes]`
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播とクラス番号に対する交差エントロピー
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}
