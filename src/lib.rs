//! CAPTCHA文字分類器の学習ライブラリ
//!
//! ラベル付きの1文字画像を読み込んで小さなCNNを学習し、重みと予測の復号に
//! 必要なラベルエンコーダーを書き出します。

pub mod error;
pub mod ml;
pub mod model;

pub use error::{GlyphError, Result};
pub use ml::{train_model, InferenceEngine, LabelBinarizer, TrainingReport};
pub use model::{AppConfig, DeviceType};
