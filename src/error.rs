//! エラー型
//!
//! 読み込み・前処理・ラベル変換は [`GlyphError`] を返します。学習と保存の
//! 層ではこれを `anyhow` で包んで文脈を付けます。

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GlyphError>;

#[derive(Debug, Error)]
pub enum GlyphError {
    #[error("image directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no images found under {}", .0.display())]
    EmptyDataset(PathBuf),

    #[error("label `{0}` is not known to the encoder")]
    UnknownLabel(String),

    #[error("cannot fit a label encoder without any labels")]
    NoLabels,

    #[error("label encoder classes must be sorted and unique, found `{previous}` before `{next}`")]
    MalformedEncoder { previous: String, next: String },

    #[error("one-hot row has {actual} columns, expected {expected}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("{found} classes do not fit in a {capacity}-unit output layer")]
    TooManyClasses { found: usize, capacity: usize },

    #[error("split left {train} training and {test} test samples; both must be non-empty")]
    InsufficientSamples { train: usize, test: usize },

    #[error("glyph size {0} is too small for two 2x2 pooling stages (minimum 4)")]
    GlyphTooSmall(usize),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
