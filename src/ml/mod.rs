//! 機械学習モジュール

pub mod dataset;
pub mod inference;
pub mod label_binarizer;
pub mod ml_model;
pub mod preprocess;
pub mod training;

pub use dataset::{
    list_images, train_test_split, GlyphBatch, GlyphBatcher, GlyphDataset, GlyphItem,
    GlyphSample, GlyphSplit,
};
pub use inference::InferenceEngine;
pub use label_binarizer::LabelBinarizer;
pub use ml_model::{GlyphClassifier, ModelConfig, NUM_CLASSES};
pub use preprocess::{load_glyph, preprocess_image, resize_to_fit, GlyphPixels, GLYPH_SIZE};
pub use training::{evaluate, train_model, TrainingReport};
