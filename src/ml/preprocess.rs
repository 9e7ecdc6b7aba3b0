//! 文字画像の前処理
//!
//! 任意サイズの画像を分類器が受け取る `[size, size, 1]` の配列に変換します。
//! 同じ画像からは常に同じ値が得られます。

use std::path::Path;

use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, Luma};

use crate::error::{GlyphError, Result};

/// 画像サイズ
pub const GLYPH_SIZE: usize = 20;

/// チャンネル数（グレースケール）
pub const GLYPH_CHANNELS: usize = 1;

/// 正規化済みの1文字分の画素（HWC順）
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphPixels {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl GlyphPixels {
    /// `[height, width, channels]`
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, GLYPH_CHANNELS]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// 縦横比を保ったまま `width x height` に収める
///
/// 長辺を目標サイズに合わせ、短辺は端の画素を複製して中央寄せでパディングする。
/// 丸めで残った1画素分のずれは最後のリサイズで吸収する。
pub fn resize_to_fit(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return GrayImage::new(width, height);
    }

    let resized = if w > h {
        let scaled_h = scale_side(h, width, w);
        imageops::resize(image, width, scaled_h, FilterType::Triangle)
    } else {
        let scaled_w = scale_side(w, height, h);
        imageops::resize(image, scaled_w, height, FilterType::Triangle)
    };

    let (rw, rh) = resized.dimensions();
    let pad_w = width.saturating_sub(rw) / 2;
    let pad_h = height.saturating_sub(rh) / 2;

    let padded = GrayImage::from_fn(rw + 2 * pad_w, rh + 2 * pad_h, |x, y| {
        let sx = x.saturating_sub(pad_w).min(rw - 1);
        let sy = y.saturating_sub(pad_h).min(rh - 1);
        *resized.get_pixel(sx, sy)
    });

    if padded.dimensions() == (width, height) {
        padded
    } else {
        imageops::resize(&padded, width, height, FilterType::Triangle)
    }
}

// side * target / reference を四捨五入（最低1画素）
fn scale_side(side: u32, target: u32, reference: u32) -> u32 {
    let scaled = (side as f64 * target as f64 / reference as f64).round() as u32;
    scaled.max(1)
}

/// グレースケール化して `size x size` に収め、`[0, 1]` に正規化
pub fn preprocess_image(image: &DynamicImage, size: usize) -> GlyphPixels {
    let gray = image.to_luma8();
    let fitted = resize_to_fit(&gray, size as u32, size as u32);

    let data = fitted
        .pixels()
        .map(|Luma([value])| *value as f32 / 255.0)
        .collect();

    GlyphPixels {
        data,
        height: size,
        width: size,
    }
}

/// 画像を読み込んで前処理
pub fn load_glyph(path: &Path, size: usize) -> Result<GlyphPixels> {
    let image = image::open(path).map_err(|source| GlyphError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(preprocess_image(&image, size))
}
