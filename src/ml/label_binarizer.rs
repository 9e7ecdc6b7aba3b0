//! ラベルとone-hotの相互変換
//!
//! どの出力列がどの文字に対応するかはこのエンコーダーだけが決めます。
//! モデルと一緒に保存し、後で予測結果を文字に戻すのに使います。

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GlyphError, Result};

/// ラベルをone-hot列に対応付けるエンコーダー
///
/// クラスは常にソート済みなので、同じ語彙からは同じ列順・同じ保存内容になる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelBinarizer {
    classes: Vec<String>,
}

impl LabelBinarizer {
    /// 変換対象となる全ラベルからクラスを決定
    pub fn fit<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classes: BTreeSet<String> = labels
            .into_iter()
            .map(|label| label.as_ref().to_string())
            .collect();

        if classes.is_empty() {
            return Err(GlyphError::NoLabels);
        }

        Ok(Self {
            classes: classes.into_iter().collect(),
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// `label` の列番号
    pub fn index_of(&self, label: &str) -> Result<usize> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(label))
            .map_err(|_| GlyphError::UnknownLabel(label.to_string()))
    }

    pub fn label_of(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    /// 1ラベル分のone-hotベクトル
    pub fn encode(&self, label: &str) -> Result<Vec<f32>> {
        let index = self.index_of(label)?;
        let mut row = vec![0.0; self.classes.len()];
        row[index] = 1.0;
        Ok(row)
    }

    /// 全ラベルのone-hot行（入力順）
    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<Vec<f32>>> {
        labels.iter().map(|label| self.encode(label.as_ref())).collect()
    }

    /// one-hot（またはスコア）行をラベルに戻す（各行の最大列を採用）
    pub fn inverse_transform(&self, rows: &[Vec<f32>]) -> Result<Vec<String>> {
        rows.iter()
            .map(|row| {
                if row.len() != self.classes.len() {
                    return Err(GlyphError::WidthMismatch {
                        expected: self.classes.len(),
                        actual: row.len(),
                    });
                }
                Ok(self.decode(row).unwrap_or_default().to_string())
            })
            .collect()
    }

    /// 既知クラスの中で最もスコアの高いラベル
    ///
    /// ネットワークの出力は常に32列なので `scores` は語彙より長くてよい。
    /// 最後のクラスより後ろの列は無視する。
    pub fn decode(&self, scores: &[f32]) -> Option<&str> {
        let known = scores.len().min(self.classes.len());
        scores[..known]
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, &score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((i, score)),
            })
            .and_then(|(index, _)| self.label_of(index))
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_string(json: &str) -> Result<Self> {
        let binarizer: Self = serde_json::from_str(json)?;
        binarizer.check_classes()?;
        Ok(binarizer)
    }

    // index_of は二分探索なので、昇順かつ重複なしでなければならない
    fn check_classes(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(GlyphError::NoLabels);
        }
        if let Some(pair) = self.classes.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(GlyphError::MalformedEncoder {
                previous: pair[0].clone(),
                next: pair[1].clone(),
            });
        }
        Ok(())
    }

    /// 整形済みJSONで保存（既存ファイルは上書き）
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| GlyphError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, self.to_json_string()?).map_err(|source| GlyphError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| GlyphError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_string(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_are_sorted_and_unique() {
        let lb = LabelBinarizer::fit(["Z", "3", "A", "Z", "A"]).unwrap();
        assert_eq!(lb.classes(), ["3", "A", "Z"]);
        assert_eq!(lb.num_classes(), 3);
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let labels = ["2", "3", "4", "A", "B", "Q", "Y", "Z"];
        let lb = LabelBinarizer::fit(labels).unwrap();

        let rows = lb.transform(&labels).unwrap();
        for row in &rows {
            assert_eq!(row.len(), labels.len());
            assert_eq!(row.iter().filter(|v| **v == 1.0).count(), 1);
            assert_eq!(row.iter().sum::<f32>(), 1.0);
        }
        assert_eq!(lb.inverse_transform(&rows).unwrap(), labels);
    }

    #[test]
    fn two_classes_keep_two_columns() {
        let lb = LabelBinarizer::fit(["B", "A"]).unwrap();
        assert_eq!(lb.encode("A").unwrap(), vec![1.0, 0.0]);
        assert_eq!(lb.encode("B").unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn unknown_label_is_rejected() {
        let lb = LabelBinarizer::fit(["A", "B"]).unwrap();
        assert!(matches!(lb.encode("C"), Err(GlyphError::UnknownLabel(l)) if l == "C"));
    }

    #[test]
    fn empty_vocabulary_is_rejected() {
        let empty: [&str; 0] = [];
        assert!(matches!(LabelBinarizer::fit(empty), Err(GlyphError::NoLabels)));
    }

    #[test]
    fn decode_ignores_columns_past_the_vocabulary() {
        let lb = LabelBinarizer::fit(["A", "B"]).unwrap();
        let mut scores = vec![0.0; 32];
        scores[1] = 0.2;
        scores[0] = 0.1;
        scores[17] = 0.7;
        assert_eq!(lb.decode(&scores), Some("B"));
        assert_eq!(lb.decode(&[]), None);
    }

    #[test]
    fn inverse_transform_checks_width() {
        let lb = LabelBinarizer::fit(["A", "B", "C"]).unwrap();
        let err = lb.inverse_transform(&[vec![1.0, 0.0]]).unwrap_err();
        assert!(matches!(err, GlyphError::WidthMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn saved_bytes_are_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("nested/second.json");

        LabelBinarizer::fit(["b", "a", "c"]).unwrap().save(&first).unwrap();
        LabelBinarizer::fit(["c", "b", "a", "a"]).unwrap().save(&second).unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
        let loaded = LabelBinarizer::load(&first).unwrap();
        assert_eq!(loaded.classes(), ["a", "b", "c"]);
    }

    #[test]
    fn hand_edited_encoder_must_stay_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_labels.json");

        std::fs::write(&path, r#"{"classes": ["B", "A"]}"#).unwrap();
        let err = LabelBinarizer::load(&path).unwrap_err();
        assert!(matches!(err, GlyphError::MalformedEncoder { ref previous, ref next } if previous == "B" && next == "A"));

        std::fs::write(&path, r#"{"classes": ["A", "A"]}"#).unwrap();
        assert!(matches!(LabelBinarizer::load(&path), Err(GlyphError::MalformedEncoder { .. })));

        std::fs::write(&path, r#"{"classes": []}"#).unwrap();
        assert!(matches!(LabelBinarizer::load(&path), Err(GlyphError::NoLabels)));

        std::fs::write(&path, r#"{"classes": ["A", "B"]}"#).unwrap();
        assert_eq!(LabelBinarizer::load(&path).unwrap().index_of("B").unwrap(), 1);
    }
}
