//! モデルの保存・読み込み
//!
//! 学習済みモデルは1つのtar.gzにまとめて保存します:
//! - `metadata.json` - 構成と学習情報
//! - `model.bin`     - 重み（burnのフル精度バイナリレコード）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use tracing::info;

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const WEIGHTS_ENTRY: &str = "model.bin";

/// 実際に書き込むパス
///
/// `output_path` が `.gz` で終わっていればそのまま、それ以外は `.tar.gz` を付与。
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

/// メタデータと重みを1つのtar.gzに保存（既存ファイルは上書き）
///
/// 書き込んだパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    if let Some(parent) = tar_gz_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json.as_bytes())?;
    append_entry(&mut tar_builder, WEIGHTS_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    info!(
        "Wrote {} ({} bytes of weights)",
        tar_gz_path.display(),
        model_binary.len()
    );
    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// 指定したエントリを `names` の順で取り出す
fn read_entries(tar_gz_path: &Path, names: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    let mut found = vec![None; names.len()];
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();

        if let Some(slot) = names.iter().position(|name| *name == path) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found[slot] = Some(buffer);
        }
    }
    Ok(found)
}

fn metadata_from_bytes(bytes: Option<Vec<u8>>) -> Result<ModelMetadata> {
    let bytes = bytes.ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY))?;
    let json = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json)
}

fn weights_from_bytes(bytes: Option<Vec<u8>>) -> Result<Vec<u8>> {
    bytes.ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", WEIGHTS_ENTRY))
}

pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY])?;
    metadata_from_bytes(entries.remove(0))
}

pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let mut entries = read_entries(tar_gz_path, &[WEIGHTS_ENTRY])?;
    weights_from_bytes(entries.remove(0))
}

/// メタデータと重みを1回の走査で読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY, WEIGHTS_ENTRY])?.into_iter();
    let metadata = metadata_from_bytes(entries.next().flatten())?;
    let weights = weights_from_bytes(entries.next().flatten())?;
    Ok((metadata, weights))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ml_model::ModelConfig;

    fn metadata() -> ModelMetadata {
        ModelMetadata::new(ModelConfig::new(), vec!["A".into(), "B".into()], 10, 32, 15, 5)
    }

    #[test]
    fn archive_path_appends_extension() {
        assert_eq!(archive_path(Path::new("m/captcha_model")), PathBuf::from("m/captcha_model.tar.gz"));
        assert_eq!(archive_path(Path::new("captcha_model.tar.gz")), PathBuf::from("captcha_model.tar.gz"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let weights: Vec<u8> = (0..=255).cycle().take(4096).collect();

        let path = save_model_with_metadata(&dir.path().join("out/model"), &metadata(), &weights).unwrap();
        assert!(path.ends_with("out/model.tar.gz"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);

        assert_eq!(load_model_binary(&path).unwrap(), weights);
        assert_eq!(load_metadata(&path).unwrap().class_labels, ["A", "B"]);

        let (meta, bin) = load_model_with_metadata(&path).unwrap();
        assert_eq!(meta.model.hidden_units, 500);
        assert_eq!(bin, weights);
    }

    #[test]
    fn missing_entries_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("only_weights.tar.gz");

        let mut builder = Builder::new(GzEncoder::new(File::create(&path).unwrap(), Compression::default()));
        append_entry(&mut builder, WEIGHTS_ENTRY, b"w").unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = load_metadata(&path).unwrap_err();
        assert!(err.to_string().contains("metadata.json"));
        assert!(load_model_with_metadata(&path).is_err());
        assert_eq!(load_model_binary(&path).unwrap(), b"w");
    }
}
