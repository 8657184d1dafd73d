//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、ネットワーク構成、入力スキーマなど）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::dataset::ColumnInfo;
use crate::ml::{ClassifierBackend, PretrainedWeights};
use crate::model::model_metadata::ModelMetadata;
use crate::pipeline::FittedPipeline;

/// 出力ディレクトリ内のモデルファイル名
pub const MODEL_FILE_NAME: &str = "model.tar.gz";

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 学習済みパイプラインを `<dir>/model.tar.gz` に保存し、そのパスを返す
pub fn save_model(dir: &Path, pipeline: &FittedPipeline, schema: &[ColumnInfo]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {:?}", dir))?;

    let metadata = ModelMetadata::new(
        pipeline.class_names().to_vec(),
        pipeline.descriptor().clone(),
        pipeline.feature_column().to_string(),
        pipeline.predicted_label_column().to_string(),
        schema.to_vec(),
        pipeline.summary().clone(),
    );
    let model_binary = pipeline
        .classifier()
        .to_bytes()
        .context("Failed to serialize model weights")?;

    let path = dir.join(MODEL_FILE_NAME);
    save_model_with_metadata(&path, &metadata, &model_binary)?;
    info!("モデルを保存しました: {} ({} bytes)", path.display(), model_binary.len());
    Ok(path)
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 1つのtar.gzファイルに以下を含む：
/// - metadata.json : メタデータ
/// - model.bin : モデルの重み
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<()> {
    // output_pathがすでに.gzで終わっている場合はそのまま、そうでなければ拡張子を追加
    let tar_gz_path = if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    };

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzipストリームまで確実に書き切る
    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// metadata.json と model.bin を読み出す（見つからなければ None）
fn read_entries(tar_gz_path: &Path) -> Result<(Option<String>, Option<Vec<u8>>)> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut json_opt: Option<String> = None;
    let mut binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                json_opt = Some(json_str);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    Ok((json_opt, binary_opt))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    match read_entries(tar_gz_path)? {
        (Some(json_str), _) => ModelMetadata::from_json_string(&json_str),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
    }
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    read_entries(tar_gz_path)?
        .1
        .ok_or_else(|| anyhow::anyhow!("model.bin not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_entries(tar_gz_path)? {
        (Some(json_str), Some(binary)) => Ok((ModelMetadata::from_json_string(&json_str)?, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// 保存済みモデルを転移学習の初期値として読み込む
pub fn load_pretrained(tar_gz_path: &Path) -> Result<PretrainedWeights> {
    let (metadata, weights) = load_model_with_metadata(tar_gz_path)
        .with_context(|| format!("事前学習モデルの読み込みに失敗しました: {:?}", tar_gz_path))?;
    Ok(PretrainedWeights {
        descriptor: metadata.model,
        weights,
    })
}

impl FittedPipeline {
    /// 保存済みモデルから学習済みパイプラインを復元する
    pub fn load(tar_gz_path: &Path, backend: &dyn ClassifierBackend) -> Result<Self> {
        let (metadata, weights) = load_model_with_metadata(tar_gz_path)?;
        let classifier = backend
            .load(&metadata.model, &weights)
            .with_context(|| format!("Failed to restore model weights: {:?}", tar_gz_path))?;
        info!(
            "モデルを読み込みました: {} クラス ({})",
            metadata.class_labels.len(),
            metadata.class_labels.join(", ")
        );
        Ok(FittedPipeline::new(
            classifier,
            metadata.class_labels,
            &metadata.feature_column,
            &metadata.predicted_label_column,
            metadata.training,
        ))
    }
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラスラベル: {}", metadata.class_labels.join(", "));
    println!(
        "ネットワーク構成: {} (入力サイズ: {}x{}, ドロップアウト率: {})",
        metadata.model.architecture,
        metadata.model.image_size,
        metadata.model.image_size,
        metadata.model.dropout
    );
    println!("入力スキーマ:");
    for column in &metadata.input_schema {
        println!("  {}: {:?}", column.name, column.kind);
    }
    println!("入力列: {} / 出力列: {}", metadata.feature_column, metadata.predicted_label_column);
    println!(
        "学習設定: バックエンド {}, エポック数 {}, バッチサイズ {}, 学習率 {}, シード {}",
        metadata.training.backend,
        metadata.training.num_epochs,
        metadata.training.batch_size,
        metadata.training.learning_rate,
        metadata.training.seed
    );
    println!("学習データ件数: {}", metadata.training.train_rows);
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}
