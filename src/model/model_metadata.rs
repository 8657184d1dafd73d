//! モデルメタデータの定義
//!
//! 保存されたモデルを復元・推論するために必要な情報（クラスラベル、
//! ネットワーク構成、入力スキーマ、学習設定）を保持します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::ColumnInfo;
use crate::ml::ModelDescriptor;
use crate::pipeline::TrainingSummary;

/// メタデータ形式のバージョン
pub const METADATA_VERSION: u32 = 1;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: u32,

    /// キー順のクラスラベル
    /// 例: ["cat", "dog"]
    pub class_labels: Vec<String>,

    /// ネットワーク構成
    pub model: ModelDescriptor,

    /// 画像バイト列の入力列名
    pub feature_column: String,

    /// 予測ラベルの出力列名
    pub predicted_label_column: String,

    /// 学習時の入力スキーマ
    pub input_schema: Vec<ColumnInfo>,

    /// 学習設定
    pub training: TrainingSummary,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        model: ModelDescriptor,
        feature_column: String,
        predicted_label_column: String,
        input_schema: Vec<ColumnInfo>,
        training: TrainingSummary,
    ) -> Self {
        Self {
            version: METADATA_VERSION,
            class_labels,
            model,
            feature_column,
            predicted_label_column,
            input_schema,
            training,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        let metadata: Self =
            serde_json::from_str(json).context("Failed to deserialize metadata from JSON")?;
        if metadata.version != METADATA_VERSION {
            anyhow::bail!(
                "未対応のメタデータバージョンです: {} (対応: {})",
                metadata.version,
                METADATA_VERSION
            );
        }
        if metadata.class_labels.len() != metadata.model.num_classes {
            anyhow::bail!(
                "クラスラベル数 {} とモデルのクラス数 {} が一致しません",
                metadata.class_labels.len(),
                metadata.model.num_classes
            );
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnKind;
    use crate::ml::Architecture;

    fn sample_metadata() -> ModelMetadata {
        ModelMetadata::new(
            vec!["cat".to_string(), "dog".to_string()],
            ModelDescriptor {
                architecture: Architecture::Small,
                num_classes: 2,
                image_size: 32,
                dropout: 0.5,
            },
            "Image".to_string(),
            "PredictedLabel".to_string(),
            vec![ColumnInfo {
                name: "Image".to_string(),
                kind: ColumnKind::Bytes,
            }],
            TrainingSummary {
                backend: "stub".to_string(),
                num_epochs: 3,
                batch_size: 4,
                learning_rate: 0.001,
                seed: 7,
                train_rows: 16,
            },
        )
    }

    #[test]
    fn test_json_roundtrip() {
        let metadata = sample_metadata();
        let json = metadata.to_json_string().unwrap();
        assert!(json.contains("\"architecture\": \"small\""));
        assert_eq!(ModelMetadata::from_json_string(&json).unwrap(), metadata);
    }

    #[test]
    fn test_rejects_inconsistent_class_count() {
        let mut metadata = sample_metadata();
        metadata.model.num_classes = 3;
        let json = metadata.to_json_string().unwrap();
        assert!(ModelMetadata::from_json_string(&json).is_err());
    }
}
