//! 学習パイプラインの構築と学習済みパイプライン
//!
//! `PipelineBuilder` で不変の学習設定を組み立て、`TrainingPipeline::fit` で
//! バックエンドに学習を委譲します。学習済みパイプラインは予測キーを
//! 文字列ラベルへ戻す後処理を連結した状態で返されます。

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::dataset::{
    Column, DataTable, IMAGE_COLUMN, LABEL_KEY_COLUMN, PREDICTED_KEY_COLUMN,
    PREDICTED_LABEL_COLUMN, SCORE_COLUMN,
};
use crate::ml::{
    Architecture, ClassifierBackend, LabeledImage, ModelDescriptor, PretrainedWeights,
    TrainedClassifier, TrainerOptions, TrainingProgress,
};
use crate::transforms::{KeyToValue, Transformer};

/// エポックごとに呼び出される進捗コールバック
pub type MetricsCallback = Box<dyn Fn(&TrainingProgress)>;

/// 画像分類の学習設定
pub struct ImageClassificationOptions {
    /// 画像バイト列の列名
    pub feature_column: String,
    /// 正解キーの列名
    pub label_column: String,
    /// 予測ラベル（文字列）の出力列名
    pub predicted_label_column: String,
    pub architecture: Architecture,
    /// 未指定の場合はアーキテクチャ既定の入力サイズ
    pub image_size: Option<usize>,
    pub dropout: f64,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    /// 検証データ（通常はテスト分割）
    pub validation_set: Option<DataTable>,
    /// 検証データが無い場合に学習データで検証する
    pub test_on_train: bool,
    pub metrics_callback: Option<MetricsCallback>,
    pub pretrained: Option<PretrainedWeights>,
}

impl Default for ImageClassificationOptions {
    fn default() -> Self {
        Self {
            feature_column: IMAGE_COLUMN.to_string(),
            label_column: LABEL_KEY_COLUMN.to_string(),
            predicted_label_column: PREDICTED_LABEL_COLUMN.to_string(),
            architecture: Architecture::default(),
            image_size: None,
            dropout: 0.5,
            num_epochs: 50,
            batch_size: 8,
            learning_rate: 1e-3,
            seed: 42,
            validation_set: None,
            test_on_train: true,
            metrics_callback: None,
            pretrained: None,
        }
    }
}

impl ImageClassificationOptions {
    pub fn image_size(&self) -> usize {
        self.image_size
            .unwrap_or_else(|| self.architecture.default_image_size())
    }
}

/// 学習パイプラインのビルダー
pub struct PipelineBuilder {
    class_names: Vec<String>,
    options: ImageClassificationOptions,
}

impl PipelineBuilder {
    /// `class_names` はラベルキーの語彙（キー順）
    pub fn new(class_names: Vec<String>) -> Self {
        Self {
            class_names,
            options: ImageClassificationOptions::default(),
        }
    }

    pub fn feature_column(mut self, name: &str) -> Self {
        self.options.feature_column = name.to_string();
        self
    }

    pub fn label_column(mut self, name: &str) -> Self {
        self.options.label_column = name.to_string();
        self
    }

    pub fn predicted_label_column(mut self, name: &str) -> Self {
        self.options.predicted_label_column = name.to_string();
        self
    }

    pub fn architecture(mut self, architecture: Architecture) -> Self {
        self.options.architecture = architecture;
        self
    }

    pub fn image_size(mut self, image_size: Option<usize>) -> Self {
        self.options.image_size = image_size;
        self
    }

    pub fn dropout(mut self, dropout: f64) -> Self {
        self.options.dropout = dropout;
        self
    }

    pub fn epochs(mut self, num_epochs: usize) -> Self {
        self.options.num_epochs = num_epochs;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.options.learning_rate = learning_rate;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.options.seed = seed;
        self
    }

    pub fn validation_set(mut self, table: DataTable) -> Self {
        self.options.validation_set = Some(table);
        self
    }

    pub fn test_on_train(mut self, enabled: bool) -> Self {
        self.options.test_on_train = enabled;
        self
    }

    pub fn metrics_callback(mut self, callback: impl Fn(&TrainingProgress) + 'static) -> Self {
        self.options.metrics_callback = Some(Box::new(callback));
        self
    }

    pub fn pretrained(mut self, weights: Option<PretrainedWeights>) -> Self {
        self.options.pretrained = weights;
        self
    }

    pub fn build(self, backend: &dyn ClassifierBackend) -> Result<TrainingPipeline<'_>> {
        if self.class_names.len() < 2 {
            anyhow::bail!(
                "分類には2クラス以上が必要です (検出: {})",
                self.class_names.len()
            );
        }
        if self.options.batch_size == 0 || self.options.num_epochs == 0 {
            anyhow::bail!("エポック数とバッチサイズは1以上を指定してください");
        }
        Ok(TrainingPipeline {
            class_names: self.class_names,
            options: self.options,
            backend,
        })
    }
}

/// 構築済みの学習パイプライン
pub struct TrainingPipeline<'a> {
    class_names: Vec<String>,
    options: ImageClassificationOptions,
    backend: &'a dyn ClassifierBackend,
}

impl TrainingPipeline<'_> {
    pub fn options(&self) -> &ImageClassificationOptions {
        &self.options
    }

    fn trainer_options(&self) -> TrainerOptions {
        TrainerOptions {
            architecture: self.options.architecture,
            num_classes: self.class_names.len(),
            image_size: self.options.image_size(),
            dropout: self.options.dropout,
            num_epochs: self.options.num_epochs,
            batch_size: self.options.batch_size,
            learning_rate: self.options.learning_rate,
            seed: self.options.seed,
            pretrained: self.options.pretrained.clone(),
        }
    }

    /// 学習データで学習し、学習済みパイプラインを返す
    pub fn fit(&self, train: &DataTable) -> Result<FittedPipeline> {
        let train_rows = labeled_images(train, &self.options, self.class_names.len())
            .context("学習データの列が不正です")?;

        // 空の検証データは未指定として扱う
        let validation_set = self
            .options
            .validation_set
            .as_ref()
            .filter(|table| !table.is_empty());
        if self.options.validation_set.is_some() && validation_set.is_none() {
            warn!("検証データが空のため、検証データ未指定として学習します");
        }

        let validation_rows = match validation_set {
            Some(table) => Some(
                labeled_images(table, &self.options, self.class_names.len())
                    .context("検証データの列が不正です")?,
            ),
            None if self.options.test_on_train => Some(train_rows.clone()),
            None => None,
        };

        let trainer_options = self.trainer_options();
        info!(
            "学習設定: {} ({}x{}), {} クラス, エポック数: {}, バッチサイズ: {}, 学習率: {}",
            trainer_options.architecture,
            trainer_options.image_size,
            trainer_options.image_size,
            trainer_options.num_classes,
            trainer_options.num_epochs,
            trainer_options.batch_size,
            trainer_options.learning_rate
        );

        let no_callback = |_: &TrainingProgress| {};
        let callback: &dyn Fn(&TrainingProgress) = match &self.options.metrics_callback {
            Some(callback) => callback.as_ref(),
            None => &no_callback,
        };

        let classifier = self.backend.fit(
            &trainer_options,
            &train_rows,
            validation_rows.as_deref(),
            callback,
        )?;

        Ok(FittedPipeline::new(
            classifier,
            self.class_names.clone(),
            &self.options.feature_column,
            &self.options.predicted_label_column,
            TrainingSummary {
                backend: self.backend.name().to_string(),
                num_epochs: trainer_options.num_epochs,
                batch_size: trainer_options.batch_size,
                learning_rate: trainer_options.learning_rate,
                seed: trainer_options.seed,
                train_rows: train.len(),
            },
        ))
    }
}

fn labeled_images<'t>(
    table: &'t DataTable,
    options: &ImageClassificationOptions,
    num_classes: usize,
) -> Result<Vec<LabeledImage<'t>>> {
    let images = table.bytes_column(&options.feature_column)?;
    let (keys, cardinality) = table.key_column(&options.label_column)?;
    if cardinality as usize != num_classes {
        anyhow::bail!(
            "ラベル列 '{}' の語彙サイズ {} がクラス数 {} と一致しません",
            options.label_column,
            cardinality,
            num_classes
        );
    }
    Ok(images
        .iter()
        .zip(keys)
        .map(|(bytes, &key)| LabeledImage { bytes, key })
        .collect())
}

/// 学習時の設定の記録（メタデータとして保存）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub backend: String,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub train_rows: usize,
}

/// 学習済みパイプライン（分類器 + キー→ラベル変換）
pub struct FittedPipeline {
    classifier: Box<dyn TrainedClassifier>,
    key_to_value: KeyToValue,
    feature_column: String,
    predicted_label_column: String,
    summary: TrainingSummary,
}

impl FittedPipeline {
    pub fn new(
        classifier: Box<dyn TrainedClassifier>,
        class_names: Vec<String>,
        feature_column: &str,
        predicted_label_column: &str,
        summary: TrainingSummary,
    ) -> Self {
        Self {
            classifier,
            key_to_value: KeyToValue::new(PREDICTED_KEY_COLUMN, predicted_label_column, class_names),
            feature_column: feature_column.to_string(),
            predicted_label_column: predicted_label_column.to_string(),
            summary,
        }
    }

    pub fn class_names(&self) -> &[String] {
        self.key_to_value.vocabulary()
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        self.classifier.descriptor()
    }

    pub fn feature_column(&self) -> &str {
        &self.feature_column
    }

    pub fn predicted_label_column(&self) -> &str {
        &self.predicted_label_column
    }

    pub fn summary(&self) -> &TrainingSummary {
        &self.summary
    }

    pub fn classifier(&self) -> &dyn TrainedClassifier {
        self.classifier.as_ref()
    }

    /// 予測キー・スコア・予測ラベル列を追加した新しいテーブルを返す
    pub fn transform(&self, input: &DataTable) -> Result<DataTable> {
        let images: Vec<&[u8]> = input
            .bytes_column(&self.feature_column)?
            .iter()
            .map(|bytes| bytes.as_ref())
            .collect();

        let predictions = self.classifier.predict(&images)?;
        let cardinality = self.class_names().len() as u32;
        let (keys, scores): (Vec<u32>, Vec<Vec<f32>>) =
            predictions.into_iter().map(|p| (p.key, p.scores)).unzip();

        let table = input
            .with_column(PREDICTED_KEY_COLUMN, Column::Key { keys, cardinality })?
            .with_column(SCORE_COLUMN, Column::Scores(scores))?;
        Ok(self.key_to_value.transform(&table)?)
    }
}
