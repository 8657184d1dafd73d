//! CLIサブコマンドの実装
//!
//! 学習コマンドは 走査 → 読み込み/シャッフル → 実体化 → 分割 → 学習 → 評価 → 保存
//! の順に1ステップずつ実行します。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::cli::{PredictArgs, TrainArgs};
use crate::dataset::{
    class_counts, missing_classes, scan_directory, scan_directory_with_extensions,
    train_test_split, Column, DataTable, IMAGE_COLUMN, IMAGE_PATH_COLUMN, LABEL_COLUMN,
    LABEL_KEY_COLUMN, PREDICTED_KEY_COLUMN, SCORE_COLUMN,
};
use crate::evaluation::{evaluate, MulticlassMetrics};
use crate::ml::ClassifierBackend;
use crate::model::{load_pretrained, save_model, AppConfig, DeviceType};
use crate::pipeline::{FittedPipeline, PipelineBuilder};
use crate::transforms::{materialize, Estimator, LoadRawImageBytes, MapValueToKey, Transformer};

/// 学習コマンドの結果
#[derive(Debug)]
pub struct TrainingOutcome {
    pub model_path: PathBuf,
    pub class_names: Vec<String>,
    pub total_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    /// テストデータが空の場合は None
    pub metrics: Option<MulticlassMetrics>,
}

/// 1枚分の予測結果
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub image_path: String,
    pub label: String,
    pub score: f32,
}

/// 設定ファイルを読み込み、コマンドライン引数で上書きする
pub fn resolve_config(args: &TrainArgs) -> AppConfig {
    let path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default(path);

    if let Some(architecture) = args.architecture {
        config.model.architecture = architecture;
    }
    if let Some(epochs) = args.epochs {
        config.training.num_epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.training.learning_rate = learning_rate;
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }
    if let Some(test_fraction) = args.test_fraction {
        config.training.test_fraction = test_fraction;
    }
    if let Some(device) = args.device {
        config.device_type = device;
    }
    if !args.extensions.is_empty() {
        config.dataset.extensions = args.extensions.clone();
    }
    if args.no_test_on_train {
        config.training.test_on_train = false;
    }
    config
}

/// 設定された計算デバイスのバックエンドを作成
#[cfg(feature = "ml")]
pub fn create_backend(device_type: DeviceType) -> Result<Box<dyn ClassifierBackend>> {
    Ok(Box::new(crate::ml::BurnBackend::new(device_type)))
}

#[cfg(not(feature = "ml"))]
pub fn create_backend(_device_type: DeviceType) -> Result<Box<dyn ClassifierBackend>> {
    Err(anyhow::anyhow!("機械学習機能が有効化されていません"))
}

/// `train` サブコマンド
pub fn train(args: &TrainArgs) -> Result<()> {
    let config = resolve_config(args);
    config.log_summary();

    let backend = create_backend(config.device_type)?;
    let outcome = run_training(
        &args.data,
        &args.output,
        &config,
        args.pretrained.as_deref(),
        backend.as_ref(),
    )?;

    match &outcome.metrics {
        Some(metrics) => {
            println!("{}", metrics.report());
            if let Some(csv_path) = &args.metrics_csv {
                metrics
                    .write_csv(csv_path)
                    .with_context(|| format!("評価結果CSVの書き込みに失敗しました: {:?}", csv_path))?;
                info!("評価結果を書き出しました: {}", csv_path.display());
            }
        }
        None => warn!("テストデータが空のため評価をスキップしました"),
    }

    println!("モデル: {}", outcome.model_path.display());
    Ok(())
}

/// 学習から保存までを実行する
pub fn run_training(
    data_dir: &Path,
    output_dir: &Path,
    config: &AppConfig,
    pretrained: Option<&Path>,
    backend: &dyn ClassifierBackend,
) -> Result<TrainingOutcome> {
    let training = &config.training;

    // 1. 走査
    info!("学習データを走査しています: {}", data_dir.display());
    let samples = if config.dataset.extensions.is_empty() {
        scan_directory(data_dir)?
    } else {
        scan_directory_with_extensions(data_dir, &config.dataset.extensions)?
    };
    anyhow::ensure!(
        !samples.is_empty(),
        "学習データが見つかりません: {}",
        data_dir.display()
    );
    for (label, count) in class_counts(&samples) {
        info!("  {}: {} 枚", label, count);
    }

    // 2. 読み込みとシャッフル
    let table = DataTable::from_samples(&samples).shuffle(training.seed);

    // 3. キー化と画像バイトの読み込み
    let (table, key_mapping) = materialize(
        &table,
        &MapValueToKey::new(LABEL_COLUMN, LABEL_KEY_COLUMN),
        &LoadRawImageBytes::new(IMAGE_PATH_COLUMN, IMAGE_COLUMN, data_dir),
    )?;
    let class_names = key_mapping.vocabulary().to_vec();
    info!("クラス: {}", class_names.join(", "));

    // 4. 分割
    let split = train_test_split(&table, training.test_fraction, training.seed)?;
    info!(
        "データを分割しました: 学習 {} 件 / テスト {} 件",
        split.train.len(),
        split.test.len()
    );
    for label in missing_classes(&split, LABEL_COLUMN)? {
        warn!("クラス '{}' はテストデータに含まれていません", label);
    }

    let pretrained = pretrained.map(load_pretrained).transpose()?;

    // 5. 学習
    let mut builder = PipelineBuilder::new(class_names.clone())
        .feature_column(IMAGE_COLUMN)
        .label_column(LABEL_KEY_COLUMN)
        .architecture(config.model.architecture)
        .image_size(config.model.image_size)
        .dropout(config.model.dropout)
        .epochs(training.num_epochs)
        .batch_size(training.batch_size)
        .learning_rate(training.learning_rate)
        .seed(training.seed)
        .test_on_train(training.test_on_train)
        .metrics_callback(|progress| info!("{}", progress))
        .pretrained(pretrained);
    if !split.test.is_empty() {
        builder = builder.validation_set(split.test.clone());
    }
    let pipeline = builder.build(backend)?;

    info!("*** 学習を開始します ({}) ***", backend.name());
    let fitted = pipeline.fit(&split.train).context("モデルの学習に失敗しました")?;
    info!("*** 学習が完了しました ***");

    // 6. 評価
    let metrics = if split.test.is_empty() {
        None
    } else {
        let predictions = fitted.transform(&split.test)?;
        Some(evaluate(
            &predictions,
            LABEL_KEY_COLUMN,
            PREDICTED_KEY_COLUMN,
            Some(SCORE_COLUMN),
            fitted.class_names(),
        )?)
    };

    // 7. 保存
    info!("モデルを保存しています: {}", output_dir.display());
    let model_path = save_model(output_dir, &fitted, &table.schema())?;
    info!("モデルの保存が完了しました");

    Ok(TrainingOutcome {
        model_path,
        class_names,
        total_rows: table.len(),
        train_rows: split.train.len(),
        test_rows: split.test.len(),
        metrics,
    })
}

/// `predict` サブコマンド
pub fn predict(args: &PredictArgs) -> Result<()> {
    let path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let device_type = args
        .device
        .unwrap_or_else(|| AppConfig::load_or_default(path).device_type);

    let backend = create_backend(device_type)?;
    let fitted = FittedPipeline::load(&args.model, backend.as_ref())?;

    for row in predict_images(&fitted, &args.images)? {
        println!("{}\t{}\t{:.4}", row.image_path, row.label, row.score);
    }
    Ok(())
}

/// 画像ファイルを読み込んで分類する
pub fn predict_images(fitted: &FittedPipeline, images: &[PathBuf]) -> Result<Vec<PredictionRow>> {
    let paths: Vec<String> = images
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let table = DataTable::new().with_column(IMAGE_PATH_COLUMN, Column::Text(paths))?;

    let loader =
        LoadRawImageBytes::new(IMAGE_PATH_COLUMN, fitted.feature_column(), ".").fit(&table)?;
    let predictions = fitted.transform(&loader.transform(&table)?)?;

    let labels = predictions.text_column(fitted.predicted_label_column())?;
    let scores = predictions.scores_column(SCORE_COLUMN)?;
    let paths = predictions.text_column(IMAGE_PATH_COLUMN)?;

    Ok(paths
        .iter()
        .zip(labels)
        .zip(scores)
        .map(|((image_path, label), scores)| PredictionRow {
            image_path: image_path.clone(),
            label: label.clone(),
            score: scores.iter().copied().fold(0.0, f32::max),
        })
        .collect())
}

/// `init-config` サブコマンド
pub fn init_config(path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(AppConfig::default_path);
    AppConfig::default()
        .save(&path)
        .with_context(|| format!("設定ファイルの書き込みに失敗しました: {:?}", path))?;
    println!("設定ファイルを作成しました: {}", path.display());
    Ok(())
}
