//! アプリケーション設定管理モジュール
//!
//! 計算デバイスやモデル・学習設定をJSON形式で保存・読み込みします。

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::DEFAULT_TEST_FRACTION;
use crate::ml::Architecture;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// ネットワーク構成
    pub architecture: Architecture,
    /// ドロップアウト率
    pub dropout: f64,
    /// 入力画像サイズ（未指定時はアーキテクチャの既定値）
    #[serde(default)]
    pub image_size: Option<usize>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            architecture: Architecture::default(),
            dropout: 0.5,
            image_size: None,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード（シャッフル・分割・ミニバッチ順）
    pub seed: u64,
    /// テストデータの割合
    pub test_fraction: f64,
    /// 検証データが無い場合に学習データで検証する
    #[serde(default = "default_true")]
    pub test_on_train: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 50,
            batch_size: 8,
            learning_rate: 1e-3,
            seed: 42,
            test_fraction: DEFAULT_TEST_FRACTION,
            test_on_train: true,
        }
    }
}

/// データセット走査設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// 対象とする拡張子（空の場合は全ファイル）
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// データセット設定
    #[serde(default)]
    pub dataset: DatasetSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("image_trainer.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しないか不正な場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn log_summary(&self) {
        info!("計算デバイス: {}", self.device_type);
        info!(
            "モデル: {} (入力サイズ: {}, ドロップアウト率: {})",
            self.model.architecture,
            self.model
                .image_size
                .unwrap_or_else(|| self.model.architecture.default_image_size()),
            self.model.dropout
        );
        info!(
            "トレーニング: エポック数 {}, バッチサイズ {}, 学習率 {}, シード {}, テスト割合 {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.seed,
            self.training.test_fraction
        );
        if !self.dataset.extensions.is_empty() {
            info!("対象拡張子: {}", self.dataset.extensions.join(", "));
        }
    }
}
