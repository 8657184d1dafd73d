//! 学習バックエンドの抽象化
//!
//! ネットワークの順伝播・逆伝播や最適化はバックエンドの責務です。
//! パイプラインはこのトレイトを通じて学習・推論・重みのシリアライズのみを依頼します。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 学習済みネットワーク構成のプリセット
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// 16/32/64 チャネル, 32x32 入力
    Small,
    /// 32/64/128 チャネル, 48x48 入力
    #[default]
    Medium,
    /// 64/128/256 チャネル, 64x64 入力
    Large,
}

impl Architecture {
    /// 3つの畳み込み層の出力チャネル数
    pub fn channels(&self) -> [usize; 3] {
        match self {
            Architecture::Small => [16, 32, 64],
            Architecture::Medium => [32, 64, 128],
            Architecture::Large => [64, 128, 256],
        }
    }

    pub fn default_image_size(&self) -> usize {
        match self {
            Architecture::Small => 32,
            Architecture::Medium => 48,
            Architecture::Large => 64,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Small => write!(f, "small"),
            Architecture::Medium => write!(f, "medium"),
            Architecture::Large => write!(f, "large"),
        }
    }
}

/// 学習済みモデルを再構築するための情報
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub architecture: Architecture,
    pub num_classes: usize,
    pub image_size: usize,
    pub dropout: f64,
}

/// 転移学習の初期値として使う保存済みモデル
#[derive(Debug, Clone)]
pub struct PretrainedWeights {
    pub descriptor: ModelDescriptor,
    pub weights: Vec<u8>,
}

/// バックエンドへ渡す学習設定
#[derive(Debug, Clone)]
pub struct TrainerOptions {
    pub architecture: Architecture,
    pub num_classes: usize,
    pub image_size: usize,
    pub dropout: f64,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub pretrained: Option<PretrainedWeights>,
}

impl TrainerOptions {
    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            architecture: self.architecture,
            num_classes: self.num_classes,
            image_size: self.image_size,
            dropout: self.dropout,
        }
    }
}

/// 学習/検証に使う1サンプル（画像バイト列とクラスキー）
#[derive(Debug, Clone, Copy)]
pub struct LabeledImage<'a> {
    pub bytes: &'a [u8],
    pub key: u32,
}

/// エポックごとの学習進捗
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub epoch: usize,
    pub total_epochs: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: Option<f64>,
    pub valid_accuracy: Option<f64>,
}

impl fmt::Display for TrainingProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Epoch {}/{}: train loss={:.4} acc={:.2}%",
            self.epoch,
            self.total_epochs,
            self.train_loss,
            self.train_accuracy * 100.0
        )?;
        if let (Some(loss), Some(acc)) = (self.valid_loss, self.valid_accuracy) {
            write!(f, ", valid loss={:.4} acc={:.2}%", loss, acc * 100.0)?;
        }
        Ok(())
    }
}

/// 1枚分の推論結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub key: u32,
    /// クラスごとの確率（softmax後）
    pub scores: Vec<f32>,
}

impl Prediction {
    /// 確率最大のクラスを予測とする
    pub fn from_scores(scores: Vec<f32>) -> Self {
        let key = scores
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (i, &s)| {
                if s > best.1 {
                    (i, s)
                } else {
                    best
                }
            })
            .0 as u32;
        Self { key, scores }
    }
}

/// 画像分類の学習バックエンド
pub trait ClassifierBackend {
    fn name(&self) -> &str;

    /// 学習データで学習し、検証データがあればエポックごとに評価する
    fn fit(
        &self,
        options: &TrainerOptions,
        train: &[LabeledImage<'_>],
        valid: Option<&[LabeledImage<'_>]>,
        on_epoch: &dyn Fn(&TrainingProgress),
    ) -> anyhow::Result<Box<dyn TrainedClassifier>>;

    /// シリアライズ済みの重みからモデルを復元
    fn load(
        &self,
        descriptor: &ModelDescriptor,
        weights: &[u8],
    ) -> anyhow::Result<Box<dyn TrainedClassifier>>;
}

/// 学習済み分類器
pub trait TrainedClassifier {
    fn descriptor(&self) -> &ModelDescriptor;

    fn predict(&self, images: &[&[u8]]) -> anyhow::Result<Vec<Prediction>>;

    fn to_bytes(&self) -> anyhow::Result<Vec<u8>>;
}
