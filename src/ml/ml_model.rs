//! 画像分類CNNの定義
//!
//! 畳み込み3層 + 全結合2層の分類モデルと、画像バイト列の前処理を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::imageops::FilterType;
use log::debug;

use crate::ml::backend::{Architecture, ModelDescriptor, TrainerOptions};

/// 全結合の隠れ層の上限
pub const MAX_HIDDEN_DIM: usize = 512;

/// ImageNetの平均と標準偏差
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ネットワーク構成
    pub architecture: Architecture,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 48)]
    pub image_size: usize,
}

impl ModelConfig {
    pub fn from_descriptor(descriptor: &ModelDescriptor) -> Self {
        Self {
            num_classes: descriptor.num_classes,
            architecture: descriptor.architecture,
            dropout: descriptor.dropout,
            image_size: descriptor.image_size,
        }
    }

    pub fn from_options(options: &TrainerOptions) -> Self {
        Self::from_descriptor(&options.descriptor())
    }

    /// 最終畳み込み層の出力サイズ
    ///
    /// Conv (3x3, no padding) でサイズが2減少、Pool (2x2) で半分（切り捨て）。
    /// Conv1 → Pool1 → Conv2 → Pool2 → Conv3 の順に適用します。
    fn feature_map_size(&self) -> usize {
        let after_conv1 = self.image_size.saturating_sub(2);
        let after_pool1 = after_conv1 / 2;
        let after_conv2 = after_pool1.saturating_sub(2);
        let after_pool2 = after_conv2 / 2;
        after_pool2.saturating_sub(2)
    }

    /// Flatten後の特徴次元
    pub fn feature_dim(&self) -> usize {
        let size = self.feature_map_size();
        self.architecture.channels()[2] * size * size
    }

    pub fn hidden_dim(&self) -> usize {
        (self.feature_dim() / 2).clamp(1, MAX_HIDDEN_DIM)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.feature_map_size() == 0 {
            anyhow::bail!("入力サイズが小さすぎます: {} (最小18x18が必要)", self.image_size);
        }
        if self.num_classes < 2 {
            anyhow::bail!("分類クラス数は2以上が必要です: {}", self.num_classes);
        }
        if !(0.0..1.0).contains(&self.dropout) {
            anyhow::bail!("ドロップアウト率が不正です: {}", self.dropout);
        }
        Ok(())
    }

    /// モデルを初期化
    ///
    /// 事前に `validate` で入力サイズを確認しておくこと。
    pub fn init<B: Backend>(&self, device: &B::Device) -> ImageClassifier<B> {
        let [c1, c2, c3] = self.architecture.channels();
        let d = self.feature_dim();
        let hidden = self.hidden_dim();

        debug!(
            "[Model] {} 入力: {}x{}, 特徴次元 d: {}, FC1: {} -> {}, FC2: {} -> {}",
            self.architecture,
            self.image_size,
            self.image_size,
            d,
            d,
            hidden,
            hidden,
            self.num_classes
        );

        ImageClassifier {
            conv1: Conv2dConfig::new([3, c1], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).init(),
            conv2: Conv2dConfig::new([c1, c2], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).init(),
            conv3: Conv2dConfig::new([c2, c3], [3, 3])
                .with_stride([1, 1])
                .init(device),
            fc1: LinearConfig::new(d, hidden).init(device),
            fc2: LinearConfig::new(hidden, self.num_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        }
    }
}

/// 画像分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (no padding) + ReLU + MaxPool 2x2} x 2層
/// - Conv 3x3 (no padding) + ReLU
/// - Flatten
/// - FC: d -> hidden + ReLU + Dropout
/// - FC: hidden -> num_classes
#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    conv3: Conv2d<B>,

    fc1: Linear<B>,
    fc2: Linear<B>,

    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> ImageClassifier<B> {
    /// 順伝播
    ///
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    /// - 戻り値: クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// 分類層を新しいクラス数で初期化し直す（転移学習用）
    ///
    /// ドロップアウト率は重みとして保存されないため、`config` の値に置き換える。
    pub fn replace_head(mut self, config: &ModelConfig, device: &B::Device) -> Self {
        self.fc2 = LinearConfig::new(config.hidden_dim(), config.num_classes).init(device);
        self.dropout = DropoutConfig::new(config.dropout).init();
        self
    }
}

/// 画像バイト列をデコードし、指定サイズにリサイズして正規化
///
/// 戻り値は (C, H, W) の順で平坦化したRGBデータです。
pub fn load_and_normalize_image_bytes(bytes: &[u8], size: usize) -> anyhow::Result<Vec<f32>> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() != size as u32 || img.height() != size as u32 {
        img.resize_exact(size as u32, size as u32, FilterType::Triangle)
    } else {
        img
    };
    let img = img.to_rgb8();

    let mut data = Vec::with_capacity(3 * size * size);
    for channel in 0..3 {
        for y in 0..size as u32 {
            for x in 0..size as u32 {
                let value = img.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
            }
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn config(architecture: Architecture, image_size: usize) -> ModelConfig {
        ModelConfig {
            num_classes: 3,
            architecture,
            dropout: 0.5,
            image_size,
        }
    }

    #[test]
    fn test_feature_dim() {
        // 48 -> 46 -> 23 -> 21 -> 10 -> 8
        let medium = config(Architecture::Medium, 48);
        assert_eq!(medium.feature_dim(), 128 * 8 * 8);
        assert_eq!(medium.hidden_dim(), MAX_HIDDEN_DIM);

        // 32 -> 30 -> 15 -> 13 -> 6 -> 4
        let small = config(Architecture::Small, 32);
        assert_eq!(small.feature_dim(), 64 * 4 * 4);
        assert_eq!(small.hidden_dim(), 512);
    }

    #[test]
    fn test_validate_rejects_small_input() {
        assert!(config(Architecture::Small, 16).validate().is_err());
        assert!(config(Architecture::Small, 18).validate().is_ok());
    }

    #[test]
    fn test_normalize_resizes() {
        let img = image::RgbImage::from_pixel(10, 6, image::Rgb([255, 0, 128]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let data = load_and_normalize_image_bytes(&bytes, 20).unwrap();
        assert_eq!(data.len(), 3 * 20 * 20);
        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((data[0] - red).abs() < 1e-5);
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((data[400] - green).abs() < 1e-5);
    }

    #[test]
    fn test_replace_head_uses_new_class_count_and_dropout() {
        use burn_ndarray::{NdArray, NdArrayDevice};

        let device = NdArrayDevice::Cpu;
        let mut base = config(Architecture::Small, 20);
        base.num_classes = 2;
        base.dropout = 0.0;
        let model = base.init::<NdArray>(&device);
        assert_eq!(model.dropout.prob, 0.0);

        let target = config(Architecture::Small, 20);
        let model = model.replace_head(&target, &device);
        assert_eq!(model.dropout.prob, 0.5);

        let logits = model.forward(Tensor::<NdArray, 4>::zeros([2, 3, 20, 20], &device));
        assert_eq!(logits.dims(), [2, 3]);
    }

    #[test]
    fn test_decode_failure() {
        assert!(load_and_normalize_image_bytes(b"not an image", 20).is_err());
    }
}
