//! Burnによるモデル学習

use anyhow::{Context, Result};
use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::InMemDataset,
    },
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
    train::ClassificationOutput,
};
use log::{debug, info};

use crate::ml::backend::{LabeledImage, TrainerOptions, TrainingProgress};
use crate::ml::ml_model::{load_and_normalize_image_bytes, ImageClassifier, ModelConfig};

/// デコード済みの学習サンプル
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub pixels: Vec<f32>,
    pub label: usize,
}

/// 画像バイト列をまとめて正規化済みピクセルに変換
pub fn decode_items(images: &[LabeledImage<'_>], image_size: usize) -> Result<Vec<ImageItem>> {
    images
        .iter()
        .enumerate()
        .map(|(row, image)| {
            let pixels = load_and_normalize_image_bytes(image.bytes, image_size)
                .with_context(|| format!("画像のデコードに失敗しました (行 {row})"))?;
            Ok(ImageItem {
                pixels,
                label: image.key as usize,
            })
        })
        .collect()
}

/// バッチャー
#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    // 学習デバイスはバッチャー側で保持している
    fn batch(&self, items: Vec<ImageItem>, _device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            targets.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), &self.device);

        ImageBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// 1エポック分の損失と正解数の集計
#[derive(Debug, Default)]
struct EpochStats {
    loss_sum: f64,
    correct: usize,
    count: usize,
}

impl EpochStats {
    fn record<B: Backend>(&mut self, output: &ClassificationOutput<B>) {
        let [batch_size] = output.targets.dims();
        let loss = output.loss.clone().into_scalar().elem::<f64>();
        let correct = output
            .output
            .clone()
            .argmax(1)
            .flatten::<1>(0, 1)
            .equal(output.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss_sum += loss * batch_size as f64;
        self.correct += correct as usize;
        self.count += batch_size;
    }

    fn loss(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.loss_sum / self.count as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.correct as f64 / self.count as f64
        }
    }
}

/// 学習ループを実行し、推論用（非Autodiff）モデルを返す
///
/// エポックの終わりごとに `on_epoch` を呼び出します。
pub fn train_model<B: AutodiffBackend>(
    device: B::Device,
    options: &TrainerOptions,
    train: Vec<ImageItem>,
    valid: Option<Vec<ImageItem>>,
    on_epoch: &dyn Fn(&TrainingProgress),
) -> Result<ImageClassifier<B::InnerBackend>> {
    let config = ModelConfig::from_options(options);
    config.validate()?;

    if train.is_empty() {
        anyhow::bail!("学習データが見つかりません");
    }

    let mut model = match &options.pretrained {
        Some(pretrained) => {
            let base = ModelConfig::from_descriptor(&pretrained.descriptor);
            if base.architecture != config.architecture || base.image_size != config.image_size {
                anyhow::bail!(
                    "事前学習モデルの構成が一致しません: {} {}x{} (指定: {} {}x{})",
                    base.architecture,
                    base.image_size,
                    base.image_size,
                    config.architecture,
                    config.image_size,
                    config.image_size
                );
            }
            let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
            let record = <BinBytesRecorder<FullPrecisionSettings> as Recorder<B>>::load(
                &recorder,
                pretrained.weights.clone(),
                &device,
            )
            .map_err(|e| anyhow::anyhow!("事前学習モデルの重み読み込みエラー: {:?}", e))?;
            info!(
                "事前学習モデル ({} クラス) から分類層を差し替えて学習します",
                base.num_classes
            );
            base.init::<B>(&device)
                .load_record(record)
                .replace_head(&config, &device)
        }
        None => config.init::<B>(&device),
    };
    debug!("総パラメータ数: {}", model.num_params());

    let train_loader = DataLoaderBuilder::new(ImageBatcher::<B>::new(device.clone(), config.image_size))
        .batch_size(options.batch_size)
        .shuffle(options.seed)
        .build(InMemDataset::new(train));

    let valid_loader = valid.filter(|items| !items.is_empty()).map(|items| {
        DataLoaderBuilder::new(ImageBatcher::<B::InnerBackend>::new(
            device.clone(),
            config.image_size,
        ))
        .batch_size(options.batch_size)
        .build(InMemDataset::new(items))
    });

    let mut optim = AdamConfig::new().init::<B, ImageClassifier<B>>();

    for epoch in 1..=options.num_epochs {
        let mut train_stats = EpochStats::default();
        for batch in train_loader.iter() {
            let output = model.forward_classification(batch.images, batch.targets);
            train_stats.record(&output);

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(options.learning_rate, model, grads);
        }

        let valid_stats = valid_loader.as_ref().map(|loader| {
            let model_valid = model.valid();
            let mut stats = EpochStats::default();
            for batch in loader.iter() {
                let output = model_valid.forward_classification(batch.images, batch.targets);
                stats.record(&output);
            }
            stats
        });

        let progress = TrainingProgress {
            epoch,
            total_epochs: options.num_epochs,
            train_loss: train_stats.loss(),
            train_accuracy: train_stats.accuracy(),
            valid_loss: valid_stats.as_ref().map(EpochStats::loss),
            valid_accuracy: valid_stats.as_ref().map(EpochStats::accuracy),
        };
        debug!("{}", progress);
        on_epoch(&progress);
    }

    Ok(model.valid())
}
