//! 学習済みモデルによる推論

use anyhow::Result;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use crate::ml::backend::{ModelDescriptor, Prediction, TrainedClassifier};
use crate::ml::ml_model::{load_and_normalize_image_bytes, ImageClassifier, ModelConfig};

/// 推論時のバッチサイズ
const INFERENCE_BATCH_SIZE: usize = 32;

/// Burnの学習済み分類器
pub struct BurnClassifier<B: Backend> {
    model: ImageClassifier<B>,
    descriptor: ModelDescriptor,
    device: B::Device,
}

impl<B: Backend> BurnClassifier<B> {
    pub fn new(model: ImageClassifier<B>, descriptor: ModelDescriptor, device: B::Device) -> Self {
        Self {
            model,
            descriptor,
            device,
        }
    }

    /// シリアライズ済みの重みから復元
    pub fn load(descriptor: &ModelDescriptor, weights: &[u8], device: B::Device) -> Result<Self> {
        let config = ModelConfig::from_descriptor(descriptor);
        config.validate()?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = <BinBytesRecorder<FullPrecisionSettings> as Recorder<B>>::load(
            &recorder,
            weights.to_vec(),
            &device,
        )
        .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = config.init::<B>(&device).load_record(record);

        Ok(Self::new(model, descriptor.clone(), device))
    }

    fn predict_batch(&self, images: &[&[u8]]) -> Result<Vec<Prediction>> {
        let size = self.descriptor.image_size;
        let mut pixels = Vec::with_capacity(images.len() * 3 * size * size);
        for bytes in images {
            pixels.extend(load_and_normalize_image_bytes(bytes, size)?);
        }

        let tensor = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([images.len(), 3, size, size]);
        let probabilities = softmax(self.model.forward(tensor), 1);

        let values: Vec<f32> = probabilities.into_data().iter::<f32>().collect();
        Ok(values
            .chunks(self.descriptor.num_classes)
            .map(|scores| Prediction::from_scores(scores.to_vec()))
            .collect())
    }
}

impl<B: Backend> TrainedClassifier for BurnClassifier<B> {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn predict(&self, images: &[&[u8]]) -> Result<Vec<Prediction>> {
        let mut predictions = Vec::with_capacity(images.len());
        for chunk in images.chunks(INFERENCE_BATCH_SIZE) {
            predictions.extend(self.predict_batch(chunk)?);
        }
        Ok(predictions)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        <BinBytesRecorder<FullPrecisionSettings> as Recorder<B>>::record(
            &recorder,
            self.model.clone().into_record(),
            (),
        )
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))
    }
}
