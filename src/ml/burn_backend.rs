//! Burnを使った `ClassifierBackend` 実装

use anyhow::Result;
use burn::backend::Wgpu;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use log::info;

use crate::ml::backend::{
    ClassifierBackend, LabeledImage, ModelDescriptor, TrainedClassifier, TrainerOptions,
    TrainingProgress,
};
use crate::ml::inference::BurnClassifier;
use crate::ml::training::{decode_items, train_model};
use crate::model::DeviceType;

/// 計算デバイスを選択できるBurnバックエンド
#[derive(Debug, Clone)]
pub struct BurnBackend {
    device_type: DeviceType,
}

impl BurnBackend {
    pub fn new(device_type: DeviceType) -> Self {
        Self { device_type }
    }
}

impl ClassifierBackend for BurnBackend {
    fn name(&self) -> &str {
        match self.device_type {
            DeviceType::Wgpu => "burn-wgpu",
            DeviceType::Cpu => "burn-ndarray",
        }
    }

    fn fit(
        &self,
        options: &TrainerOptions,
        train: &[LabeledImage<'_>],
        valid: Option<&[LabeledImage<'_>]>,
        on_epoch: &dyn Fn(&TrainingProgress),
    ) -> Result<Box<dyn TrainedClassifier>> {
        let train_items = decode_items(train, options.image_size)?;
        let valid_items = valid
            .map(|rows| decode_items(rows, options.image_size))
            .transpose()?;
        info!("使用デバイス: {}", self.device_type);

        let descriptor = options.descriptor();
        match self.device_type {
            DeviceType::Wgpu => {
                let device = WgpuDevice::default();
                let model = train_model::<Autodiff<Wgpu>>(
                    device.clone(),
                    options,
                    train_items,
                    valid_items,
                    on_epoch,
                )?;
                Ok(Box::new(BurnClassifier::<Wgpu>::new(model, descriptor, device)))
            }
            DeviceType::Cpu => {
                let model = train_model::<Autodiff<NdArray>>(
                    NdArrayDevice::Cpu,
                    options,
                    train_items,
                    valid_items,
                    on_epoch,
                )?;
                Ok(Box::new(BurnClassifier::<NdArray>::new(
                    model,
                    descriptor,
                    NdArrayDevice::Cpu,
                )))
            }
        }
    }

    fn load(&self, descriptor: &ModelDescriptor, weights: &[u8]) -> Result<Box<dyn TrainedClassifier>> {
        match self.device_type {
            DeviceType::Wgpu => Ok(Box::new(BurnClassifier::<Wgpu>::load(
                descriptor,
                weights,
                WgpuDevice::default(),
            )?)),
            DeviceType::Cpu => Ok(Box::new(BurnClassifier::<NdArray>::load(
                descriptor,
                weights,
                NdArrayDevice::Cpu,
            )?)),
        }
    }
}
