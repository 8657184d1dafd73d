//! fit → transform の2段階変換
//!
//! `Estimator` は不変の設定で、`fit` で学習済みの `Transformer` を生成します。
//! 同じデータに対して fit した直後に transform する場合も、2つの操作として明示的に呼び出します。

pub mod image_loader;
pub mod key_mapping;

pub use image_loader::{LoadRawImageBytes, RawImageLoader};
pub use key_mapping::{KeyMapping, KeyOrdinality, KeyToValue, MapValueToKey};

use crate::dataset::DataTable;
use crate::error::Result;

pub trait Estimator {
    type Transformer: Transformer;

    fn fit(&self, input: &DataTable) -> Result<Self::Transformer>;
}

pub trait Transformer {
    fn transform(&self, input: &DataTable) -> Result<DataTable>;
}

/// 学習済み変換の連結
#[derive(Default)]
pub struct TransformerChain {
    stages: Vec<Box<dyn Transformer>>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<T: Transformer + 'static>(mut self, transformer: T) -> Self {
        self.stages.push(Box::new(transformer));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Transformer for TransformerChain {
    fn transform(&self, input: &DataTable) -> Result<DataTable> {
        let mut table = input.clone();
        for stage in &self.stages {
            table = stage.transform(&table)?;
        }
        Ok(table)
    }
}

/// ラベルのキー化と画像バイト読み込みを全データで fit し、同じデータに適用
///
/// 分割前の全データで fit することで、学習側とテスト側が同じキー語彙を共有します。
pub fn materialize(
    table: &DataTable,
    key_estimator: &MapValueToKey,
    image_estimator: &LoadRawImageBytes,
) -> Result<(DataTable, KeyMapping)> {
    let key_mapping = key_estimator.fit(table)?;
    let image_loader = image_estimator.fit(table)?;

    let chain = TransformerChain::new()
        .append(key_mapping.clone())
        .append(image_loader);
    let materialized = chain.transform(table)?;
    Ok((materialized, key_mapping))
}
