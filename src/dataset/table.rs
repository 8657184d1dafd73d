//! 列指向のインメモリデータテーブル
//!
//! 行単位の書き換えは行わず、変換は常に新しいテーブルを返します。

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::dataset::Sample;
use crate::error::{Error, Result};

pub const IMAGE_PATH_COLUMN: &str = "ImagePath";
pub const LABEL_COLUMN: &str = "Label";
pub const LABEL_KEY_COLUMN: &str = "LabelAsKey";
pub const IMAGE_COLUMN: &str = "Image";
pub const PREDICTED_KEY_COLUMN: &str = "PredictedLabelKey";
pub const PREDICTED_LABEL_COLUMN: &str = "PredictedLabel";
pub const SCORE_COLUMN: &str = "Score";

/// 列データ
///
/// 画像バイト列は行の並べ替えでコピーしないよう `Arc` で共有します。
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Text(Vec<String>),
    Key { keys: Vec<u32>, cardinality: u32 },
    Bytes(Vec<Arc<[u8]>>),
    Scores(Vec<Vec<f32>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Text(v) => v.len(),
            Column::Key { keys, .. } => keys.len(),
            Column::Bytes(v) => v.len(),
            Column::Scores(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Text(_) => ColumnKind::Text,
            Column::Key { cardinality, .. } => ColumnKind::Key {
                cardinality: *cardinality,
            },
            Column::Bytes(_) => ColumnKind::Bytes,
            Column::Scores(_) => ColumnKind::Scores,
        }
    }

    fn take(&self, indices: &[usize]) -> Column {
        match self {
            Column::Text(v) => Column::Text(indices.iter().map(|&i| v[i].clone()).collect()),
            Column::Key { keys, cardinality } => Column::Key {
                keys: indices.iter().map(|&i| keys[i]).collect(),
                cardinality: *cardinality,
            },
            Column::Bytes(v) => Column::Bytes(indices.iter().map(|&i| Arc::clone(&v[i])).collect()),
            Column::Scores(v) => Column::Scores(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

/// 列の型情報（スキーマ保存用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Key { cardinality: u32 },
    Bytes,
    Scores,
}

impl ColumnKind {
    fn name(&self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Key { .. } => "key",
            ColumnKind::Bytes => "bytes",
            ColumnKind::Scores => "scores",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
}

/// データテーブル
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    names: Vec<String>,
    columns: Vec<Column>,
    rows: usize,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// サンプル一覧から ImagePath / Label 列を持つテーブルを作成
    pub fn from_samples(samples: &[Sample]) -> Self {
        let paths = samples.iter().map(|s| s.image_path.clone()).collect();
        let labels = samples.iter().map(|s| s.label.clone()).collect();
        Self {
            names: vec![IMAGE_PATH_COLUMN.to_string(), LABEL_COLUMN.to_string()],
            columns: vec![Column::Text(paths), Column::Text(labels)],
            rows: samples.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn schema(&self) -> Vec<ColumnInfo> {
        self.names
            .iter()
            .zip(&self.columns)
            .map(|(name, column)| ColumnInfo {
                name: name.clone(),
                kind: column.kind(),
            })
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    }

    pub fn text_column(&self, name: &str) -> Result<&[String]> {
        match self.column(name)? {
            Column::Text(v) => Ok(v),
            other => Err(type_error(name, "text", other)),
        }
    }

    /// キー列と語彙サイズ
    pub fn key_column(&self, name: &str) -> Result<(&[u32], u32)> {
        match self.column(name)? {
            Column::Key { keys, cardinality } => Ok((keys, *cardinality)),
            other => Err(type_error(name, "key", other)),
        }
    }

    pub fn bytes_column(&self, name: &str) -> Result<&[Arc<[u8]>]> {
        match self.column(name)? {
            Column::Bytes(v) => Ok(v),
            other => Err(type_error(name, "bytes", other)),
        }
    }

    pub fn scores_column(&self, name: &str) -> Result<&[Vec<f32>]> {
        match self.column(name)? {
            Column::Scores(v) => Ok(v),
            other => Err(type_error(name, "scores", other)),
        }
    }

    /// 列を追加した新しいテーブルを返す（同名の列は置き換え）
    pub fn with_column(&self, name: &str, column: Column) -> Result<Self> {
        if !self.names.is_empty() && column.len() != self.rows {
            return Err(Error::ColumnLength {
                column: name.to_string(),
                expected: self.rows,
                actual: column.len(),
            });
        }

        let mut table = self.clone();
        table.rows = column.len();
        match table.names.iter().position(|n| n == name) {
            Some(i) => table.columns[i] = column,
            None => {
                table.names.push(name.to_string());
                table.columns.push(column);
            }
        }
        Ok(table)
    }

    /// 指定した行だけを指定順に取り出す
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            rows: indices.len(),
        }
    }

    /// シードで決まる順序に行を並べ替えたテーブルを返す
    pub fn shuffle(&self, seed: u64) -> Self {
        let mut indices: Vec<usize> = (0..self.rows).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        self.take_rows(&indices)
    }
}

fn type_error(name: &str, expected: &'static str, actual: &Column) -> Error {
    Error::ColumnType {
        column: name.to_string(),
        expected,
        actual: actual.kind().name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample {
                image_path: format!("/data/{}/{i}.jpg", if i % 2 == 0 { "cat" } else { "dog" }),
                label: if i % 2 == 0 { "cat" } else { "dog" }.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_from_samples() {
        let table = DataTable::from_samples(&samples(4));
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.text_column(LABEL_COLUMN).unwrap(),
            &["cat", "dog", "cat", "dog"]
        );
        assert_eq!(
            table.schema(),
            vec![
                ColumnInfo {
                    name: IMAGE_PATH_COLUMN.to_string(),
                    kind: ColumnKind::Text
                },
                ColumnInfo {
                    name: LABEL_COLUMN.to_string(),
                    kind: ColumnKind::Text
                },
            ]
        );
    }

    #[test]
    fn test_shuffle_is_deterministic() {
        let table = DataTable::from_samples(&samples(50));
        let a = table.shuffle(7);
        let b = table.shuffle(7);
        assert_eq!(a, b);

        let c = table.shuffle(8);
        assert_ne!(
            a.text_column(IMAGE_PATH_COLUMN).unwrap(),
            c.text_column(IMAGE_PATH_COLUMN).unwrap()
        );
    }

    #[test]
    fn test_shuffle_keeps_rows_together() {
        let table = DataTable::from_samples(&samples(20));
        let shuffled = table.shuffle(1);

        let mut original: Vec<String> = table.text_column(IMAGE_PATH_COLUMN).unwrap().to_vec();
        let mut permuted: Vec<String> = shuffled.text_column(IMAGE_PATH_COLUMN).unwrap().to_vec();
        original.sort();
        permuted.sort();
        assert_eq!(original, permuted);

        let paths = shuffled.text_column(IMAGE_PATH_COLUMN).unwrap();
        let labels = shuffled.text_column(LABEL_COLUMN).unwrap();
        for (path, label) in paths.iter().zip(labels) {
            assert!(path.contains(label.as_str()));
        }
    }

    #[test]
    fn test_with_column_checks_length() {
        let table = DataTable::from_samples(&samples(3));
        let err = table
            .with_column("Extra", Column::Text(vec!["x".to_string()]))
            .unwrap_err();
        assert!(matches!(err, Error::ColumnLength { expected: 3, actual: 1, .. }));
    }

    #[test]
    fn test_column_type_mismatch() {
        let table = DataTable::from_samples(&samples(2));
        assert!(matches!(
            table.key_column(LABEL_COLUMN),
            Err(Error::ColumnType { expected: "key", actual: "text", .. })
        ));
        assert!(matches!(
            table.bytes_column(IMAGE_COLUMN),
            Err(Error::MissingColumn(_))
        ));
    }
}
