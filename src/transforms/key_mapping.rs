//! 文字列ラベル ⇔ 整数キーの変換

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dataset::{Column, DataTable};
use crate::error::{Error, Result};
use crate::transforms::{Estimator, Transformer};

/// キーの割り当て順
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyOrdinality {
    /// 最初に出現した順
    #[default]
    ByOccurrence,
    /// ラベル文字列の昇順
    ByValue,
}

/// ラベル列をキー列に変換する Estimator
#[derive(Debug, Clone)]
pub struct MapValueToKey {
    input_column: String,
    output_column: String,
    ordinality: KeyOrdinality,
}

impl MapValueToKey {
    pub fn new(input_column: &str, output_column: &str) -> Self {
        Self {
            input_column: input_column.to_string(),
            output_column: output_column.to_string(),
            ordinality: KeyOrdinality::ByOccurrence,
        }
    }

    pub fn with_ordinality(mut self, ordinality: KeyOrdinality) -> Self {
        self.ordinality = ordinality;
        self
    }
}

impl Estimator for MapValueToKey {
    type Transformer = KeyMapping;

    fn fit(&self, input: &DataTable) -> Result<KeyMapping> {
        let labels = input.text_column(&self.input_column)?;

        let mut vocabulary: Vec<String> = Vec::new();
        for label in labels {
            if !vocabulary.contains(label) {
                vocabulary.push(label.clone());
            }
        }
        if self.ordinality == KeyOrdinality::ByValue {
            vocabulary.sort();
        }

        Ok(KeyMapping::new(
            &self.input_column,
            &self.output_column,
            vocabulary,
        ))
    }
}

/// 学習済みのラベル→キー変換
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapping {
    input_column: String,
    output_column: String,
    vocabulary: Vec<String>,
    index: HashMap<String, u32>,
}

impl KeyMapping {
    pub fn new(input_column: &str, output_column: &str, vocabulary: Vec<String>) -> Self {
        let index = vocabulary
            .iter()
            .enumerate()
            .map(|(key, label)| (label.clone(), key as u32))
            .collect();
        Self {
            input_column: input_column.to_string(),
            output_column: output_column.to_string(),
            vocabulary,
            index,
        }
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn cardinality(&self) -> u32 {
        self.vocabulary.len() as u32
    }

    pub fn key(&self, label: &str) -> Option<u32> {
        self.index.get(label).copied()
    }

    pub fn label(&self, key: u32) -> Option<&str> {
        self.vocabulary.get(key as usize).map(String::as_str)
    }
}

impl Transformer for KeyMapping {
    fn transform(&self, input: &DataTable) -> Result<DataTable> {
        let keys = input
            .text_column(&self.input_column)?
            .iter()
            .map(|label| self.key(label).ok_or_else(|| Error::UnknownLabel(label.clone())))
            .collect::<Result<Vec<u32>>>()?;

        input.with_column(
            &self.output_column,
            Column::Key {
                keys,
                cardinality: self.cardinality(),
            },
        )
    }
}

/// 予測キーを文字列ラベルに戻す後処理
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyToValue {
    input_column: String,
    output_column: String,
    vocabulary: Vec<String>,
}

impl KeyToValue {
    pub fn new(input_column: &str, output_column: &str, vocabulary: Vec<String>) -> Self {
        Self {
            input_column: input_column.to_string(),
            output_column: output_column.to_string(),
            vocabulary,
        }
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }
}

impl Transformer for KeyToValue {
    fn transform(&self, input: &DataTable) -> Result<DataTable> {
        let (keys, _) = input.key_column(&self.input_column)?;
        let labels = keys
            .iter()
            .map(|&key| {
                self.vocabulary
                    .get(key as usize)
                    .cloned()
                    .ok_or(Error::KeyOutOfRange {
                        key,
                        cardinality: self.vocabulary.len() as u32,
                    })
            })
            .collect::<Result<Vec<String>>>()?;

        input.with_column(&self.output_column, Column::Text(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Sample, LABEL_COLUMN, LABEL_KEY_COLUMN};
    use pretty_assertions::assert_eq;

    fn table(labels: &[&str]) -> DataTable {
        let samples: Vec<Sample> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| Sample {
                image_path: format!("/img/{i}.png"),
                label: label.to_string(),
            })
            .collect();
        DataTable::from_samples(&samples)
    }

    #[test]
    fn test_keys_follow_first_occurrence() {
        let data = table(&["dog", "cat", "dog", "bird", "cat"]);
        let mapping = MapValueToKey::new(LABEL_COLUMN, LABEL_KEY_COLUMN)
            .fit(&data)
            .unwrap();
        assert_eq!(mapping.vocabulary(), &["dog", "cat", "bird"]);

        let mapped = mapping.transform(&data).unwrap();
        let (keys, cardinality) = mapped.key_column(LABEL_KEY_COLUMN).unwrap();
        assert_eq!(keys, &[0, 1, 0, 2, 1]);
        assert_eq!(cardinality, 3);
    }

    #[test]
    fn test_same_label_same_key() {
        let data = table(&["a", "b", "a", "c", "b", "a"]).shuffle(11);
        let mapping = MapValueToKey::new(LABEL_COLUMN, LABEL_KEY_COLUMN)
            .fit(&data)
            .unwrap();
        let mapped = mapping.transform(&data).unwrap();

        let labels = mapped.text_column(LABEL_COLUMN).unwrap();
        let (keys, _) = mapped.key_column(LABEL_KEY_COLUMN).unwrap();
        let mut seen: HashMap<&str, u32> = HashMap::new();
        for (label, key) in labels.iter().zip(keys) {
            let previous = *seen.entry(label.as_str()).or_insert(*key);
            assert_eq!(previous, *key);
        }
    }

    #[test]
    fn test_by_value_ordinality() {
        let data = table(&["dog", "cat", "bird"]);
        let mapping = MapValueToKey::new(LABEL_COLUMN, LABEL_KEY_COLUMN)
            .with_ordinality(KeyOrdinality::ByValue)
            .fit(&data)
            .unwrap();
        assert_eq!(mapping.vocabulary(), &["bird", "cat", "dog"]);
        assert_eq!(mapping.key("dog"), Some(2));
    }

    #[test]
    fn test_unknown_label_fails() {
        let mapping = MapValueToKey::new(LABEL_COLUMN, LABEL_KEY_COLUMN)
            .fit(&table(&["cat"]))
            .unwrap();
        let err = mapping.transform(&table(&["cat", "fox"])).unwrap_err();
        assert!(matches!(err, Error::UnknownLabel(label) if label == "fox"));
    }

    #[test]
    fn test_key_to_value_roundtrip() {
        let data = table(&["x", "y", "x"]);
        let mapping = MapValueToKey::new(LABEL_COLUMN, LABEL_KEY_COLUMN)
            .fit(&data)
            .unwrap();
        let mapped = mapping.transform(&data).unwrap();

        let back = KeyToValue::new(LABEL_KEY_COLUMN, "Restored", mapping.vocabulary().to_vec())
            .transform(&mapped)
            .unwrap();
        assert_eq!(
            back.text_column("Restored").unwrap(),
            back.text_column(LABEL_COLUMN).unwrap()
        );
    }

    #[test]
    fn test_key_to_value_out_of_range() {
        let data = table(&["x"])
            .with_column(
                "Key",
                Column::Key {
                    keys: vec![5],
                    cardinality: 6,
                },
            )
            .unwrap();
        let err = KeyToValue::new("Key", "Out", vec!["x".to_string()])
            .transform(&data)
            .unwrap_err();
        assert!(matches!(err, Error::KeyOutOfRange { key: 5, .. }));
    }
}
