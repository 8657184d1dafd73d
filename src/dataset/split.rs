//! 学習用/テスト用への分割

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::dataset::DataTable;
use crate::error::{Error, Result};

pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// 分割結果（互いに素な2つのテーブル）
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub train: DataTable,
    pub test: DataTable,
}

/// シード付きでテーブルを分割
///
/// テスト件数は `round(行数 * test_fraction)`。各サブセット内の行順は元の順序を保ちます。
/// クラスごとの層化は行いません。
pub fn train_test_split(table: &DataTable, test_fraction: f64, seed: u64) -> Result<TrainTestSplit> {
    if !(0.0..=1.0).contains(&test_fraction) || test_fraction.is_nan() {
        return Err(Error::InvalidFraction(test_fraction));
    }

    let total = table.len();
    let test_len = (total as f64 * test_fraction).round() as usize;

    let mut indices: Vec<usize> = (0..total).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut test_indices = indices[..test_len].to_vec();
    let mut train_indices = indices[test_len..].to_vec();
    test_indices.sort_unstable();
    train_indices.sort_unstable();

    Ok(TrainTestSplit {
        train: table.take_rows(&train_indices),
        test: table.take_rows(&test_indices),
    })
}

/// 学習側には存在するがテスト側に1件も無いラベル
pub fn missing_classes(split: &TrainTestSplit, label_column: &str) -> Result<Vec<String>> {
    let test: BTreeSet<&String> = split.test.text_column(label_column)?.iter().collect();
    let train: BTreeSet<&String> = split.train.text_column(label_column)?.iter().collect();
    Ok(train
        .difference(&test)
        .map(|label| label.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Sample, IMAGE_PATH_COLUMN, LABEL_COLUMN};

    fn table(n: usize) -> DataTable {
        let samples: Vec<Sample> = (0..n)
            .map(|i| Sample {
                image_path: format!("/img/{i}.png"),
                label: format!("class_{}", i % 3),
            })
            .collect();
        DataTable::from_samples(&samples)
    }

    #[test]
    fn test_split_sizes_and_partition() {
        for (rows, fraction) in [(20, 0.2), (7, 0.3), (100, 0.25), (1, 0.2)] {
            let data = table(rows);
            let split = train_test_split(&data, fraction, 42).unwrap();
            let expected_test = (rows as f64 * fraction).round() as usize;
            assert_eq!(split.test.len(), expected_test);
            assert_eq!(split.train.len(), rows - expected_test);

            let train: BTreeSet<String> = split
                .train
                .text_column(IMAGE_PATH_COLUMN)
                .unwrap()
                .iter()
                .cloned()
                .collect();
            let test: BTreeSet<String> = split
                .test
                .text_column(IMAGE_PATH_COLUMN)
                .unwrap()
                .iter()
                .cloned()
                .collect();
            assert!(train.is_disjoint(&test));
            let all: BTreeSet<String> = data
                .text_column(IMAGE_PATH_COLUMN)
                .unwrap()
                .iter()
                .cloned()
                .collect();
            assert_eq!(train.union(&test).cloned().collect::<BTreeSet<_>>(), all);
        }
    }

    #[test]
    fn test_split_is_reproducible() {
        let data = table(30);
        let a = train_test_split(&data, 0.2, 9).unwrap();
        let b = train_test_split(&data, 0.2, 9).unwrap();
        assert_eq!(a.test, b.test);
        assert_eq!(a.train, b.train);
    }

    #[test]
    fn test_split_preserves_relative_order() {
        let data = table(25);
        let split = train_test_split(&data, 0.4, 3).unwrap();
        let position = |path: &String| {
            data.text_column(IMAGE_PATH_COLUMN)
                .unwrap()
                .iter()
                .position(|p| p == path)
                .unwrap()
        };
        let train_positions: Vec<usize> = split
            .train
            .text_column(IMAGE_PATH_COLUMN)
            .unwrap()
            .iter()
            .map(position)
            .collect();
        assert!(train_positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_split_rejects_invalid_fraction() {
        let data = table(5);
        assert!(matches!(
            train_test_split(&data, 1.5, 0),
            Err(Error::InvalidFraction(_))
        ));
        assert!(matches!(
            train_test_split(&data, -0.1, 0),
            Err(Error::InvalidFraction(_))
        ));
    }

    #[test]
    fn test_missing_classes() {
        let data = table(3);
        let split = train_test_split(&data, 0.0, 0).unwrap();
        let missing = missing_classes(&split, LABEL_COLUMN).unwrap();
        assert_eq!(missing, vec!["class_0", "class_1", "class_2"]);
    }
}
