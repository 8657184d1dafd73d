//! 画像パス列から生のバイト列を読み込む変換

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::dataset::{Column, DataTable};
use crate::error::{Error, Result};
use crate::transforms::{Estimator, Transformer};

/// 画像バイト読み込みの Estimator
#[derive(Debug, Clone)]
pub struct LoadRawImageBytes {
    input_column: String,
    output_column: String,
    image_folder: PathBuf,
}

impl LoadRawImageBytes {
    /// `image_folder` は相対パスの基準ディレクトリ（絶対パスはそのまま使用）
    pub fn new(input_column: &str, output_column: &str, image_folder: impl Into<PathBuf>) -> Self {
        Self {
            input_column: input_column.to_string(),
            output_column: output_column.to_string(),
            image_folder: image_folder.into(),
        }
    }
}

impl Estimator for LoadRawImageBytes {
    type Transformer = RawImageLoader;

    fn fit(&self, input: &DataTable) -> Result<RawImageLoader> {
        // 学習するパラメータは無いが、入力列の存在と型をここで確認する
        input.text_column(&self.input_column)?;
        Ok(RawImageLoader {
            input_column: self.input_column.clone(),
            output_column: self.output_column.clone(),
            image_folder: self.image_folder.clone(),
        })
    }
}

/// 学習済みの画像バイト読み込み
#[derive(Debug, Clone)]
pub struct RawImageLoader {
    input_column: String,
    output_column: String,
    image_folder: PathBuf,
}

impl RawImageLoader {
    fn resolve(&self, image_path: &str) -> PathBuf {
        let path = Path::new(image_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.image_folder.join(path)
        }
    }
}

impl Transformer for RawImageLoader {
    fn transform(&self, input: &DataTable) -> Result<DataTable> {
        let paths = input.text_column(&self.input_column)?;

        let mut images = Vec::with_capacity(paths.len());
        let mut total_bytes = 0usize;
        for image_path in paths {
            let path = self.resolve(image_path);
            let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
            total_bytes += bytes.len();
            images.push(Arc::<[u8]>::from(bytes));
        }
        debug!(
            "{} 枚の画像を読み込みました ({:.2} MB)",
            images.len(),
            total_bytes as f64 / 1024.0 / 1024.0
        );

        input.with_column(&self.output_column, Column::Bytes(images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Sample, IMAGE_COLUMN, IMAGE_PATH_COLUMN};
    use tempfile::TempDir;

    #[test]
    fn test_relative_paths_resolve_against_folder() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.png"), [1u8, 2, 3]).unwrap();

        let table = DataTable::from_samples(&[Sample {
            image_path: "a.png".to_string(),
            label: "x".to_string(),
        }]);
        let loader = LoadRawImageBytes::new(IMAGE_PATH_COLUMN, IMAGE_COLUMN, dir.path())
            .fit(&table)
            .unwrap();
        let loaded = loader.transform(&table).unwrap();

        assert_eq!(&*loaded.bytes_column(IMAGE_COLUMN).unwrap()[0], &[1u8, 2, 3]);
        // 元の列はそのまま残る
        assert_eq!(loaded.text_column(IMAGE_PATH_COLUMN).unwrap(), &["a.png"]);
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let table = DataTable::from_samples(&[Sample {
            image_path: "missing.png".to_string(),
            label: "x".to_string(),
        }]);
        let loader = LoadRawImageBytes::new(IMAGE_PATH_COLUMN, IMAGE_COLUMN, dir.path())
            .fit(&table)
            .unwrap();
        match loader.transform(&table) {
            Err(Error::Io { path, .. }) => assert!(path.ends_with("missing.png")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_fit_requires_input_column() {
        let result = LoadRawImageBytes::new("Nope", IMAGE_COLUMN, ".").fit(&DataTable::new());
        assert!(matches!(result, Err(Error::MissingColumn(_))));
    }
}
