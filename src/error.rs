//! データセット処理のエラー定義

use std::path::PathBuf;

use thiserror::Error;

/// データセット・変換・評価で発生するエラー
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/Oエラー ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("列 '{0}' が見つかりません")]
    MissingColumn(String),

    #[error("列 '{column}' の型が不正です (期待: {expected}, 実際: {actual})")]
    ColumnType {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("列 '{column}' の行数が一致しません (期待: {expected}, 実際: {actual})")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("未知のラベルです: '{0}'")]
    UnknownLabel(String),

    #[error("キー {key} は語彙サイズ {cardinality} の範囲外です")]
    KeyOutOfRange { key: u32, cardinality: u32 },

    #[error("データセットが空です: {0}")]
    EmptyDataset(String),

    #[error("分割比率が不正です: {0} (0.0 - 1.0 の範囲で指定してください)")]
    InvalidFraction(f64),

    #[error("CSV出力エラー: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
