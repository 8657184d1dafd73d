//! フォルダ分けされた画像データから画像分類モデルを学習するパイプライン
//!
//! データの走査・キー化・分割・評価・保存はこのクレートが行い、
//! ネットワークの学習と推論は `ml::ClassifierBackend` に委譲します。

#![recursion_limit = "256"]

pub mod cli;
pub mod commands;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod ml;
pub mod model;
pub mod pipeline;
pub mod transforms;

use clap::Parser;

use cli::{Cli, Command};

/// コマンドライン引数を解析してサブコマンドを実行
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Train(args) => commands::train(&args),
        Command::Predict(args) => commands::predict(&args),
        Command::InitConfig { path } => commands::init_config(path.as_deref()),
    }
}
