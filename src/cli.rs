//! コマンドライン引数の定義

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::ml::Architecture;
use crate::model::DeviceType;

#[derive(Debug, Parser)]
#[command(
    name = "image_trainer",
    version,
    about = "フォルダ分けされた画像から画像分類モデルを学習・評価・保存する"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 学習データを走査してモデルを学習し、評価結果とモデルを出力する
    Train(TrainArgs),
    /// 保存済みモデルで画像を分類する
    Predict(PredictArgs),
    /// デフォルト設定ファイルを書き出す
    InitConfig {
        /// 出力先（省略時は image_trainer.json）
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct TrainArgs {
    /// クラス名のサブディレクトリを含む学習データのルート
    #[arg(long)]
    pub data: PathBuf,

    /// モデルの出力ディレクトリ
    #[arg(long)]
    pub output: PathBuf,

    /// 設定ファイル（省略時は image_trainer.json があれば使用）
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub architecture: Option<Architecture>,

    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// シャッフル・分割・ミニバッチ順のシード
    #[arg(long)]
    pub seed: Option<u64>,

    /// テストデータの割合 (0.0〜1.0)
    #[arg(long)]
    pub test_fraction: Option<f64>,

    #[arg(long, value_enum)]
    pub device: Option<DeviceType>,

    /// 転移学習の初期値に使う保存済みモデル (.tar.gz)
    #[arg(long)]
    pub pretrained: Option<PathBuf>,

    /// 対象拡張子（カンマ区切り、例: png,jpg）
    #[arg(long, value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// クラスごとの評価結果を書き出すCSV
    #[arg(long)]
    pub metrics_csv: Option<PathBuf>,

    /// 検証データが無いときに学習データで検証しない
    #[arg(long)]
    pub no_test_on_train: bool,
}

#[derive(Debug, Clone, Args)]
pub struct PredictArgs {
    /// 保存済みモデル (.tar.gz)
    #[arg(long)]
    pub model: PathBuf,

    /// 設定ファイル（計算デバイスの選択に使用）
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub device: Option<DeviceType>,

    /// 分類する画像ファイル
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_train_arguments() {
        let cli = Cli::try_parse_from([
            "image_trainer",
            "train",
            "--data",
            "Data",
            "--output",
            "out",
            "--architecture",
            "small",
            "--device",
            "cpu",
            "--extensions",
            "png,jpg",
            "--no-test-on-train",
        ])
        .unwrap();

        let Command::Train(args) = cli.command else {
            panic!("expected train command");
        };
        assert_eq!(args.data, PathBuf::from("Data"));
        assert_eq!(args.architecture, Some(Architecture::Small));
        assert_eq!(args.device, Some(DeviceType::Cpu));
        assert_eq!(args.extensions, vec!["png", "jpg"]);
        assert!(args.no_test_on_train);
        assert_eq!(args.epochs, None);
    }

    #[test]
    fn test_predict_requires_images() {
        assert!(Cli::try_parse_from(["image_trainer", "predict", "--model", "m.tar.gz"]).is_err());
        let cli = Cli::try_parse_from(["image_trainer", "predict", "--model", "m.tar.gz", "a.png"])
            .unwrap();
        assert!(matches!(cli.command, Command::Predict(ref args) if args.images.len() == 1));
    }
}
