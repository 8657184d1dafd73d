//! 保存済みモデルのメタデータを表示する補助バイナリ

use image_trainer_lib::model::{load_metadata, print_metadata_info};
use std::path::PathBuf;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let model_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("使い方: inspect_model <model.tar.gz>");
            std::process::exit(2);
        }
    };

    match load_metadata(&model_path) {
        Ok(metadata) => {
            println!("✓ モデルメタデータ読み込み成功: {}", model_path.display());
            print_metadata_info(&metadata);
        }
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            std::process::exit(1);
        }
    }
}
