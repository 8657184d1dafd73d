fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = image_trainer_lib::run() {
        eprintln!("エラー: {}", e);
        for cause in e.chain().skip(1) {
            eprintln!("  原因: {}", cause);
        }
        std::process::exit(1);
    }
}
