use clap::Parser;
use kmz_classifier::space::{check_space_for_archive, format_bytes, Fs2Probe, SpaceVerdict};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

/// KMZの展開に十分な空き容量があるか確認する
///
/// 終了コード: 0 = 十分, 1 = 不足, 2 = 判定不能
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 確認するKMZファイル
    #[arg(value_name = "ARCHIVE")]
    archive: PathBuf,

    /// 必要容量の見積もり倍率
    #[arg(long, default_value_t = 5)]
    expansion_factor: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let check = match check_space_for_archive(&args.archive, args.expansion_factor, &Fs2Probe) {
        Ok(check) => check,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    info!("Archive size: {}", format_bytes(check.archive_size));
    info!(
        "Estimated space needed ({}x): {}",
        args.expansion_factor,
        format_bytes(check.required)
    );

    match check.verdict {
        SpaceVerdict::Sufficient { margin } => {
            info!("Enough space, {} to spare", format_bytes(margin));
            ExitCode::SUCCESS
        }
        SpaceVerdict::Insufficient { deficit } => {
            warn!("Not enough space, short by {}", format_bytes(deficit));
            ExitCode::from(1)
        }
        SpaceVerdict::Unknown => {
            warn!("Could not determine free disk space");
            ExitCode::from(2)
        }
    }
}
