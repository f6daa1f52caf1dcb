use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kmz_classifier::{CollisionPolicy, KmzProcessor, PipelineConfig};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 入力KMZファイル
    #[arg(value_name = "ARCHIVE")]
    archive: PathBuf,

    /// 台帳の出力ディレクトリ（デフォルト: アーカイブと同じディレクトリ）
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// 必要容量の見積もり倍率
    #[arg(long, default_value_t = 5)]
    expansion_factor: u64,

    /// 容量不足時にKMLのみの展開に切り替えず終了する
    #[arg(long)]
    no_fallback: bool,

    /// 展開後に探すKMLファイル名
    #[arg(long, default_value = "doc.kml")]
    map_document: String,

    /// 画像フォルダ名
    #[arg(long, default_value = "cloud_media")]
    media_dir: String,

    /// JPEG品質 (1-100)
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// 既存ファイルとの衝突時の動作
    #[arg(long, value_enum, default_value_t = OnCollision::Skip)]
    on_collision: OnCollision,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum OnCollision {
    Skip,
    Overwrite,
}

impl From<OnCollision> for CollisionPolicy {
    fn from(value: OnCollision) -> Self {
        match value {
            OnCollision::Skip => CollisionPolicy::Skip,
            OnCollision::Overwrite => CollisionPolicy::Overwrite,
        }
    }
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    if !args.archive.is_file() {
        error!("Invalid input path: {:?}", args.archive);
        anyhow::bail!("Input must be a KMZ file");
    }

    let config = PipelineConfig {
        expansion_factor: args.expansion_factor,
        fallback_on_shortfall: !args.no_fallback,
        map_document_name: args.map_document,
        media_dir_name: args.media_dir,
        jpeg_quality: args.quality,
        collision_policy: args.on_collision.into(),
        output_dir: args.output,
        ..Default::default()
    };

    let processor = KmzProcessor::new(&args.archive, config);
    let report = match processor.run() {
        Ok(report) => report,
        Err(failure) => {
            // 台帳が書き出された後の失敗でも集計は表示する
            if let Some(report) = &failure.report {
                report.log_summary();
            }
            error!("{}", failure);
            return Err(failure).with_context(|| format!("Failed to process {:?}", args.archive));
        }
    };
    report.log_summary();

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    if !report.is_complete() {
        anyhow::bail!("{} ledgers could not be written", report.write_failures.len());
    }

    Ok(())
}
