use anyhow::{Context, Result};
use clap::Parser;
use kmz_classifier::compare::compare_files;
use std::path::PathBuf;
use tracing::info;

/// 2つのコード一覧を比較し、未送信のコードを書き出す
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 送信済みコードの一覧
    #[arg(value_name = "SENT")]
    sent: PathBuf,

    /// 確認するコードの一覧
    #[arg(value_name = "TO_VERIFY")]
    to_verify: PathBuf,

    /// 出力ディレクトリ（デフォルト: TO_VERIFYと同じディレクトリ）
    #[arg(value_name = "OUTPUT_DIR")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    for path in [&args.sent, &args.to_verify] {
        if !path.is_file() {
            anyhow::bail!("File not found: {:?}", path);
        }
    }

    let outcome = compare_files(&args.sent, &args.to_verify, args.output.as_deref())
        .context("Failed to compare code lists")?;

    let c = &outcome.comparison;
    info!("Codes in sent list: {}", c.sent_total);
    info!("Codes to verify: {}", c.to_verify_total);
    info!("Already sent: {}", c.to_verify_total - c.not_sent.len());
    info!("Not sent: {}", c.not_sent.len());
    info!("Not-sent list: {:?}", outcome.not_sent_path);
    if let Some(report) = &outcome.report_path {
        info!("Report: {:?}", report);
    }

    Ok(())
}
