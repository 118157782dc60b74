//! download-snapshot
//!
//! 管理コンソールにログインし、当日のデータベーススナップショットをダウンロードする

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use snapshot_downloader::{Credentials, SnapshotConfig, SnapshotError, SnapshotService};
use tower::Service;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Download today's database snapshot from a NationBuilder admin console
#[derive(Parser, Debug)]
#[command(name = "download-snapshot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Nationbuilder username
    #[arg(short = 'u', long = "username")]
    username: String,

    /// Name of environment variable to read password from
    #[arg(short = 'p', long = "password_environment_var")]
    password_environment_var: String,

    /// TOTP one-time password
    #[arg(short = 't', long = "otp")]
    otp: Option<String>,

    /// URL of your nationbuilder admin login page
    #[arg(short = 'n', long = "nationbuilder_url")]
    nationbuilder_url: String,

    /// Existing directory to save the snapshot into
    #[arg(short = 'o', long = "output_dir")]
    output_dir: PathBuf,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Upper bound on waiting for the download to finish
    #[arg(long = "download_timeout_secs", default_value_t = 300)]
    download_timeout_secs: u64,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // ロガーは1回の実行に閉じる（グローバル登録しない）
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    // 単一スレッドで順番に実行する
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), SnapshotError> {
    // .envがあれば読み込む
    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {:?}", path);
    }

    let credentials =
        Credentials::from_env(args.username, &args.password_environment_var, args.otp)?;

    let config = SnapshotConfig::new(credentials, args.nationbuilder_url, args.output_dir)
        .with_headless(!args.headed)
        .with_download_timeout(Duration::from_secs(args.download_timeout_secs));

    let mut service = SnapshotService::new();
    service.call(config).await?;
    Ok(())
}
