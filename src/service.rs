use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;
use tracing::{info, Instrument};

use crate::chromium::ChromiumDriver;
use crate::config::SnapshotConfig;
use crate::error::SnapshotError;
use crate::snapshot::SnapshotWorkflow;

/// スナップショット取得結果
#[derive(Debug)]
pub struct SnapshotResult {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl SnapshotResult {
    pub fn new(path: PathBuf) -> std::io::Result<Self> {
        let size_bytes = std::fs::metadata(&path)?.len();
        Ok(Self { path, size_bytes })
    }
}

/// tower::Serviceを実装したスナップショット取得サービス
///
/// 1回の呼び出しで ブラウザ起動 → ワークフロー実行 → 終了 を行う
#[derive(Debug, Clone, Default)]
pub struct SnapshotService {}

impl SnapshotService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service<SnapshotConfig> for SnapshotService {
    type Response = SnapshotResult;
    type Error = SnapshotError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, config: SnapshotConfig) -> Self::Future {
        info!(
            "Snapshot request received: user={}, url={}",
            config.credentials.username, config.login_url
        );

        let span = tracing::info_span!("download_snapshot", user = %config.credentials.username);
        Box::pin(
            async move {
                // ブラウザを起動する前に設定を検証
                config.validate()?;

                let driver = ChromiumDriver::launch(&config).await?;
                let mut workflow = SnapshotWorkflow::new(driver, &config);
                let path = workflow.run().await?;

                let result = SnapshotResult::new(path)?;
                info!(
                    "Snapshot saved: path={:?}, size={}bytes",
                    result.path, result.size_bytes
                );
                Ok(result)
            }
            .instrument(span),
        )
    }
}
