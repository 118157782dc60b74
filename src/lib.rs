//! 管理コンソールのデータベーススナップショット取得ライブラリ
//!
//! - ログインして当日の "Data Committee Snapshot YYYY-MM-DD" を検索（なければ作成）
//! - ダウンロードリンクが出るまでポーリングし、指定ディレクトリに保存
//!
//! # 使用例
//!
//! ```rust,ignore
//! use snapshot_downloader::{Credentials, SnapshotConfig, SnapshotService};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let credentials = Credentials::from_env("admin@example.org", "NB_PASSWORD", None).unwrap();
//!     let config = SnapshotConfig::new(
//!         credentials,
//!         "https://example.nationbuilder.com/admin",
//!         "./snapshots",
//!     );
//!
//!     let mut service = SnapshotService::new();
//!     let result = service.call(config).await.unwrap();
//!     println!("Snapshot downloaded: {:?}", result.path);
//! }
//! ```
//!
//! ブラウザ以外で動かす場合は `ConsoleDriver` を実装して `SnapshotWorkflow` に渡す。

pub mod chromium;
pub mod config;
pub mod error;
pub mod service;
pub mod snapshot;
pub mod traits;

// 主要な型をリエクスポート
pub use chromium::ChromiumDriver;
pub use config::{Credentials, SnapshotConfig};
pub use error::SnapshotError;
pub use service::{SnapshotResult, SnapshotService};
pub use snapshot::{SnapshotSignature, SnapshotWorkflow, WorkflowState};
pub use traits::{ConsoleDriver, Download, Locator, Role};
