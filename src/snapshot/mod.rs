//! スナップショット取得モジュール
//!
//! 管理コンソールで当日のデータベーススナップショットを探し（なければ作成し）、
//! 完了を待ってダウンロードする

#[cfg(test)]
mod mock;
mod signature;
mod workflow;

pub use signature::SnapshotSignature;
pub use workflow::{
    download_target, SnapshotWorkflow, WorkflowState, LOGIN_LANDMARK_TIMEOUT, POLL_INTERVAL,
    POLL_TIMEOUT, SNAPSHOT_CREATE_WAIT, SNAPSHOT_LOOKUP_TIMEOUT,
};
