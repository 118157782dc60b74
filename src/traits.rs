use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SnapshotError;

/// 要素のロール
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Button,
    Link,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Button => "button",
            Role::Link => "link",
        }
    }
}

/// ページ上の要素の指定方法
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// `<label>` テキストで指定する入力欄
    Label { text: String, exact: bool },
    /// ロールとアクセシブル名で指定するボタン・リンク
    Role { role: Role, name: String, exact: bool },
    /// 署名テキストを含むスナップショット一覧の行
    SnapshotRow { signature: String },
    /// スナップショット行の中のリンク
    RowLink { signature: String, name: String },
}

impl Locator {
    pub fn label(text: impl Into<String>) -> Self {
        Locator::Label {
            text: text.into(),
            exact: false,
        }
    }

    pub fn exact_label(text: impl Into<String>) -> Self {
        Locator::Label {
            text: text.into(),
            exact: true,
        }
    }

    pub fn button(name: impl Into<String>) -> Self {
        Locator::Role {
            role: Role::Button,
            name: name.into(),
            exact: false,
        }
    }

    pub fn exact_button(name: impl Into<String>) -> Self {
        Locator::Role {
            role: Role::Button,
            name: name.into(),
            exact: true,
        }
    }

    pub fn link(name: impl Into<String>) -> Self {
        Locator::Role {
            role: Role::Link,
            name: name.into(),
            exact: false,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Label { text, .. } => write!(f, "label \"{}\"", text),
            Locator::Role { role, name, .. } => write!(f, "{} \"{}\"", role.as_str(), name),
            Locator::SnapshotRow { signature } => write!(f, "row \"{}\"", signature),
            Locator::RowLink { signature, name } => {
                write!(f, "link \"{}\" in row \"{}\"", name, signature)
            }
        }
    }
}

/// 完了したダウンロード（保存前の一時ファイル）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub suggested_filename: String,
    pub path: PathBuf,
}

/// 管理コンソールを操作するブラウザドライバ
#[async_trait]
pub trait ConsoleDriver: Send {
    /// URLへ遷移
    async fn goto(&mut self, url: &str) -> Result<(), SnapshotError>;

    /// 入力欄に値を入力
    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), SnapshotError>;

    async fn click(&mut self, locator: &Locator) -> Result<(), SnapshotError>;

    /// 現時点で表示されているか（待機しない）
    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, SnapshotError>;

    /// `timeout` 以内に表示されれば true
    async fn wait_for_visible(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<bool, SnapshotError>;

    async fn reload(&mut self) -> Result<(), SnapshotError>;

    /// 固定時間の待機
    async fn pause(&mut self, duration: Duration) -> Result<(), SnapshotError>;

    /// ダウンロードイベントを購読してからクリックし、完了を待つ
    async fn click_and_wait_download(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Download, SnapshotError>;

    /// ダウンロードを `target` に保存（既存ファイルは上書き）
    async fn save_download(
        &mut self,
        download: &Download,
        target: &Path,
    ) -> Result<(), SnapshotError>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), SnapshotError>;
}
