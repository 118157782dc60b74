//! テスト用の記録ドライバ

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SnapshotError;
use crate::traits::{ConsoleDriver, Download, Locator, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Goto(String),
    Fill(Locator, String),
    Click(Locator),
    IsVisible(Locator),
    WaitForVisible(Locator, Duration),
    Reload,
    Pause(Duration),
    ClickAndWaitDownload(Locator),
    SaveDownload(PathBuf),
    Close,
}

pub struct MockDriver {
    pub calls: Vec<Call>,
    row_listed: bool,
    create_lists_row: bool,
    login_succeeds: bool,
    ready_on_check: Option<usize>,
    suggested_filename: String,
    download_checks: usize,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            row_listed: false,
            create_lists_row: true,
            login_succeeds: true,
            ready_on_check: None,
            suggested_filename: "nation-snapshot.sql.gz".to_string(),
            download_checks: 0,
        }
    }

    pub fn with_existing_row(mut self) -> Self {
        self.row_listed = true;
        self
    }

    pub fn without_row_after_create(mut self) -> Self {
        self.create_lists_row = false;
        self
    }

    pub fn with_failed_login(mut self) -> Self {
        self.login_succeeds = false;
        self
    }

    /// n回目（1始まり）の確認でダウンロードリンクが表示される
    pub fn ready_on_check(mut self, n: usize) -> Self {
        self.ready_on_check = Some(n);
        self
    }

    pub fn with_suggested_filename(mut self, name: impl Into<String>) -> Self {
        self.suggested_filename = name.into();
        self
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn visible(&self, locator: &Locator) -> bool {
        match locator {
            Locator::SnapshotRow { .. } => self.row_listed,
            Locator::Role {
                role: Role::Link,
                name,
                ..
            } if name == "Settings" => self.login_succeeds,
            _ => true,
        }
    }
}

#[async_trait]
impl ConsoleDriver for MockDriver {
    async fn goto(&mut self, url: &str) -> Result<(), SnapshotError> {
        self.calls.push(Call::Goto(url.to_string()));
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), SnapshotError> {
        self.calls.push(Call::Fill(locator.clone(), value.to_string()));
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), SnapshotError> {
        if *locator == Locator::button("Start database snapshot") && self.create_lists_row {
            self.row_listed = true;
        }
        self.calls.push(Call::Click(locator.clone()));
        Ok(())
    }

    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, SnapshotError> {
        self.calls.push(Call::IsVisible(locator.clone()));
        if let Locator::RowLink { .. } = locator {
            self.download_checks += 1;
            return Ok(self
                .ready_on_check
                .map_or(false, |n| self.download_checks >= n));
        }
        Ok(self.visible(locator))
    }

    async fn wait_for_visible(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<bool, SnapshotError> {
        self.calls
            .push(Call::WaitForVisible(locator.clone(), timeout));
        Ok(self.visible(locator))
    }

    async fn reload(&mut self) -> Result<(), SnapshotError> {
        self.calls.push(Call::Reload);
        Ok(())
    }

    async fn pause(&mut self, duration: Duration) -> Result<(), SnapshotError> {
        self.calls.push(Call::Pause(duration));
        Ok(())
    }

    async fn click_and_wait_download(
        &mut self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<Download, SnapshotError> {
        self.calls.push(Call::ClickAndWaitDownload(locator.clone()));
        Ok(Download {
            suggested_filename: self.suggested_filename.clone(),
            path: PathBuf::from("/tmp/snapshot-staging/0d5c7a4e"),
        })
    }

    async fn save_download(
        &mut self,
        _download: &Download,
        target: &Path,
    ) -> Result<(), SnapshotError> {
        self.calls.push(Call::SaveDownload(target.to_path_buf()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SnapshotError> {
        self.calls.push(Call::Close);
        Ok(())
    }
}
