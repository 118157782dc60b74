//! スナップショット取得ワークフロー
//!
//! ログイン → スナップショット検索/作成 → 完了待ちポーリング → ダウンロード
//! を `WorkflowState` の遷移として1ステップずつ実行する

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::{Credentials, SnapshotConfig};
use crate::error::SnapshotError;
use crate::traits::{ConsoleDriver, Download, Locator};

use super::signature::SnapshotSignature;

/// 既存スナップショット行の検索待機
pub const SNAPSHOT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
/// スナップショット作成後、一覧に行が現れるまでの待機
pub const SNAPSHOT_CREATE_WAIT: Duration = Duration::from_secs(10);
/// ポーリング間隔
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);
/// ポーリング上限（10分）
pub const POLL_TIMEOUT: Duration = Duration::from_secs(600);
/// ログイン後のランドマーク待機
pub const LOGIN_LANDMARK_TIMEOUT: Duration = Duration::from_secs(30);

const DOWNLOAD_LINK: &str = "download";

/// ワークフローの状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Unauthenticated,
    Authenticated,
    SnapshotLocating,
    SnapshotPending,
    SnapshotReady,
    Downloading(Download),
    Done(PathBuf),
}

pub struct SnapshotWorkflow<D: ConsoleDriver> {
    driver: D,
    credentials: Credentials,
    login_url: String,
    output_dir: PathBuf,
    download_timeout: Duration,
    date: Option<NaiveDate>,
    signature: Option<SnapshotSignature>,
}

impl<D: ConsoleDriver> SnapshotWorkflow<D> {
    pub fn new(driver: D, config: &SnapshotConfig) -> Self {
        Self {
            driver,
            credentials: config.credentials.clone(),
            login_url: config.login_url.clone(),
            output_dir: config.output_dir.clone(),
            download_timeout: config.download_timeout,
            date: None,
            signature: None,
        }
    }

    /// 署名に使う日付を固定する（未指定ならUTCの当日）
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// 計算済みの署名（SnapshotLocating 以前は None）
    pub fn signature(&self) -> Option<&SnapshotSignature> {
        self.signature.as_ref()
    }

    /// Done まで実行し、保存したファイルのパスを返す
    pub async fn run(&mut self) -> Result<PathBuf, SnapshotError> {
        let mut state = WorkflowState::Unauthenticated;
        loop {
            state = match state {
                WorkflowState::Done(path) => {
                    self.driver.close().await?;
                    info!("Download finished: {}", path.display());
                    return Ok(path);
                }
                other => self.step(other).await?,
            };
        }
    }

    /// 1状態分の遷移
    pub async fn step(&mut self, state: WorkflowState) -> Result<WorkflowState, SnapshotError> {
        match state {
            WorkflowState::Unauthenticated => {
                self.login().await?;
                Ok(WorkflowState::Authenticated)
            }
            WorkflowState::Authenticated => {
                self.open_snapshot_listing().await?;
                Ok(WorkflowState::SnapshotLocating)
            }
            WorkflowState::SnapshotLocating => {
                self.locate_or_create_snapshot().await?;
                Ok(WorkflowState::SnapshotPending)
            }
            WorkflowState::SnapshotPending => {
                self.wait_until_ready().await?;
                Ok(WorkflowState::SnapshotReady)
            }
            WorkflowState::SnapshotReady => {
                let download = self.start_download().await?;
                Ok(WorkflowState::Downloading(download))
            }
            WorkflowState::Downloading(download) => {
                let path = self.save(&download).await?;
                Ok(WorkflowState::Done(path))
            }
            WorkflowState::Done(path) => Ok(WorkflowState::Done(path)),
        }
    }

    fn current_signature(&mut self) -> SnapshotSignature {
        let date = self.date;
        self.signature
            .get_or_insert_with(|| match date {
                Some(date) => SnapshotSignature::for_date(date),
                None => SnapshotSignature::today(),
            })
            .clone()
    }

    async fn login(&mut self) -> Result<(), SnapshotError> {
        info!("Navigating to {}", self.login_url);
        self.driver.goto(&self.login_url).await?;

        self.driver
            .fill(&Locator::label("Email"), &self.credentials.username)
            .await?;
        self.driver
            .fill(&Locator::exact_label("Password"), &self.credentials.password)
            .await?;

        info!("Logging in.");
        self.driver.click(&Locator::exact_button("Continue")).await?;

        if let Some(otp) = self.credentials.otp.clone() {
            info!("Sending OTP code.");
            self.driver
                .click(&Locator::button("Google Authenticator or similar"))
                .await?;
            self.driver.fill(&Locator::label("one-time code"), &otp).await?;
            self.driver.click(&Locator::exact_button("Continue")).await?;
        }

        // ログイン失敗を後続ステップの不明なエラーにしない
        let landmark = Locator::link("Settings");
        if !self
            .driver
            .wait_for_visible(&landmark, LOGIN_LANDMARK_TIMEOUT)
            .await?
        {
            return Err(SnapshotError::Login(format!(
                "{} not visible within {}s after login",
                landmark,
                LOGIN_LANDMARK_TIMEOUT.as_secs()
            )));
        }

        info!("Logged in.");
        Ok(())
    }

    async fn open_snapshot_listing(&mut self) -> Result<(), SnapshotError> {
        info!("Navigating to database snapshot page.");
        self.driver.click(&Locator::link("Settings")).await?;
        self.driver.click(&Locator::link("Database")).await?;
        Ok(())
    }

    async fn locate_or_create_snapshot(&mut self) -> Result<(), SnapshotError> {
        let signature = self.current_signature();
        let row = Locator::SnapshotRow {
            signature: signature.to_string(),
        };

        if self
            .driver
            .wait_for_visible(&row, SNAPSHOT_LOOKUP_TIMEOUT)
            .await?
        {
            info!("Snapshot \"{}\" found.", signature);
            return Ok(());
        }

        info!(
            "Expected snapshot \"{}\" not found, creating new snapshot.",
            signature
        );
        self.driver
            .fill(&Locator::label("Comment"), signature.as_str())
            .await?;
        self.driver
            .click(&Locator::button("Start database snapshot"))
            .await?;

        if !self
            .driver
            .wait_for_visible(&row, SNAPSHOT_CREATE_WAIT)
            .await?
        {
            warn!(
                "Snapshot \"{}\" not listed {}s after creation, polling anyway.",
                signature,
                SNAPSHOT_CREATE_WAIT.as_secs()
            );
        }
        Ok(())
    }

    async fn wait_until_ready(&mut self) -> Result<(), SnapshotError> {
        let signature = self.current_signature();
        let download_link = Locator::RowLink {
            signature: signature.to_string(),
            name: DOWNLOAD_LINK.to_string(),
        };

        let mut waited = Duration::ZERO;
        loop {
            if self.driver.is_visible(&download_link).await? {
                info!("Snapshot '{}' is ready.", signature);
                return Ok(());
            }

            info!("Waiting for '{}' to complete.", signature);
            waited += POLL_INTERVAL;
            if waited >= POLL_TIMEOUT {
                return Err(SnapshotError::Timeout(format!(
                    "download link for '{}' did not appear within {} minutes",
                    signature,
                    POLL_TIMEOUT.as_secs() / 60
                )));
            }

            self.driver.pause(POLL_INTERVAL).await?;
            self.driver.reload().await?;
        }
    }

    async fn start_download(&mut self) -> Result<Download, SnapshotError> {
        let signature = self.current_signature();
        info!(
            "Downloading '{}' to {}",
            signature,
            self.output_dir.display()
        );

        let download_link = Locator::RowLink {
            signature: signature.to_string(),
            name: DOWNLOAD_LINK.to_string(),
        };
        self.driver
            .click_and_wait_download(&download_link, self.download_timeout)
            .await
    }

    async fn save(&mut self, download: &Download) -> Result<PathBuf, SnapshotError> {
        let target = download_target(&self.output_dir, &download.suggested_filename)?;
        self.driver.save_download(download, &target).await?;
        Ok(target)
    }
}

/// 保存先パス（`output_dir/<提案ファイル名>`）
///
/// 提案ファイル名がディレクトリ成分を含む場合はエラー
pub fn download_target(output_dir: &Path, suggested_filename: &str) -> Result<PathBuf, SnapshotError> {
    let suggested = Path::new(suggested_filename);
    match suggested.file_name() {
        Some(name) if name == suggested.as_os_str() => Ok(output_dir.join(name)),
        _ => Err(SnapshotError::Download(format!(
            "unusable suggested filename: {:?}",
            suggested_filename
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::mock::{Call, MockDriver};

    const OUTPUT_DIR: &str = "/srv/snapshots";

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    fn test_config() -> SnapshotConfig {
        SnapshotConfig::new(
            Credentials::new("admin@example.org", "secret"),
            "https://example.nationbuilder.com/admin",
            OUTPUT_DIR,
        )
    }

    fn workflow(driver: MockDriver, config: &SnapshotConfig) -> SnapshotWorkflow<MockDriver> {
        SnapshotWorkflow::new(driver, config).with_date(test_date())
    }

    fn start_snapshot_button() -> Locator {
        Locator::button("Start database snapshot")
    }

    #[tokio::test]
    async fn test_existing_row_skips_creation() {
        let driver = MockDriver::new().with_existing_row().ready_on_check(1);
        let mut wf = workflow(driver, &test_config());

        wf.run().await.unwrap();

        let driver = wf.driver();
        assert_eq!(driver.count(|c| matches!(c, Call::Click(l) if *l == start_snapshot_button())), 0);
        assert_eq!(driver.count(|c| matches!(c, Call::Fill(l, _) if *l == Locator::label("Comment"))), 0);
        assert_eq!(driver.count(|c| matches!(c, Call::IsVisible(_))), 1);
        assert_eq!(driver.count(|c| matches!(c, Call::Reload)), 0);

        let row = Locator::SnapshotRow {
            signature: "Data Committee Snapshot 2024-03-05".into(),
        };
        assert!(driver
            .calls
            .contains(&Call::WaitForVisible(row, SNAPSHOT_LOOKUP_TIMEOUT)));
    }

    #[tokio::test]
    async fn test_missing_row_creates_snapshot_once() {
        let driver = MockDriver::new().ready_on_check(1);
        let mut wf = workflow(driver, &test_config());

        wf.run().await.unwrap();

        let driver = wf.driver();
        let fills: Vec<&String> = driver
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Fill(l, value) if *l == Locator::label("Comment") => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(fills, vec!["Data Committee Snapshot 2024-03-05"]);
        assert_eq!(driver.count(|c| matches!(c, Call::Click(l) if *l == start_snapshot_button())), 1);

        // 作成後は固定スリープではなく行の出現を待つ
        let row = Locator::SnapshotRow {
            signature: "Data Committee Snapshot 2024-03-05".into(),
        };
        assert!(driver
            .calls
            .contains(&Call::WaitForVisible(row, SNAPSHOT_CREATE_WAIT)));
    }

    #[tokio::test]
    async fn test_missing_row_not_listed_after_creation_still_polls() {
        let driver = MockDriver::new().without_row_after_create().ready_on_check(1);
        let mut wf = workflow(driver, &test_config());

        wf.run().await.unwrap();

        assert_eq!(wf.driver().count(|c| matches!(c, Call::IsVisible(_))), 1);
    }

    #[tokio::test]
    async fn test_polling_succeeds_on_third_check() {
        let driver = MockDriver::new().with_existing_row().ready_on_check(3);
        let mut wf = workflow(driver, &test_config());

        wf.run().await.unwrap();

        let driver = wf.driver();
        assert_eq!(driver.count(|c| matches!(c, Call::Reload)), 2);
        assert_eq!(driver.count(|c| matches!(c, Call::Pause(d) if *d == POLL_INTERVAL)), 2);
        assert_eq!(driver.count(|c| matches!(c, Call::ClickAndWaitDownload(_))), 1);
        assert_eq!(driver.count(|c| matches!(c, Call::Close)), 1);
    }

    #[tokio::test]
    async fn test_polling_times_out_after_sixty_checks() {
        let driver = MockDriver::new().with_existing_row();
        let mut wf = workflow(driver, &test_config());

        let err = wf.run().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Timeout(_)));

        let driver = wf.driver();
        assert_eq!(driver.count(|c| matches!(c, Call::IsVisible(_))), 60);
        assert_eq!(driver.count(|c| matches!(c, Call::Reload)), 59);
        assert_eq!(driver.count(|c| matches!(c, Call::ClickAndWaitDownload(_))), 0);
        assert_eq!(driver.count(|c| matches!(c, Call::Close)), 0);
    }

    #[tokio::test]
    async fn test_download_saved_under_suggested_filename() {
        let name = "Data Committee Snapshot 2024-03-05 (nation) #1.sql.gz";
        let driver = MockDriver::new()
            .with_existing_row()
            .ready_on_check(1)
            .with_suggested_filename(name);
        let mut wf = workflow(driver, &test_config());

        let saved = wf.run().await.unwrap();

        let expected = PathBuf::from(format!("{}/{}", OUTPUT_DIR, name));
        assert_eq!(saved, expected);
        assert!(wf.driver().calls.contains(&Call::SaveDownload(expected)));
    }

    #[tokio::test]
    async fn test_otp_sub_step() {
        let config = test_config().with_otp("654321");
        let driver = MockDriver::new().with_existing_row().ready_on_check(1);
        let mut wf = workflow(driver, &config);

        wf.run().await.unwrap();

        let driver = wf.driver();
        assert!(driver
            .calls
            .contains(&Call::Click(Locator::button("Google Authenticator or similar"))));
        assert!(driver.calls.contains(&Call::Fill(
            Locator::label("one-time code"),
            "654321".into()
        )));
        assert_eq!(
            driver.count(|c| matches!(c, Call::Click(l) if *l == Locator::exact_button("Continue"))),
            2
        );
    }

    #[tokio::test]
    async fn test_login_without_otp() {
        let driver = MockDriver::new().with_existing_row().ready_on_check(1);
        let mut wf = workflow(driver, &test_config());

        wf.run().await.unwrap();

        let driver = wf.driver();
        assert_eq!(
            driver.calls[..4],
            [
                Call::Goto("https://example.nationbuilder.com/admin".into()),
                Call::Fill(Locator::label("Email"), "admin@example.org".into()),
                Call::Fill(Locator::exact_label("Password"), "secret".into()),
                Call::Click(Locator::exact_button("Continue")),
            ]
        );
        assert_eq!(
            driver.count(|c| matches!(c, Call::Click(l) if *l == Locator::button("Google Authenticator or similar"))),
            0
        );
    }

    #[tokio::test]
    async fn test_login_failure_detected() {
        let driver = MockDriver::new().with_failed_login();
        let mut wf = workflow(driver, &test_config());

        let err = wf.run().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Login(_)));
        assert_eq!(
            wf.driver().count(|c| matches!(c, Call::Click(l) if *l == Locator::link("Database"))),
            0
        );
    }

    #[tokio::test]
    async fn test_state_transitions_in_order() {
        let driver = MockDriver::new().with_existing_row().ready_on_check(1);
        let mut wf = workflow(driver, &test_config());

        let mut state = WorkflowState::Unauthenticated;
        let mut seen = Vec::new();
        while !matches!(state, WorkflowState::Done(_)) {
            state = wf.step(state).await.unwrap();
            seen.push(std::mem::discriminant(&state));
        }

        let download = Download {
            suggested_filename: String::new(),
            path: PathBuf::new(),
        };
        let expected = [
            WorkflowState::Authenticated,
            WorkflowState::SnapshotLocating,
            WorkflowState::SnapshotPending,
            WorkflowState::SnapshotReady,
            WorkflowState::Downloading(download),
            WorkflowState::Done(PathBuf::new()),
        ]
        .iter()
        .map(std::mem::discriminant)
        .collect::<Vec<_>>();
        assert_eq!(seen, expected);
        assert_eq!(
            wf.signature().map(|s| s.as_str()),
            Some("Data Committee Snapshot 2024-03-05")
        );
    }

    #[tokio::test]
    async fn test_unusable_suggested_filename() {
        let driver = MockDriver::new()
            .with_existing_row()
            .ready_on_check(1)
            .with_suggested_filename("../outside.zip");
        let mut wf = workflow(driver, &test_config());

        let err = wf.run().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Download(_)));
        assert_eq!(wf.driver().count(|c| matches!(c, Call::SaveDownload(_))), 0);
    }

    #[test]
    fn test_download_target() {
        let dir = Path::new("/data/out");
        assert_eq!(
            download_target(dir, "nation snapshot.zip").unwrap(),
            PathBuf::from("/data/out/nation snapshot.zip")
        );
        assert!(download_target(dir, "").is_err());
        assert!(download_target(dir, "a/b.zip").is_err());
    }
}
