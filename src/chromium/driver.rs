//! chromiumoxide (CDP) による ConsoleDriver 実装

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SnapshotConfig;
use crate::error::SnapshotError;
use crate::traits::{ConsoleDriver, Download, Locator};

/// 要素操作（クリック・入力）前の表示待機（Playwrightのデフォルトと同じ30秒）
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);
/// 表示待機のポーリング間隔
const POLL_INTERVAL_MS: u64 = 500;
/// 探索した要素に付ける属性
const TARGET_SELECTOR: &str = "[data-snapshot-target]";

/// ラベル・ロール・行テキストで要素を探す
///
/// 戻り値は "missing" / "hidden" / "visible"。`spec.tag` なら見つけた要素に
/// `data-snapshot-target` を付ける
const LOCATE_SCRIPT: &str = r#"
(function (spec) {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const matches = (text, name, exact) =>
    exact ? norm(text) === name : norm(text).toLowerCase().includes(name.toLowerCase());
  const visible = (el) => {
    const style = window.getComputedStyle(el);
    return style.display !== 'none' && style.visibility !== 'hidden' && el.getClientRects().length > 0;
  };
  const accessibleName = (el) =>
    el.getAttribute('aria-label') || el.innerText || el.value || el.getAttribute('title') || '';
  const byRole = (root, role, name, exact) => {
    const selector = role === 'button'
      ? 'button, input[type=submit], input[type=button], [role=button]'
      : 'a[href], [role=link]';
    return Array.from(root.querySelectorAll(selector))
      .filter((el) => matches(accessibleName(el), name, exact));
  };
  const byLabel = (text, exact) => {
    const found = [];
    for (const label of document.querySelectorAll('label')) {
      if (!matches(label.innerText, text, exact)) continue;
      const control = label.control || (label.htmlFor && document.getElementById(label.htmlFor));
      if (control) found.push(control);
    }
    for (const el of document.querySelectorAll('input[aria-label], textarea[aria-label]')) {
      if (matches(el.getAttribute('aria-label'), text, exact)) found.push(el);
    }
    return found;
  };
  const rows = (signature) =>
    Array.from(document.querySelectorAll('table > tbody > tr'))
      .filter((tr) => norm(tr.innerText).toLowerCase().includes(norm(signature).toLowerCase()));

  let candidates = [];
  switch (spec.kind) {
    case 'label':
      candidates = byLabel(spec.text, spec.exact);
      break;
    case 'role':
      candidates = byRole(document, spec.role, spec.name, spec.exact);
      break;
    case 'row':
      candidates = rows(spec.signature);
      break;
    case 'row_link':
      candidates = rows(spec.signature).flatMap((tr) => byRole(tr, 'link', spec.name, false));
      break;
  }

  document.querySelectorAll('[data-snapshot-target]')
    .forEach((el) => el.removeAttribute('data-snapshot-target'));
  const target = candidates.find(visible) || candidates[0];
  if (!target) return 'missing';
  if (spec.tag) target.setAttribute('data-snapshot-target', '1');
  return visible(target) ? 'visible' : 'hidden';
})
"#;

const CLEAR_TARGET_SCRIPT: &str = r#"
(function() {
    var el = document.querySelector('[data-snapshot-target]');
    if (el && 'value' in el) {
        el.value = '';
        return true;
    }
    return false;
})()
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Missing,
    Hidden,
    Visible,
}

impl Presence {
    fn parse(value: &str) -> Self {
        match value {
            "visible" => Presence::Visible,
            "hidden" => Presence::Hidden,
            _ => Presence::Missing,
        }
    }
}

/// Locator をJSの探索条件に変換
fn locator_spec(locator: &Locator, tag: bool) -> serde_json::Value {
    match locator {
        Locator::Label { text, exact } => json!({
            "kind": "label", "text": text, "exact": exact, "tag": tag,
        }),
        Locator::Role { role, name, exact } => json!({
            "kind": "role", "role": role.as_str(), "name": name, "exact": exact, "tag": tag,
        }),
        Locator::SnapshotRow { signature } => json!({
            "kind": "row", "signature": signature, "tag": tag,
        }),
        Locator::RowLink { signature, name } => json!({
            "kind": "row_link", "signature": signature, "name": name, "tag": tag,
        }),
    }
}

fn locate_script(locator: &Locator, tag: bool) -> String {
    format!("{}({})", LOCATE_SCRIPT.trim(), locator_spec(locator, tag))
}

/// `timeout` まで探索を繰り返し、表示されれば true
///
/// ページ遷移中は実行コンテキストが破棄されて evaluate が失敗するため、
/// 探索のエラーは期限まで再試行する
async fn poll_until_visible<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Presence, SnapshotError>>,
{
    let start = Instant::now();
    loop {
        match check().await {
            Ok(Presence::Visible) => return true,
            Ok(_) => {}
            Err(e) => debug!("Element lookup failed, retrying: {}", e),
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}

/// 実行用の一時ディレクトリ（プロファイル・ダウンロード置き場）を削除
fn remove_temp_dirs(dirs: &[&Path]) {
    for dir in dirs {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            debug!("Failed to remove {:?}: {}", dir, e);
        }
    }
}

/// 実行ごとに一意な一時ディレクトリ
fn unique_temp_dir(prefix: &str) -> PathBuf {
    let unique_id = format!(
        "{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    std::env::temp_dir().join(format!("{}-{}", prefix, unique_id))
}

pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    download_dir: PathBuf,
    user_data_dir: PathBuf,
}

impl ChromiumDriver {
    /// ブラウザを起動し、ダウンロードを一時ディレクトリに受ける設定をする
    pub async fn launch(config: &SnapshotConfig) -> Result<Self, SnapshotError> {
        info!("Initializing browser...");

        let user_data_dir = unique_temp_dir("snapshot-downloader-profile");
        let download_dir = unique_temp_dir("snapshot-downloader-download");
        std::fs::create_dir_all(&download_dir)?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .window_size(1280, 800);

        // Chrome パスは環境変数があれば優先
        if let Ok(chrome_path) =
            std::env::var("CHROME_PATH").or_else(|_| std::env::var("CHROMIUM_PATH"))
        {
            builder = builder.chrome_executable(chrome_path);
        }

        if !config.headless {
            builder = builder.with_head();
        }

        let browser_config = builder
            .no_sandbox()
            .request_timeout(Duration::from_secs(60))
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .build()
            .map_err(|e| SnapshotError::BrowserInit(format!("browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SnapshotError::BrowserInit(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let download_params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(download_dir.to_string_lossy().to_string())
            .events_enabled(true)
            .build()
            .map_err(|e| SnapshotError::BrowserInit(format!("download behavior: {}", e)))?;

        browser
            .execute(download_params)
            .await
            .map_err(|e| SnapshotError::BrowserInit(format!("download behavior: {}", e)))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SnapshotError::BrowserInit(e.to_string()))?;

        info!("Browser initialized (downloads staged in {:?})", download_dir);
        Ok(Self {
            browser,
            page,
            handler,
            download_dir,
            user_data_dir,
        })
    }

    async fn presence(&self, locator: &Locator, tag: bool) -> Result<Presence, SnapshotError> {
        let script = locate_script(locator, tag);
        let result = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(|e| SnapshotError::JavaScript(format!("{}: {}", locator, e)))?;

        let state = result.into_value::<String>().unwrap_or_default();
        Ok(Presence::parse(&state))
    }

    async fn poll_visible(&self, locator: &Locator, timeout: Duration, tag: bool) -> bool {
        poll_until_visible(timeout, || self.presence(locator, tag)).await
    }

    /// 表示されるまで待ってから要素を取得
    ///
    /// タグ付け直後にページが遷移すると find_element が失敗するので、期限内は探し直す
    async fn resolve(&self, locator: &Locator) -> Result<Element, SnapshotError> {
        let start = Instant::now();
        loop {
            let remaining = ACTION_TIMEOUT.saturating_sub(start.elapsed());
            if self.poll_visible(locator, remaining, true).await {
                match self.page.find_element(TARGET_SELECTOR).await {
                    Ok(element) => return Ok(element),
                    Err(e) => debug!("{} lost before it could be used, retrying: {}", locator, e),
                }
            }

            if start.elapsed() >= ACTION_TIMEOUT {
                return Err(SnapshotError::ElementNotFound(format!(
                    "{} (timeout after {}s)",
                    locator,
                    ACTION_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }
}

#[async_trait]
impl ConsoleDriver for ChromiumDriver {
    async fn goto(&mut self, url: &str) -> Result<(), SnapshotError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| SnapshotError::Navigation(format!("{}: {}", url, e)))?;
        debug!("Navigated to {}", url);
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), SnapshotError> {
        let element = self.resolve(locator).await?;

        element
            .click()
            .await
            .map_err(|e| SnapshotError::ElementNotFound(format!("{}: {}", locator, e)))?;
        self.page
            .evaluate(CLEAR_TARGET_SCRIPT)
            .await
            .map_err(|e| SnapshotError::JavaScript(e.to_string()))?;
        element
            .type_str(value)
            .await
            .map_err(|e| SnapshotError::JavaScript(format!("typing into {}: {}", locator, e)))?;

        debug!("Filled {}", locator);
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), SnapshotError> {
        self.resolve(locator)
            .await?
            .click()
            .await
            .map_err(|e| SnapshotError::Navigation(format!("clicking {}: {}", locator, e)))?;

        debug!("Clicked {}", locator);
        Ok(())
    }

    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, SnapshotError> {
        // リロード直後の探索失敗は「未表示」として次のポーリングに回す
        match self.presence(locator, false).await {
            Ok(presence) => Ok(presence == Presence::Visible),
            Err(e) => {
                debug!("Element lookup failed, treating as not visible: {}", e);
                Ok(false)
            }
        }
    }

    async fn wait_for_visible(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<bool, SnapshotError> {
        Ok(self.poll_visible(locator, timeout, false).await)
    }

    async fn reload(&mut self) -> Result<(), SnapshotError> {
        self.page
            .reload()
            .await
            .map_err(|e| SnapshotError::Navigation(format!("reload: {}", e)))?;
        Ok(())
    }

    async fn pause(&mut self, duration: Duration) -> Result<(), SnapshotError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn click_and_wait_download(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Download, SnapshotError> {
        // クリック前に購読しておく
        let mut will_begin = self
            .browser
            .event_listener::<EventDownloadWillBegin>()
            .await
            .map_err(|e| SnapshotError::Download(e.to_string()))?;
        let mut progress = self
            .browser
            .event_listener::<EventDownloadProgress>()
            .await
            .map_err(|e| SnapshotError::Download(e.to_string()))?;

        self.click(locator).await?;

        let download_dir = self.download_dir.clone();
        let wait = async move {
            let begin = will_begin.next().await.ok_or_else(|| {
                SnapshotError::Download("download event stream closed".into())
            })?;
            info!(
                "Download started: {} ({})",
                begin.suggested_filename, begin.url
            );

            while let Some(event) = progress.next().await {
                if event.guid != begin.guid {
                    continue;
                }
                match event.state {
                    DownloadProgressState::Completed => {
                        debug!("Download completed: {} bytes", event.received_bytes);
                        return Ok(Download {
                            suggested_filename: begin.suggested_filename.clone(),
                            path: download_dir.join(&begin.guid),
                        });
                    }
                    DownloadProgressState::Canceled => {
                        return Err(SnapshotError::Download(format!(
                            "download of {} was canceled",
                            begin.suggested_filename
                        )));
                    }
                    DownloadProgressState::InProgress => {}
                }
            }

            Err(SnapshotError::Download(
                "download progress stream closed".into(),
            ))
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            SnapshotError::Timeout(format!(
                "download did not complete within {}s",
                timeout.as_secs()
            ))
        })?
    }

    async fn save_download(
        &mut self,
        download: &Download,
        target: &Path,
    ) -> Result<(), SnapshotError> {
        // 別ファイルシステムへの rename は失敗するのでコピーにフォールバック
        if let Err(e) = tokio::fs::rename(&download.path, target).await {
            debug!("rename failed ({}), copying instead", e);
            tokio::fs::copy(&download.path, target).await?;
            tokio::fs::remove_file(&download.path).await?;
        }

        info!("Saved download to {:?}", target);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SnapshotError> {
        info!("Closing browser...");

        self.browser
            .close()
            .await
            .map_err(|e| SnapshotError::BrowserInit(format!("close: {}", e)))?;
        if let Err(e) = self.browser.wait().await {
            debug!("Failed to wait for browser exit: {}", e);
        }
        self.handler.abort();
        remove_temp_dirs(&[&self.download_dir, &self.user_data_dir]);

        info!("Browser closed");
        Ok(())
    }
}
