use std::path::PathBuf;
use std::time::Duration;

use crate::error::SnapshotError;

/// ダウンロードイベント待機のデフォルト上限
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// ログイン認証情報
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub otp: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            otp: None,
        }
    }

    /// パスワードを環境変数から解決する
    ///
    /// 未設定または空の場合はブラウザに触れる前に `SnapshotError::Config` を返す
    pub fn from_env(
        username: impl Into<String>,
        password_var: &str,
        otp: Option<String>,
    ) -> Result<Self, SnapshotError> {
        let password = match std::env::var(password_var) {
            Ok(value) if !value.is_empty() => value,
            Ok(_) => {
                return Err(SnapshotError::Config(format!(
                    "Environment variable {} is empty",
                    password_var
                )))
            }
            Err(_) => {
                return Err(SnapshotError::Config(format!(
                    "Environment variable {} is not set",
                    password_var
                )))
            }
        };

        Ok(Self {
            username: username.into(),
            password,
            otp: otp.filter(|code| !code.is_empty()),
        })
    }
}

// パスワード・OTPはログに出さない
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("otp", &self.otp.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub credentials: Credentials,
    pub login_url: String,
    pub output_dir: PathBuf,
    pub headless: bool,
    pub download_timeout: Duration,
}

impl SnapshotConfig {
    pub fn new(
        credentials: Credentials,
        login_url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            credentials,
            login_url: login_url.into(),
            output_dir: output_dir.into(),
            headless: true,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    pub fn with_otp(mut self, otp: impl Into<String>) -> Self {
        self.credentials.otp = Some(otp.into());
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// ブラウザ起動前の検証（出力先ディレクトリは作成しない）
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.credentials.password.is_empty() {
            return Err(SnapshotError::Config("password is empty".into()));
        }
        if self.login_url.trim().is_empty() {
            return Err(SnapshotError::Config("login URL is empty".into()));
        }
        if !self.output_dir.is_dir() {
            return Err(SnapshotError::Config(format!(
                "output directory does not exist: {}",
                self.output_dir.display()
            )));
        }
        Ok(())
    }
}
