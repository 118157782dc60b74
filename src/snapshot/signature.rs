use std::fmt;

use chrono::{NaiveDate, Utc};

const SIGNATURE_PREFIX: &str = "Data Committee Snapshot";

/// 当日のスナップショットを識別するラベル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSignature(String);

impl SnapshotSignature {
    pub fn for_date(date: NaiveDate) -> Self {
        Self(format!("{} {}", SIGNATURE_PREFIX, date.format("%Y-%m-%d")))
    }

    /// UTCの当日で計算
    pub fn today() -> Self {
        Self::for_date(Utc::now().date_naive())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
