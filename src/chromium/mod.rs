//! Chromium ドライバモジュール

mod driver;

pub use driver::ChromiumDriver;
