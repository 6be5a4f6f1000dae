//! Configuration surface, persisted through the `user_settings` table.

use crate::{AppError, AppResult};
use clipsync_storage::SettingsStore;
use std::time::Duration;

const KEY_POLL_INTERVAL: &str = "poll_interval_ms";
const KEY_SYNC_INTERVAL: &str = "sync_interval_secs";
const KEY_MAX_ITEMS: &str = "max_items";
const KEY_ENCRYPTION: &str = "encryption_enabled";
const KEY_TEXT_ONLY: &str = "text_only";

/// Recognized options, all range-checked by [`AppConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Capture poll interval in milliseconds, within [100, 2000].
    pub poll_interval_ms: u64,
    /// Periodic drain interval in seconds, within [5, 300].
    pub sync_interval_secs: u64,
    /// Active item cap, within [10, 500]. Eviction keeps the store under it.
    pub max_items: usize,
    /// Encrypt item content at rest and on the wire.
    pub encryption_enabled: bool,
    /// Capture only `text/*` clipboard content.
    pub text_only: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            sync_interval_secs: 30,
            max_items: 100,
            encryption_enabled: true,
            text_only: false,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> AppResult<()> {
        if !(100..=2000).contains(&self.poll_interval_ms) {
            return Err(AppError::Config(format!(
                "poll_interval_ms {} outside [100, 2000]",
                self.poll_interval_ms
            )));
        }
        if !(5..=300).contains(&self.sync_interval_secs) {
            return Err(AppError::Config(format!(
                "sync_interval_secs {} outside [5, 300]",
                self.sync_interval_secs
            )));
        }
        if !(10..=500).contains(&self.max_items) {
            return Err(AppError::Config(format!(
                "max_items {} outside [10, 500]",
                self.max_items
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Loads the config from settings, falling back to defaults for
    /// unset keys. Unparseable or out-of-range stored values are
    /// rejected, not clamped.
    pub fn load(settings: &SettingsStore) -> AppResult<Self> {
        let mut config = Self::default();
        if let Some(v) = settings.get(KEY_POLL_INTERVAL)? {
            config.poll_interval_ms = parse(KEY_POLL_INTERVAL, &v)?;
        }
        if let Some(v) = settings.get(KEY_SYNC_INTERVAL)? {
            config.sync_interval_secs = parse(KEY_SYNC_INTERVAL, &v)?;
        }
        if let Some(v) = settings.get(KEY_MAX_ITEMS)? {
            config.max_items = parse(KEY_MAX_ITEMS, &v)?;
        }
        if let Some(v) = settings.get(KEY_ENCRYPTION)? {
            config.encryption_enabled = parse(KEY_ENCRYPTION, &v)?;
        }
        if let Some(v) = settings.get(KEY_TEXT_ONLY)? {
            config.text_only = parse(KEY_TEXT_ONLY, &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validates, then persists every option.
    pub fn save(&self, settings: &SettingsStore) -> AppResult<()> {
        self.validate()?;
        settings.set(KEY_POLL_INTERVAL, &self.poll_interval_ms.to_string())?;
        settings.set(KEY_SYNC_INTERVAL, &self.sync_interval_secs.to_string())?;
        settings.set(KEY_MAX_ITEMS, &self.max_items.to_string())?;
        settings.set(KEY_ENCRYPTION, &self.encryption_enabled.to_string())?;
        settings.set(KEY_TEXT_ONLY, &self.text_only.to_string())?;
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> AppResult<T> {
    value
        .parse()
        .map_err(|_| AppError::Config(format!("{key}: cannot parse {value:?}")))
}
