//! Light/dark preference

use std::sync::Arc;

use serde_json::Value;

use crate::data::{KeyValueStore, THEME_KEY, ThemeMode};
use crate::error::Result;

/// Theme preference persisted in local storage
pub struct ThemePreference {
    storage: Arc<dyn KeyValueStore>,
}

impl ThemePreference {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Stored mode; light when unset or unrecognised
    pub fn get(&self) -> ThemeMode {
        self.storage
            .get(THEME_KEY)
            .and_then(|v| v.as_str().and_then(ThemeMode::parse))
            .unwrap_or_default()
    }

    pub fn set(&self, mode: ThemeMode) -> Result<()> {
        self.storage
            .set(THEME_KEY, Value::String(mode.as_str().to_string()))?;
        tracing::debug!(theme = mode.as_str(), "Theme changed");
        Ok(())
    }

    /// Switch to the other mode and return it
    pub fn toggle(&self) -> Result<ThemeMode> {
        let mode = self.get().toggled();
        self.set(mode)?;
        Ok(mode)
    }
}
