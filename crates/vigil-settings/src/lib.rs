//! # vigil-settings
//!
//! Configuration with layered sources for the Vigil agent.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VigilSettings::default()`]
//! 2. **User file**: `~/.vigil/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `VIGIL_*` overrides
//!
//! The process-wide copy lives in a [`SettingsCache`]: loaded once on first
//! use, handed out as an immutable `Arc`, and only ever reloaded through the
//! test-only [`invalidate_settings`] hook.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::warn;

// ─────────────────────────────────────────────────────────────────────────────
// SettingsCache
// ─────────────────────────────────────────────────────────────────────────────

/// Load-once cache of immutable settings.
pub struct SettingsCache {
    path: Option<PathBuf>,
    slot: RwLock<Option<Arc<VigilSettings>>>,
}

impl SettingsCache {
    /// Cache reading from the default settings path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: None,
            slot: RwLock::new(None),
        }
    }

    /// Cache reading from an explicit path.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            slot: RwLock::new(None),
        }
    }

    /// Return the cached settings, loading them on first use.
    ///
    /// A load failure is logged and compiled defaults are cached instead, so
    /// every caller observes the same value.
    pub fn get(&self) -> Arc<VigilSettings> {
        if let Some(settings) = self.slot.read().as_ref() {
            return Arc::clone(settings);
        }
        let mut slot = self.slot.write();
        if let Some(settings) = slot.as_ref() {
            return Arc::clone(settings);
        }
        let path = self.path.clone().unwrap_or_else(settings_path);
        let loaded = load_settings_from_path(&path).unwrap_or_else(|e| {
            warn!(?path, error = %e, "failed to load settings, using defaults");
            VigilSettings::default()
        });
        let settings = Arc::new(loaded);
        *slot = Some(Arc::clone(&settings));
        settings
    }

    /// Seed the cache with a value. Returns `false` if already loaded.
    pub fn init(&self, settings: VigilSettings) -> bool {
        let mut slot = self.slot.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::new(settings));
        true
    }

    /// Drop the cached value so the next [`get`](Self::get) reloads.
    #[cfg(any(test, feature = "test-support"))]
    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new()
    }
}

static SETTINGS: LazyLock<SettingsCache> = LazyLock::new(SettingsCache::new);

/// Get the process-wide settings.
pub fn get_settings() -> Arc<VigilSettings> {
    SETTINGS.get()
}

/// Seed the process-wide settings before first use (e.g. from a CLI flag).
///
/// Returns `false` if settings were already loaded.
pub fn init_settings(settings: VigilSettings) -> bool {
    SETTINGS.init(settings)
}

/// Forget the process-wide settings. Tests only.
#[cfg(any(test, feature = "test-support"))]
pub fn invalidate_settings() {
    SETTINGS.invalidate();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
