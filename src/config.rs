//! Centralized configuration for the CBM engine.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - CbmConfig::from_env() reads the CBM_* env vars; fluent with_* setters
//!   override individual fields.
//!
//! Usage:
//!   let cfg = CbmConfig::from_env()
//!       .with_max_file_size(16 * 1024 * 1024)
//!       .with_max_free_pages(256);

use std::fmt;

use crate::consts::{DEFAULT_MAX_CBM_FILE_SIZE, DEFAULT_MAX_FREE_PAGES};

/// Top-level configuration for the CBM writer/merger.
#[derive(Clone, Debug)]
pub struct CbmConfig {
    /// Whether force-track requests are accepted at all.
    /// Env: CBM_ENABLE_TRACKING (default true; "0|false|off|no" => false)
    pub enable_tracking: bool,

    /// Rotation threshold for the output file, bytes.
    /// Env: CBM_MAX_FILE_SIZE (default 8 MiB)
    pub max_file_size: u64,

    /// Free-page list cap; above it the whole page arena is released
    /// at the end of a writer cycle.
    /// Env: CBM_MAX_FREE_PAGES (default 1024)
    pub max_free_pages: usize,
}

impl Default for CbmConfig {
    fn default() -> Self {
        Self {
            enable_tracking: true,
            max_file_size: DEFAULT_MAX_CBM_FILE_SIZE,
            max_free_pages: DEFAULT_MAX_FREE_PAGES,
        }
    }
}

impl CbmConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("CBM_ENABLE_TRACKING") {
            let s = v.trim().to_ascii_lowercase();
            cfg.enable_tracking = !(s == "0" || s == "false" || s == "off" || s == "no");
        }

        if let Ok(v) = std::env::var("CBM_MAX_FILE_SIZE") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.max_file_size = n;
            }
        }

        if let Ok(v) = std::env::var("CBM_MAX_FREE_PAGES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.max_free_pages = n;
            }
        }

        cfg
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_enable_tracking(mut self, on: bool) -> Self {
        self.enable_tracking = on;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_max_free_pages(mut self, pages: usize) -> Self {
        self.max_free_pages = pages;
        self
    }
}

impl fmt::Display for CbmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CbmConfig {{ enable_tracking: {}, max_file_size: {}, max_free_pages: {} }}",
            self.enable_tracking, self.max_file_size, self.max_free_pages
        )
    }
}
