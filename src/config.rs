// src/config.rs

//! Defines the configuration structures for the imaging layer.
//!
//! Settings are grouped into sections that can be deserialized from a JSON
//! file. Every section carries `#[serde(default)]`, so a partial file only
//! overrides what it names. The process-wide [`CONFIG`] reads the file named
//! by the `IMAGING_BRIDGE_CONFIG` environment variable, falling back to the
//! defaults when it is unset or unreadable.

use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "IMAGING_BRIDGE_CONFIG";

/// Global configuration, loaded on first access.
pub static CONFIG: Lazy<Config> = Lazy::new(|| match std::env::var(CONFIG_ENV_VAR) {
    Ok(path) => Config::load(&path).unwrap_or_else(|e| {
        warn!("Config: failed to load '{}': {:#}. Using defaults.", path, e);
        Config::default()
    }),
    Err(_) => Config::default(),
});

// --- Top-Level Configuration Structure ---

/// Root of the configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Double-buffered bitmap behaviour.
    pub bitmap: BitmapConfig,
    /// Decoded-image cache.
    pub cache: CacheConfig,
    /// Compositor thread and channel.
    pub compositor: CompositorConfig,
    /// Defaults for encoder option bags.
    pub encoder: EncoderConfig,
}

impl Config {
    /// Parses a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Config: loaded {}", path.display());
        Ok(config)
    }
}

// --- Bitmap Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BitmapConfig {
    /// Timeout used by self-locking writes (`update_pixels`).
    pub default_lock_timeout_ms: u64,
    /// DPI assigned when a caller does not specify one.
    pub default_dpi: f64,
    /// Number of separate dirty rects kept before collapsing to a bounding box.
    pub max_dirty_rects: usize,
}

impl BitmapConfig {
    pub fn default_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.default_lock_timeout_ms)
    }
}

impl Default for BitmapConfig {
    fn default() -> Self {
        BitmapConfig {
            default_lock_timeout_ms: 1000,
            default_dpi: 96.0,
            max_dirty_rects: 16,
        }
    }
}

// --- Cache Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum number of URIs tracked before least-recently-used eviction.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            capacity: 64,
        }
    }
}

// --- Compositor Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompositorConfig {
    /// Capacity of the command channel. 1 keeps at most one batch in flight.
    pub channel_capacity: usize,
    pub thread_name: String,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        CompositorConfig {
            channel_capacity: 1,
            thread_name: "compositor".to_string(),
        }
    }
}

// --- Encoder Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    pub png_interlace: bool,
    /// One of "none", "ccitt3", "ccitt4", "lzw", "rle", "zip".
    pub tiff_compression: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            jpeg_quality: 75,
            png_interlace: false,
            tiff_compression: "none".to_string(),
        }
    }
}
