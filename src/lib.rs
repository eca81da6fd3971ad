//! Mapsnap
//!
//! A headless, asynchronous map snapshot service. A [`Snapshotter`] owns one
//! map session on a dedicated worker thread; configuration calls and
//! snapshot requests are queued to that worker and applied strictly in
//! order, and each snapshot result is handed back to a caller-supplied
//! consumer exactly once.
//!
//! # Features
//!
//! - **Actor-confined session**: all state lives on one worker thread, so
//!   the handle is usable from any thread without locks
//! - **Exactly-once delivery**: every snapshot request gets one result,
//!   including a cancellation when the session shuts down first
//! - **HTTP styles** (default `http` feature): load styles over `http(s)://`
//!
//! # Example
//!
//! ```no_run
//! use mapsnap::{CameraOptions, SessionConfig, Size, Snapshotter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig {
//!     size: Size::new(512, 512),
//!     camera: CameraOptions::default().with_zoom(2.0),
//!     ..Default::default()
//! };
//!
//! let snapshotter = Snapshotter::new(config)?;
//! snapshotter.set_camera_options(CameraOptions::default().with_zoom(5.0));
//! let snapshot = snapshotter.snapshot_blocking()?;
//! std::fs::write("map.png", snapshot.image.to_png()?)?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod geo;
pub mod image;
pub mod style;
pub mod surface;

pub mod completion;
pub mod map;

mod actor;
pub mod snapshotter;

pub use completion::{Completion, MapSnapshot, RenderResult};
pub use geo::{Camera, CameraOptions, EdgeInsets, LatLng, LatLngBounds, Size};
pub use image::PremultipliedImage;
pub use snapshotter::{Snapshotter, SnapshotterBuilder};

/// Configuration a snapshot session is constructed with
///
/// Every field can be changed later through the matching [`Snapshotter`]
/// setter, except the insets, cache directory and timeouts.
///
/// # Examples
///
/// ```
/// let cfg = mapsnap::SessionConfig::default();
/// assert_eq!(cfg.pixel_ratio, 1.0);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Style locator: path, `file://`, `http(s)://`, `data:` URL or inline JSON
    pub style: String,
    /// Output size in logical pixels
    pub size: Size,
    /// Physical pixels per logical pixel
    pub pixel_ratio: f32,
    /// Initial camera; unset fields keep their defaults
    pub camera: CameraOptions,
    /// Region to frame after the camera is applied
    pub region: Option<LatLngBounds>,
    /// Padding used when framing a region
    pub region_insets: EdgeInsets,
    /// Directory for compiled draw programs
    pub program_cache_dir: Option<PathBuf>,
    /// How long a render may wait for its style, in milliseconds
    pub style_timeout_ms: u64,
    /// How long a render may wait for the surface, in milliseconds
    pub render_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            style: style::DEFAULT_STYLE.to_string(),
            size: Size::default(),
            pixel_ratio: 1.0,
            camera: CameraOptions::default(),
            region: None,
            region_insets: EdgeInsets::default(),
            program_cache_dir: None,
            style_timeout_ms: 30000,
            render_timeout_ms: 30000,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    /// Check the invariants construction relies on.
    pub fn validate(&self) -> Result<()> {
        if self.size.is_empty() {
            return Err(Error::ConfigError(format!(
                "size {}x{} must be positive",
                self.size.width, self.size.height
            )));
        }
        if !(self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0) {
            return Err(Error::ConfigError(format!(
                "pixel ratio {} must be positive",
                self.pixel_ratio
            )));
        }
        Ok(())
    }
}
