//! The map session: camera, style, size and region state plus the logic
//! that drives one still render.
//!
//! A `MapSession` is not synchronized. It is owned by exactly one session
//! actor and only ever touched from that actor's worker thread.

use crate::completion::{MapSnapshot, RenderResult};
use crate::geo::{camera_for_bounds, Camera, CameraOptions, EdgeInsets, LatLngBounds, Size, Transform};
use crate::style::{Style, StyleLoader};
use crate::surface::{RenderSurface, Scene, SurfaceFactory, SurfaceOptions};
use crate::{Error, Result, SessionConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often a blocked wait re-checks the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_millis(20);

enum StyleState {
    Loading {
        locator: String,
        rx: Receiver<Result<Arc<Style>>>,
        started: Instant,
    },
    Ready(Arc<Style>),
    Failed(Error),
}

enum Wait<T> {
    Done(T),
    TimedOut,
    Disconnected,
    Cancelled,
}

fn wait_for<T>(rx: &Receiver<T>, deadline: Instant, closing: &AtomicBool) -> Wait<T> {
    loop {
        match rx.try_recv() {
            Ok(v) => return Wait::Done(v),
            Err(TryRecvError::Disconnected) => return Wait::Disconnected,
            Err(TryRecvError::Empty) => {}
        }
        if closing.load(Ordering::Acquire) {
            return Wait::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return Wait::TimedOut;
        }
        match rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
            Ok(v) => return Wait::Done(v),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Wait::Disconnected,
        }
    }
}

pub struct MapSession {
    camera: Camera,
    size: Size,
    pixel_ratio: f32,
    region_insets: EdgeInsets,
    style_timeout: Duration,
    render_timeout: Duration,
    style: StyleState,
    /// Last rejected size, cleared by a valid one or reported by the next render
    size_error: Option<Error>,
    /// Last rejected region, cleared by a valid one or reported by the next render
    region_error: Option<Error>,
    surface: Box<dyn RenderSurface>,
    loader: Arc<dyn StyleLoader>,
    closing: Arc<AtomicBool>,
}

impl MapSession {
    /// Create the surface, start loading the initial style, apply the initial
    /// camera and then the region if one is configured.
    pub fn new(
        config: &SessionConfig,
        surface_factory: SurfaceFactory,
        loader: Arc<dyn StyleLoader>,
        closing: Arc<AtomicBool>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::ConstructionFailure(e.to_string()))?;

        let options = SurfaceOptions {
            size: config.size,
            pixel_ratio: config.pixel_ratio,
            program_cache_dir: config.program_cache_dir.clone(),
        };
        let surface = surface_factory(&options).map_err(|e| match e {
            Error::ConstructionFailure(_) => e,
            other => Error::ConstructionFailure(other.to_string()),
        })?;

        let mut session = Self {
            camera: Camera::default(),
            size: config.size,
            pixel_ratio: config.pixel_ratio,
            region_insets: config.region_insets,
            style_timeout: Duration::from_millis(config.style_timeout_ms),
            render_timeout: Duration::from_millis(config.render_timeout_ms),
            style: StyleState::Failed(Error::StyleLoadFailure("No style set".into())),
            size_error: None,
            region_error: None,
            surface,
            loader,
            closing,
        };

        session.apply_style(&config.style);
        session.apply_camera(&config.camera);
        if let Some(region) = &config.region {
            session.apply_region(region);
        }
        Ok(session)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Begin (re)loading the style. Any load still in flight is superseded.
    pub fn apply_style(&mut self, locator: &str) {
        log::info!("loading style {}", summarize(locator));
        let (tx, rx) = mpsc::channel();
        self.loader.load(
            locator,
            Box::new(move |res| {
                // The session may have moved on to another style.
                let _ = tx.send(res);
            }),
        );
        self.style = StyleState::Loading {
            locator: summarize(locator).to_string(),
            rx,
            started: Instant::now(),
        };
    }

    /// Resize the viewport and the backing surface together.
    pub fn apply_size(&mut self, size: Size) {
        match self.surface.resize(size, self.pixel_ratio) {
            Ok(()) => {
                self.size = size;
                self.size_error = None;
            }
            Err(e) => {
                log::warn!("rejecting size {}x{}: {}", size.width, size.height, e);
                self.size_error = Some(e);
            }
        }
    }

    pub fn apply_camera(&mut self, options: &CameraOptions) {
        self.camera.jump_to(options);
    }

    /// Frame `bounds` in the current viewport. Failures surface on the next
    /// render as `InvalidRegion`.
    pub fn apply_region(&mut self, bounds: &LatLngBounds) {
        match camera_for_bounds(bounds, &self.region_insets, self.size) {
            Ok(options) => {
                self.apply_camera(&options);
                self.region_error = None;
            }
            Err(e) => {
                log::warn!("{}", e);
                self.region_error = Some(e);
            }
        }
    }

    /// Render one still frame once the style is settled.
    pub fn render_once(&mut self) -> RenderResult {
        // Both are reported by this render only; a bad region outranks a bad size.
        let size_error = self.size_error.take();
        if let Some(e) = self.region_error.take().or(size_error) {
            return Err(e);
        }
        let style = self.wait_for_style()?;

        let scene = Scene {
            style: &style,
            transform: Transform::new(self.camera, self.size),
        };
        let (tx, rx) = mpsc::channel();
        self.surface.render_still(
            &scene,
            Box::new(move |res| {
                let _ = tx.send(res);
            }),
        );

        let deadline = Instant::now() + self.render_timeout;
        match wait_for(&rx, deadline, &self.closing) {
            Wait::Done(Ok(())) => {}
            Wait::Done(Err(e @ Error::RenderFailure(_))) => return Err(e),
            Wait::Done(Err(e)) => return Err(Error::RenderFailure(e.to_string())),
            Wait::TimedOut => {
                return Err(Error::RenderFailure(format!(
                    "Timed out after {}ms waiting for a frame",
                    self.render_timeout.as_millis()
                )))
            }
            Wait::Disconnected => {
                return Err(Error::RenderFailure(
                    "Surface dropped the frame without completing it".into(),
                ))
            }
            Wait::Cancelled => return Err(Error::CancelledDelivery),
        }

        let image = self.surface.read_image()?;
        Ok(MapSnapshot {
            image,
            camera: self.camera,
            style_name: style.name.clone(),
            pixel_ratio: self.pixel_ratio,
        })
    }

    fn wait_for_style(&mut self) -> Result<Arc<Style>> {
        let settled = match &self.style {
            StyleState::Ready(style) => return Ok(style.clone()),
            StyleState::Failed(e) => return Err(e.clone()),
            StyleState::Loading {
                locator,
                rx,
                started,
            } => match wait_for(rx, *started + self.style_timeout, &self.closing) {
                Wait::Done(Ok(style)) => StyleState::Ready(style),
                Wait::Done(Err(e)) => StyleState::Failed(e),
                Wait::TimedOut => StyleState::Failed(Error::StyleLoadFailure(format!(
                    "Timed out after {}ms loading {}",
                    self.style_timeout.as_millis(),
                    locator
                ))),
                Wait::Disconnected => StyleState::Failed(Error::StyleLoadFailure(format!(
                    "Loader abandoned {}",
                    locator
                ))),
                // Leave the load pending; the session is going away.
                Wait::Cancelled => return Err(Error::CancelledDelivery),
            },
        };
        self.style = settled;
        self.wait_for_style()
    }
}

fn summarize(locator: &str) -> &str {
    let line = locator.trim().lines().next().unwrap_or_default();
    match line.char_indices().nth(64) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
