//! Off-screen render surfaces.
//!
//! [`RenderSurface`] is the collaborator a map session draws through.
//! [`HeadlessSurface`] is the built-in CPU implementation: it compiles a
//! style into a small draw program, optionally caches that program on
//! disk, and rasterizes it into a [`PremultipliedImage`].

use crate::geo::{Size, Transform};
use crate::image::PremultipliedImage;
use crate::style::{Color, Geometry, LayerKind, Style};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest physical edge length a surface will allocate
pub const MAX_TEXTURE_SIZE: u32 = 8192;

/// Completion callback for [`RenderSurface::render_still`]
pub type RenderCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Builds the surface on the session worker during construction.
pub type SurfaceFactory =
    Box<dyn FnOnce(&SurfaceOptions) -> Result<Box<dyn RenderSurface>> + Send + 'static>;

/// Parameters a surface is created with
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceOptions {
    pub size: Size,
    pub pixel_ratio: f32,
    pub program_cache_dir: Option<PathBuf>,
}

/// Everything needed to draw one still frame
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub style: &'a Style,
    pub transform: Transform,
}

/// An off-screen buffer producing still frames.
pub trait RenderSurface {
    /// Resize the backing buffer. Never called while a frame is in flight.
    fn resize(&mut self, size: Size, pixel_ratio: f32) -> Result<()>;

    /// Draw `scene`; `on_complete` receives the outcome exactly once.
    fn render_still(&mut self, scene: &Scene<'_>, on_complete: RenderCallback);

    /// The finished frame. Only valid right after a successful `render_still`.
    fn read_image(&mut self) -> Result<PremultipliedImage>;
}

/// One compiled drawing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Clear { color: Color },
    Circles { source: String, color: Color, radius: f64 },
    Lines { source: String, color: Color, width: f64 },
}

/// The draw program compiled from a style's layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub fingerprint: String,
    pub ops: Vec<DrawOp>,
}

impl Program {
    pub fn compile(style: &Style) -> Program {
        let mut ops = Vec::new();
        for layer in &style.layers {
            let source = layer.source.clone().unwrap_or_default();
            match layer.kind {
                LayerKind::Background => ops.push(DrawOp::Clear {
                    color: layer.paint.background_color.unwrap_or(Color::BLACK),
                }),
                LayerKind::Circle if !source.is_empty() => ops.push(DrawOp::Circles {
                    source,
                    color: layer.paint.circle_color.unwrap_or(Color::BLACK),
                    radius: layer.paint.circle_radius.unwrap_or(5.0).max(0.0),
                }),
                LayerKind::Line if !source.is_empty() => ops.push(DrawOp::Lines {
                    source,
                    color: layer.paint.line_color.unwrap_or(Color::BLACK),
                    width: layer.paint.line_width.unwrap_or(1.0).max(0.0),
                }),
                _ => log::debug!("layer '{}' is not drawn by the headless surface", layer.id),
            }
        }
        Program {
            fingerprint: style.fingerprint.clone(),
            ops,
        }
    }
}

/// Compiled programs stored as `<fingerprint>.program.json`
#[derive(Debug, Clone)]
pub struct ProgramCache {
    dir: PathBuf,
}

impl ProgramCache {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::ConstructionFailure(format!(
                "Cannot create program cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.program.json", fingerprint))
    }

    pub fn load(&self, fingerprint: &str) -> Option<Program> {
        let data = std::fs::read_to_string(self.path_for(fingerprint)).ok()?;
        match serde_json::from_str::<Program>(&data) {
            Ok(p) if p.fingerprint == fingerprint => Some(p),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Ignoring corrupt cached program {}: {}", fingerprint, e);
                None
            }
        }
    }

    pub fn store(&self, program: &Program) -> Result<()> {
        let json = serde_json::to_string(program)
            .map_err(|e| Error::Other(format!("Failed to serialize program: {}", e)))?;
        std::fs::write(self.path_for(&program.fingerprint), json)
            .map_err(|e| Error::Other(format!("Failed to write cached program: {}", e)))
    }
}

/// CPU rasterizer backing the default snapshotter.
pub struct HeadlessSurface {
    size: Size,
    pixel_ratio: f32,
    image: PremultipliedImage,
    frame_ready: bool,
    program: Option<Program>,
    cache: Option<ProgramCache>,
}

fn physical_size(size: Size, pixel_ratio: f32) -> Result<(u32, u32)> {
    if size.is_empty() {
        return Err(Error::ConfigError(format!(
            "size {}x{} must be positive",
            size.width, size.height
        )));
    }
    if !(pixel_ratio.is_finite() && pixel_ratio > 0.0) {
        return Err(Error::ConfigError(format!(
            "pixel ratio {} must be positive",
            pixel_ratio
        )));
    }
    let w = (size.width as f64 * pixel_ratio as f64).round();
    let h = (size.height as f64 * pixel_ratio as f64).round();
    if w < 1.0 || h < 1.0 || w > MAX_TEXTURE_SIZE as f64 || h > MAX_TEXTURE_SIZE as f64 {
        return Err(Error::ConfigError(format!(
            "physical size {}x{} outside 1..={}",
            w, h, MAX_TEXTURE_SIZE
        )));
    }
    Ok((w as u32, h as u32))
}

impl HeadlessSurface {
    pub fn new(options: &SurfaceOptions) -> Result<Self> {
        let (w, h) = physical_size(options.size, options.pixel_ratio)
            .map_err(|e| Error::ConstructionFailure(e.to_string()))?;
        let cache = options
            .program_cache_dir
            .as_deref()
            .map(ProgramCache::open)
            .transpose()?;

        Ok(Self {
            size: options.size,
            pixel_ratio: options.pixel_ratio,
            image: PremultipliedImage::new(w, h),
            frame_ready: false,
            program: None,
            cache,
        })
    }

    /// Boxed constructor usable as a [`SurfaceFactory`].
    pub fn factory() -> SurfaceFactory {
        Box::new(|opts: &SurfaceOptions| -> Result<Box<dyn RenderSurface>> {
            Ok(Box::new(HeadlessSurface::new(opts)?))
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    fn program_for(&mut self, style: &Style) -> Program {
        if let Some(p) = self.program.as_ref().filter(|p| p.fingerprint == style.fingerprint) {
            return p.clone();
        }
        let program = match self.cache.as_ref().and_then(|c| c.load(&style.fingerprint)) {
            Some(p) => {
                log::debug!("program cache hit for {}", style.fingerprint);
                p
            }
            None => {
                let p = Program::compile(style);
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.store(&p) {
                        log::warn!("{}", e);
                    }
                }
                p
            }
        };
        self.program = Some(program.clone());
        program
    }

    fn draw(&mut self, program: &Program, scene: &Scene<'_>) {
        let ratio = self.pixel_ratio as f64;
        let to_px = |ll| {
            let (x, y) = scene.transform.latlng_to_screen(ll);
            (x * ratio, y * ratio)
        };

        self.image.fill([0, 0, 0, 0]);
        for op in &program.ops {
            match op {
                DrawOp::Clear { color } => self.image.fill(color.premultiplied()),
                DrawOp::Circles {
                    source,
                    color,
                    radius,
                } => {
                    let rgba = color.premultiplied();
                    for geom in scene.style.sources.get(source).into_iter().flatten() {
                        if let Geometry::Point(p) = geom {
                            let (cx, cy) = to_px(*p);
                            fill_circle(&mut self.image, cx, cy, radius * ratio, rgba);
                        }
                    }
                }
                DrawOp::Lines {
                    source,
                    color,
                    width,
                } => {
                    let rgba = color.premultiplied();
                    for geom in scene.style.sources.get(source).into_iter().flatten() {
                        if let Geometry::LineString(points) = geom {
                            let pts: Vec<(f64, f64)> = points.iter().map(|p| to_px(*p)).collect();
                            for seg in pts.windows(2) {
                                stroke_segment(&mut self.image, seg[0], seg[1], width * ratio, rgba);
                            }
                        }
                    }
                }
            }
        }
    }
}

impl RenderSurface for HeadlessSurface {
    fn resize(&mut self, size: Size, pixel_ratio: f32) -> Result<()> {
        let (w, h) = physical_size(size, pixel_ratio)?;
        self.size = size;
        self.pixel_ratio = pixel_ratio;
        self.image = PremultipliedImage::new(w, h);
        self.frame_ready = false;
        Ok(())
    }

    fn render_still(&mut self, scene: &Scene<'_>, on_complete: RenderCallback) {
        self.frame_ready = false;
        let program = self.program_for(scene.style);
        self.draw(&program, scene);
        self.frame_ready = true;
        on_complete(Ok(()));
    }

    fn read_image(&mut self) -> Result<PremultipliedImage> {
        if !self.frame_ready {
            return Err(Error::RenderFailure("No finished frame to read".into()));
        }
        self.frame_ready = false;
        Ok(self.image.clone())
    }
}

// Coverage-based anti-aliasing: one pixel of falloff at the shape edge.
fn fill_circle(img: &mut PremultipliedImage, cx: f64, cy: f64, r: f64, rgba: [u8; 4]) {
    if r <= 0.0 {
        return;
    }
    let (x0, x1) = clip_span(cx - r - 1.0, cx + r + 1.0, img.width);
    let (y0, y1) = clip_span(cy - r - 1.0, cy + r + 1.0, img.height);
    for y in y0..y1 {
        for x in x0..x1 {
            let d = ((x as f64 + 0.5 - cx).powi(2) + (y as f64 + 0.5 - cy).powi(2)).sqrt();
            img.blend(x, y, rgba, r + 0.5 - d);
        }
    }
}

fn stroke_segment(img: &mut PremultipliedImage, a: (f64, f64), b: (f64, f64), width: f64, rgba: [u8; 4]) {
    let hw = width / 2.0;
    if hw <= 0.0 {
        return;
    }
    let (x0, x1) = clip_span(a.0.min(b.0) - hw - 1.0, a.0.max(b.0) + hw + 1.0, img.width);
    let (y0, y1) = clip_span(a.1.min(b.1) - hw - 1.0, a.1.max(b.1) + hw + 1.0, img.height);
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    for y in y0..y1 {
        for x in x0..x1 {
            let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
            let t = if len2 > 0.0 {
                (((px - a.0) * dx + (py - a.1) * dy) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let d = ((px - a.0 - t * dx).powi(2) + (py - a.1 - t * dy).powi(2)).sqrt();
            img.blend(x, y, rgba, hw + 0.5 - d);
        }
    }
}

fn clip_span(lo: f64, hi: f64, limit: u32) -> (i64, i64) {
    let lo = lo.floor().max(0.0).min(limit as f64) as i64;
    let hi = hi.ceil().max(0.0).min(limit as f64) as i64;
    (lo, hi)
}
