//! Premultiplied RGBA pixel buffers and PNG export

use crate::{Error, Result};

/// An RGBA image with premultiplied alpha, rows top to bottom.
///
/// `width`/`height` are physical pixels (logical size times pixel ratio).
#[derive(Debug, Clone, PartialEq)]
pub struct PremultipliedImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PremultipliedImage {
    /// A fully transparent image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Premultiplied RGBA at `(x, y)`, if inside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]])
    }

    /// Fill every pixel with one premultiplied color.
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Source-over blend of a premultiplied color at `(x, y)` with extra
    /// `coverage` in `[0, 1]`. Out-of-bounds writes are dropped.
    pub fn blend(&mut self, x: i64, y: i64, rgba: [u8; 4], coverage: f64) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let cov = coverage.clamp(0.0, 1.0);
        if cov == 0.0 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let src_a = rgba[3] as f64 / 255.0 * cov;
        for c in 0..4 {
            let src = rgba[c] as f64 * cov;
            let dst = self.data[i + c] as f64;
            self.data[i + c] = (src + dst * (1.0 - src_a)).round().clamp(0.0, 255.0) as u8;
        }
    }

    /// Straight-alpha RGBA bytes.
    pub fn unpremultiplied(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        for px in out.chunks_exact_mut(4) {
            let a = px[3] as u32;
            if a == 0 {
                px[..3].fill(0);
            } else if a < 255 {
                for c in &mut px[..3] {
                    *c = ((*c as u32 * 255 + a / 2) / a).min(255) as u8;
                }
            }
        }
        out
    }

    /// Encode as an 8-bit RGBA PNG.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        if self.is_empty() {
            return Err(Error::RenderFailure("Cannot encode an empty image".into()));
        }
        let mut buf = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut buf, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .map_err(|e| Error::RenderFailure(format!("PNG header: {}", e)))?;
            writer
                .write_image_data(&self.unpremultiplied())
                .map_err(|e| Error::RenderFailure(format!("PNG data: {}", e)))?;
        }
        Ok(buf)
    }
}
