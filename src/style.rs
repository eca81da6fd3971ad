//! Style documents and the style loading collaborator.
//!
//! A style is a JSON document (version 8) listing GeoJSON `sources` and
//! ordered `layers`. Loading resolves the locator, parses the document and
//! fetches any GeoJSON source given by locator, so a style reported ready
//! carries everything a render needs.

use crate::geo::LatLng;
use crate::{Error, Result};
use base64::Engine as Base64Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

/// Built-in style used when no locator is configured.
pub const DEFAULT_STYLE: &str = r##"{
  "version": 8,
  "name": "Basic",
  "sources": {
    "cities": {
      "type": "geojson",
      "data": {
        "type": "FeatureCollection",
        "features": [
          { "type": "Feature", "geometry": { "type": "Point", "coordinates": [-0.1276, 51.5072] } },
          { "type": "Feature", "geometry": { "type": "Point", "coordinates": [-74.006, 40.7128] } },
          { "type": "Feature", "geometry": { "type": "Point", "coordinates": [139.6917, 35.6895] } },
          { "type": "Feature", "geometry": { "type": "Point", "coordinates": [126.9784, 37.566] } }
        ]
      }
    }
  },
  "layers": [
    { "id": "background", "type": "background", "paint": { "background-color": "#e8e4d8" } },
    { "id": "cities", "type": "circle", "source": "cities",
      "paint": { "circle-color": "#d0342c", "circle-radius": 4 } }
  ]
}"##;

/// Completion callback handed to a [`StyleLoader`]. Dropping it without
/// calling it counts as a failed load.
pub type StyleCallback = Box<dyn FnOnce(Result<Arc<Style>>) + Send + 'static>;

/// Asynchronous style loading collaborator.
///
/// `load` must return promptly; the result is reported later through the
/// callback, from any thread.
pub trait StyleLoader: Send + Sync {
    fn load(&self, locator: &str, on_done: StyleCallback);
}

/// Loader resolving `file://`, `data:`, inline JSON and (with the `http`
/// feature) `http(s)://` locators on a short-lived thread per request.
#[derive(Debug, Clone)]
pub struct DefaultStyleLoader {
    timeout_ms: u64,
}

impl DefaultStyleLoader {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }
}

impl Default for DefaultStyleLoader {
    fn default() -> Self {
        Self::new(30000)
    }
}

impl StyleLoader for DefaultStyleLoader {
    fn load(&self, locator: &str, on_done: StyleCallback) {
        let locator = locator.to_string();
        let timeout_ms = self.timeout_ms;
        let spawned = thread::Builder::new()
            .name("style-loader".into())
            .spawn(move || {
                let res = load_style_blocking(&locator, timeout_ms).map(Arc::new);
                if let Err(ref e) = res {
                    log::warn!("style load failed for {}: {}", truncate(&locator), e);
                }
                on_done(res);
            });
        // The callback is dropped with the closure, which the session sees
        // as a failed load.
        if let Err(e) = spawned {
            log::warn!("Failed to spawn style loader thread: {}", e);
        }
    }
}

/// Turn a bare path into a `file://` locator; everything else passes through.
pub fn normalize_locator(locator: &str) -> String {
    let trimmed = locator.trim();
    if trimmed.starts_with('{') || trimmed.starts_with("data:") || trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("file://{}", trimmed)
    }
}

/// Resolve, fetch and parse a style on the current thread.
pub fn load_style_blocking(locator: &str, timeout_ms: u64) -> Result<Style> {
    let text = fetch_text(locator, timeout_ms)?;
    Style::parse_with(&text, |loc| fetch_text(loc, timeout_ms))
}

fn fetch_text(locator: &str, timeout_ms: u64) -> Result<String> {
    let locator = normalize_locator(locator);

    if locator.starts_with('{') {
        return Ok(locator);
    }
    if let Some(rest) = locator.strip_prefix("data:") {
        return decode_data_url(rest);
    }
    if let Some(path) = locator.strip_prefix("file://") {
        return std::fs::read_to_string(path)
            .map_err(|e| Error::StyleLoadFailure(format!("Failed to read {}: {}", path, e)));
    }
    if locator.starts_with("http://") || locator.starts_with("https://") {
        return fetch_http(&locator, timeout_ms);
    }

    let scheme = locator.split("://").next().unwrap_or_default();
    Err(Error::StyleLoadFailure(format!(
        "Unsupported locator scheme '{}'",
        scheme
    )))
}

#[cfg(feature = "http")]
fn fetch_http(locator: &str, timeout_ms: u64) -> Result<String> {
    use reqwest::blocking::Client;

    let url = url::Url::parse(locator)
        .map_err(|e| Error::StyleLoadFailure(format!("Invalid URL {}: {}", locator, e)))?;

    let client = Client::builder()
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| Error::StyleLoadFailure(format!("Failed to build HTTP client: {}", e)))?;

    let res = client
        .get(url)
        .send()
        .map_err(|e| Error::StyleLoadFailure(format!("HTTP GET failed: {}", e)))?;

    let status = res.status();
    if !status.is_success() {
        return Err(Error::StyleLoadFailure(format!(
            "HTTP GET {} returned {}",
            locator, status
        )));
    }

    res.text()
        .map_err(|e| Error::StyleLoadFailure(format!("Failed to read response body: {}", e)))
}

#[cfg(not(feature = "http"))]
fn fetch_http(locator: &str, _timeout_ms: u64) -> Result<String> {
    Err(Error::StyleLoadFailure(format!(
        "HTTP support is disabled; cannot load {}",
        locator
    )))
}

// `data:[<mediatype>][;base64],<payload>`
fn decode_data_url(rest: &str) -> Result<String> {
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::StyleLoadFailure("data: locator has no payload".into()))?;

    if meta.ends_with(";base64") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::StyleLoadFailure(format!("Invalid base64 payload: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| Error::StyleLoadFailure(format!("data: payload is not UTF-8: {}", e)))
    } else {
        Ok(payload.to_string())
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(80) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// An RGBA color with straight (non-premultiplied) alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb(..)`, `rgba(..)` or a few
    /// named colors.
    pub fn parse(s: &str) -> Option<Color> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            return parse_hex(hex);
        }
        if let Some(args) = s.strip_prefix("rgba(").and_then(|r| r.strip_suffix(')')) {
            let parts: Vec<&str> = args.split(',').map(str::trim).collect();
            if parts.len() != 4 {
                return None;
            }
            let alpha: f64 = parts[3].parse().ok()?;
            if !(0.0..=1.0).contains(&alpha) {
                return None;
            }
            return Some(Color::rgba(
                parts[0].parse().ok()?,
                parts[1].parse().ok()?,
                parts[2].parse().ok()?,
                (alpha * 255.0).round() as u8,
            ));
        }
        if let Some(args) = s.strip_prefix("rgb(").and_then(|r| r.strip_suffix(')')) {
            let parts: Vec<&str> = args.split(',').map(str::trim).collect();
            if parts.len() != 3 {
                return None;
            }
            return Some(Color::rgba(
                parts[0].parse().ok()?,
                parts[1].parse().ok()?,
                parts[2].parse().ok()?,
                255,
            ));
        }
        match s {
            "black" => Some(Color::BLACK),
            "white" => Some(Color::rgba(255, 255, 255, 255)),
            "red" => Some(Color::rgba(255, 0, 0, 255)),
            "green" => Some(Color::rgba(0, 128, 0, 255)),
            "blue" => Some(Color::rgba(0, 0, 255, 255)),
            "transparent" => Some(Color::TRANSPARENT),
            _ => None,
        }
    }

    /// Premultiplied RGBA bytes.
    pub fn premultiplied(&self) -> [u8; 4] {
        let a = self.a as u32;
        let pm = |c: u8| ((c as u32 * a + 127) / 255) as u8;
        [pm(self.r), pm(self.g), pm(self.b), self.a]
    }
}

fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => {
            let nib = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
            Some(Color::rgba(nib(0)?, nib(1)?, nib(2)?, 255))
        }
        6 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Color::parse(&value).ok_or_else(|| format!("invalid color '{}'", value))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        format!("#{:02x}{:02x}{:02x}{:02x}", c.r, c.g, c.b, c.a)
    }
}

/// Layer type. Types the rasterizer does not draw are kept as `Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Background,
    Circle,
    Line,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Paint {
    #[serde(rename = "background-color")]
    pub background_color: Option<Color>,
    #[serde(rename = "circle-color")]
    pub circle_color: Option<Color>,
    #[serde(rename = "circle-radius")]
    pub circle_radius: Option<f64>,
    #[serde(rename = "line-color")]
    pub line_color: Option<Color>,
    #[serde(rename = "line-width")]
    pub line_width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Layer {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub paint: Paint,
}

/// Renderable geometry extracted from a GeoJSON source
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(LatLng),
    LineString(Vec<LatLng>),
}

#[derive(Debug, Deserialize)]
struct StyleDocument {
    version: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sources: BTreeMap<String, SourceDocument>,
    layers: Vec<Layer>,
}

#[derive(Debug, Deserialize)]
struct SourceDocument {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
}

/// A parsed, fully resolved style
#[derive(Debug, Clone)]
pub struct Style {
    pub name: Option<String>,
    pub layers: Vec<Layer>,
    pub sources: BTreeMap<String, Vec<Geometry>>,
    /// SHA-256 hex digest of the canonical `layers` JSON
    pub fingerprint: String,
}

impl Style {
    /// Parse a style whose GeoJSON sources are all inline.
    pub fn parse(json: &str) -> Result<Style> {
        Style::parse_with(json, |loc| {
            Err(Error::StyleLoadFailure(format!(
                "Cannot resolve source data '{}' without a loader",
                loc
            )))
        })
    }

    /// Parse a style, resolving string `data` of GeoJSON sources through `fetch`.
    pub fn parse_with<F>(json: &str, fetch: F) -> Result<Style>
    where
        F: Fn(&str) -> Result<String>,
    {
        let raw: Value = serde_json::from_str(json)?;
        let layers_json = raw.get("layers").map(Value::to_string).unwrap_or_default();
        let doc: StyleDocument = serde_json::from_value(raw)?;

        if doc.version != 8 {
            return Err(Error::StyleLoadFailure(format!(
                "Unsupported style version {}",
                doc.version
            )));
        }

        let mut sources = BTreeMap::new();
        for (id, src) in doc.sources {
            let mut geometries = Vec::new();
            if src.kind == "geojson" {
                let data = match src.data {
                    Some(Value::String(loc)) => serde_json::from_str(&fetch(&loc)?)?,
                    Some(v) => v,
                    None => {
                        return Err(Error::StyleLoadFailure(format!(
                            "GeoJSON source '{}' has no data",
                            id
                        )))
                    }
                };
                collect_geometries(&data, &mut geometries)?;
            } else {
                log::debug!("source '{}' has unsupported type '{}'; it renders empty", id, src.kind);
            }
            sources.insert(id, geometries);
        }

        for layer in &doc.layers {
            if let Some(src) = &layer.source {
                if !sources.contains_key(src) {
                    return Err(Error::StyleLoadFailure(format!(
                        "Layer '{}' references unknown source '{}'",
                        layer.id, src
                    )));
                }
            }
        }

        let fingerprint = hex::encode(Sha256::digest(layers_json.as_bytes()));

        Ok(Style {
            name: doc.name,
            layers: doc.layers,
            sources,
            fingerprint,
        })
    }
}

fn position(value: &Value) -> Result<LatLng> {
    let coords = value
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| Error::StyleLoadFailure("GeoJSON position must be [lon, lat]".into()))?;
    match (coords[0].as_f64(), coords[1].as_f64()) {
        (Some(lon), Some(lat)) => Ok(LatLng::new(lat, lon)),
        _ => Err(Error::StyleLoadFailure("GeoJSON position is not numeric".into())),
    }
}

fn positions(value: &Value) -> Result<Vec<LatLng>> {
    value
        .as_array()
        .ok_or_else(|| Error::StyleLoadFailure("GeoJSON coordinates must be an array".into()))?
        .iter()
        .map(position)
        .collect()
}

fn collect_geometries(value: &Value, out: &mut Vec<Geometry>) -> Result<()> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    let coords = value.get("coordinates").unwrap_or(&Value::Null);
    let items = |key: &str| -> Vec<Value> {
        value
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };

    match kind {
        "FeatureCollection" => {
            for feature in items("features") {
                collect_geometries(&feature, out)?;
            }
        }
        "Feature" => {
            if let Some(geometry) = value.get("geometry").filter(|g| !g.is_null()) {
                collect_geometries(geometry, out)?;
            }
        }
        "GeometryCollection" => {
            for geometry in items("geometries") {
                collect_geometries(&geometry, out)?;
            }
        }
        "Point" => out.push(Geometry::Point(position(coords)?)),
        "MultiPoint" => out.extend(positions(coords)?.into_iter().map(Geometry::Point)),
        "LineString" => out.push(Geometry::LineString(positions(coords)?)),
        // Polygon rings are outlined by line layers.
        "MultiLineString" | "Polygon" => {
            for line in coords.as_array().into_iter().flatten() {
                out.push(Geometry::LineString(positions(line)?));
            }
        }
        other => log::debug!("skipping unsupported GeoJSON type '{}'", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn default_style_parses() {
        let style = Style::parse(DEFAULT_STYLE).expect("default style");
        assert_eq!(style.name.as_deref(), Some("Basic"));
        assert_eq!(style.layers.len(), 2);
        assert_eq!(style.layers[0].kind, LayerKind::Background);
        assert_eq!(style.sources["cities"].len(), 4);
        assert_eq!(style.fingerprint.len(), 64);
    }

    #[test]
    fn colors_parse_in_all_notations() {
        assert_eq!(Color::parse("#fff"), Some(Color::rgba(255, 255, 255, 255)));
        assert_eq!(Color::parse("#102030"), Some(Color::rgba(16, 32, 48, 255)));
        assert_eq!(Color::parse("#10203080"), Some(Color::rgba(16, 32, 48, 128)));
        assert_eq!(Color::parse("rgb(1, 2, 3)"), Some(Color::rgba(1, 2, 3, 255)));
        assert_eq!(Color::parse("rgba(1,2,3,0.5)"), Some(Color::rgba(1, 2, 3, 128)));
        assert_eq!(Color::parse("#zzz"), None);
        assert_eq!(Color::parse("rgba(1,2,3,7)"), None);
    }

    #[test]
    fn premultiplied_scales_channels_by_alpha() {
        assert_eq!(Color::rgba(200, 100, 0, 255).premultiplied(), [200, 100, 0, 255]);
        assert_eq!(Color::rgba(200, 100, 0, 0).premultiplied(), [0, 0, 0, 0]);
        assert_eq!(Color::rgba(255, 0, 0, 128).premultiplied(), [128, 0, 0, 128]);
    }

    #[test]
    fn invalid_color_fails_the_load() {
        let json = r#"{"version":8,"layers":[{"id":"bg","type":"background","paint":{"background-color":"nope"}}]}"#;
        assert!(matches!(Style::parse(json), Err(Error::StyleLoadFailure(_))));
    }

    #[test]
    fn wrong_version_and_unknown_source_are_rejected() {
        let v7 = r#"{"version":7,"layers":[]}"#;
        assert!(matches!(Style::parse(v7), Err(Error::StyleLoadFailure(_))));

        let dangling = r#"{"version":8,"layers":[{"id":"c","type":"circle","source":"missing"}]}"#;
        assert!(matches!(Style::parse(dangling), Err(Error::StyleLoadFailure(_))));
    }

    #[test]
    fn unsupported_layers_and_geometries_are_kept_but_inert() {
        let json = r#"{
            "version": 8,
            "sources": {
                "shapes": { "type": "geojson", "data": { "type": "GeometryCollection", "geometries": [
                    { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]] },
                    { "type": "MultiPoint", "coordinates": [[5,5],[6,6]] },
                    { "type": "Unknown" }
                ]}},
                "tiles": { "type": "vector", "url": "mapbox://x" }
            },
            "layers": [
                { "id": "fill", "type": "fill", "source": "shapes" },
                { "id": "pts", "type": "circle", "source": "shapes" }
            ]
        }"#;
        let style = Style::parse(json).unwrap();
        assert_eq!(style.layers[0].kind, LayerKind::Unsupported);
        assert_eq!(style.sources["shapes"].len(), 3);
        assert!(style.sources["tiles"].is_empty());
    }

    #[test]
    fn fingerprint_depends_only_on_layers() {
        let a = r#"{"version":8,"name":"a","layers":[{"id":"bg","type":"background"}]}"#;
        let b = r#"{"version":8,"name":"b","layers":[{"type":"background","id":"bg"}]}"#;
        let c = r#"{"version":8,"layers":[{"id":"bg2","type":"background"}]}"#;
        let fa = Style::parse(a).unwrap().fingerprint;
        assert_eq!(fa, Style::parse(b).unwrap().fingerprint);
        assert_ne!(fa, Style::parse(c).unwrap().fingerprint);
    }

    #[test]
    fn locators_are_normalized() {
        assert_eq!(normalize_locator("styles/a.json"), "file://styles/a.json");
        assert_eq!(normalize_locator("https://x/y.json"), "https://x/y.json");
        assert_eq!(normalize_locator("{\"version\":8}"), "{\"version\":8}");
        assert_eq!(normalize_locator("data:,{}"), "data:,{}");
    }

    #[test]
    fn data_and_unsupported_locators() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(r#"{"version":8,"layers":[]}"#);
        let loc = format!("data:application/json;base64,{}", b64);
        let style = load_style_blocking(&loc, 1000).unwrap();
        assert!(style.layers.is_empty());

        let err = load_style_blocking("mapbox://styles/mapbox/streets-v9", 1000).unwrap_err();
        assert!(matches!(err, Error::StyleLoadFailure(ref m) if m.contains("mapbox")));

        let err = load_style_blocking("/definitely/not/here.json", 1000).unwrap_err();
        assert!(matches!(err, Error::StyleLoadFailure(_)));
    }

    #[test]
    fn default_loader_reports_through_callback() {
        let (tx, rx) = mpsc::channel();
        DefaultStyleLoader::default().load(
            DEFAULT_STYLE,
            Box::new(move |res| {
                let _ = tx.send(res);
            }),
        );
        let res = rx.recv_timeout(Duration::from_secs(5)).expect("callback invoked");
        assert!(res.is_ok());
    }
}
