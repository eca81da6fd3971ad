//! Geographic primitives and the Web Mercator camera transform.
//!
//! The projection works in "world pixels": at zoom `z` the whole world is a
//! square of `TILE_SIZE * 2^z` pixels with the origin at the north-west
//! corner and `y` growing southwards.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Edge length of one zoom-0 tile in logical pixels
pub const TILE_SIZE: f64 = 512.0;

pub const MIN_ZOOM: f64 = 0.0;
pub const MAX_ZOOM: f64 = 25.5;
pub const MAX_PITCH: f64 = 60.0;

/// Latitude limit of the square Web Mercator world
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// A geographic coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Clamp latitude to the Mercator limit and wrap longitude into `[-180, 180)`.
    pub fn normalized(self) -> Self {
        Self {
            latitude: self.latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE),
            longitude: wrap_longitude(self.longitude),
        }
    }
}

/// A bounding rectangle given by its south-west and north-east corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLngBounds {
    pub southwest: LatLng,
    pub northeast: LatLng,
}

impl LatLngBounds {
    pub fn new(southwest: LatLng, northeast: LatLng) -> Self {
        Self {
            southwest,
            northeast,
        }
    }

    /// A region whose corners coincide encloses no area and cannot be framed.
    pub fn is_degenerate(&self) -> bool {
        self.southwest == self.northeast
    }
}

/// Output dimensions in logical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

/// Padding applied when framing a region, in logical pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeInsets {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

/// A partial camera update. Unset fields leave the current value unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraOptions {
    pub center: Option<LatLng>,
    pub zoom: Option<f64>,
    pub bearing: Option<f64>,
    pub pitch: Option<f64>,
}

impl CameraOptions {
    pub fn with_center(mut self, center: LatLng) -> Self {
        self.center = Some(center);
        self
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = Some(zoom);
        self
    }

    pub fn with_bearing(mut self, bearing: f64) -> Self {
        self.bearing = Some(bearing);
        self
    }

    pub fn with_pitch(mut self, pitch: f64) -> Self {
        self.pitch = Some(pitch);
        self
    }
}

/// The fully resolved camera of a session
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Camera {
    pub center: LatLng,
    pub zoom: f64,
    pub bearing: f64,
    pub pitch: f64,
}

impl Camera {
    /// Apply a partial update without animation. Non-finite values are ignored.
    pub fn jump_to(&mut self, options: &CameraOptions) {
        if let Some(center) = options.center.filter(LatLng::is_finite) {
            self.center = center.normalized();
        }
        if let Some(zoom) = options.zoom.filter(|z| z.is_finite()) {
            self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        }
        if let Some(bearing) = options.bearing.filter(|b| b.is_finite()) {
            self.bearing = normalize_bearing(bearing);
        }
        if let Some(pitch) = options.pitch.filter(|p| p.is_finite()) {
            self.pitch = pitch.clamp(0.0, MAX_PITCH);
        }
    }
}

/// Wrap a longitude into `[-180, 180)`.
pub fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Normalize a bearing into `(-180, 180]`.
pub fn normalize_bearing(bearing: f64) -> f64 {
    let b = bearing.rem_euclid(360.0);
    if b > 180.0 {
        b - 360.0
    } else {
        b
    }
}

fn world_size(zoom: f64) -> f64 {
    TILE_SIZE * zoom.exp2()
}

/// Project a coordinate to world pixels at the given zoom.
pub fn project(latlng: LatLng, zoom: f64) -> (f64, f64) {
    let size = world_size(zoom);
    let lat = latlng.latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = (180.0 + latlng.longitude) / 360.0 * size;
    let y = (180.0 - (180.0 / PI) * (PI / 4.0 + lat * PI / 360.0).tan().ln()) / 360.0 * size;
    (x, y)
}

/// Inverse of [`project`].
pub fn unproject(x: f64, y: f64, zoom: f64) -> LatLng {
    let size = world_size(zoom);
    let longitude = x * 360.0 / size - 180.0;
    let y2 = 180.0 - y * 360.0 / size;
    let latitude = 360.0 / PI * (y2 * PI / 180.0).exp().atan() - 90.0;
    LatLng::new(latitude, longitude)
}

/// Derive the camera (center and zoom) that frames `bounds` inside a viewport
/// of `size` minus `insets`. Bearing and pitch are left unset.
///
/// The zoom is the tighter of the horizontal and vertical fits; there is no
/// tie-break when the region's aspect ratio differs from the viewport's.
pub fn camera_for_bounds(
    bounds: &LatLngBounds,
    insets: &EdgeInsets,
    size: Size,
) -> Result<CameraOptions> {
    if !bounds.southwest.is_finite() || !bounds.northeast.is_finite() {
        return Err(Error::InvalidRegion("region has non-finite coordinates".into()));
    }
    if bounds.is_degenerate() {
        return Err(Error::InvalidRegion(
            "southwest and northeast corners coincide".into(),
        ));
    }

    let avail_w = size.width as f64 - insets.left - insets.right;
    let avail_h = size.height as f64 - insets.top - insets.bottom;
    if !(avail_w > 0.0 && avail_h > 0.0) {
        return Err(Error::InvalidRegion(format!(
            "viewport {}x{} has no area left after insets",
            size.width, size.height
        )));
    }

    let (x1, y1) = project(bounds.southwest, 0.0);
    let (x2, y2) = project(bounds.northeast, 0.0);
    let (min_x, max_x) = (x1.min(x2), x1.max(x2));
    let (min_y, max_y) = (y1.min(y2), y1.max(y2));
    let width = max_x - min_x;
    let height = max_y - min_y;

    let scale_x = if width > 0.0 { avail_w / width } else { f64::INFINITY };
    let scale_y = if height > 0.0 { avail_h / height } else { f64::INFINITY };
    let scale = scale_x.min(scale_y);
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Error::InvalidRegion("region projects to zero area".into()));
    }

    let zoom = scale.log2().clamp(MIN_ZOOM, MAX_ZOOM);
    let scale = zoom.exp2();

    // Shift the center so the region is centered in the inset-reduced area.
    let center_x = (min_x + max_x) / 2.0 + (insets.right - insets.left) / (2.0 * scale);
    let center_y = (min_y + max_y) / 2.0 + (insets.bottom - insets.top) / (2.0 * scale);
    let center = unproject(center_x, center_y, 0.0);

    Ok(CameraOptions {
        center: Some(center),
        zoom: Some(zoom),
        bearing: None,
        pitch: None,
    })
}

/// Maps geographic coordinates to logical screen pixels for one camera and
/// viewport.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    camera: Camera,
    size: Size,
    center_px: (f64, f64),
}

impl Transform {
    pub fn new(camera: Camera, size: Size) -> Self {
        Self {
            camera,
            size,
            center_px: project(camera.center, camera.zoom),
        }
    }

    /// Screen position of `latlng` with `(0, 0)` at the top-left corner.
    pub fn latlng_to_screen(&self, latlng: LatLng) -> (f64, f64) {
        let world = world_size(self.camera.zoom);
        let (x, y) = project(latlng, self.camera.zoom);
        // Take the shortest way around the antimeridian.
        let dx = (x - self.center_px.0 + world / 2.0).rem_euclid(world) - world / 2.0;
        let dy = y - self.center_px.1;

        let angle = (-self.camera.bearing).to_radians();
        let (sin, cos) = angle.sin_cos();
        let rx = dx * cos - dy * sin;
        let ry = dx * sin + dy * cos;

        (
            self.size.width as f64 / 2.0 + rx,
            self.size.height as f64 / 2.0 + ry,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn project_round_trips_through_unproject() {
        let ll = LatLng::new(37.566, 126.9784);
        let (x, y) = project(ll, 7.0);
        let back = unproject(x, y, 7.0);
        assert!(approx(back.latitude, ll.latitude));
        assert!(approx(back.longitude, ll.longitude));
    }

    #[test]
    fn jump_to_only_touches_set_fields() {
        let mut cam = Camera {
            center: LatLng::new(10.0, 20.0),
            zoom: 2.0,
            bearing: 30.0,
            pitch: 10.0,
        };
        cam.jump_to(&CameraOptions::default().with_zoom(5.0));
        assert_eq!(cam.zoom, 5.0);
        assert_eq!(cam.center, LatLng::new(10.0, 20.0));
        assert_eq!(cam.bearing, 30.0);
        assert_eq!(cam.pitch, 10.0);
    }

    #[test]
    fn jump_to_clamps_and_normalizes() {
        let mut cam = Camera::default();
        cam.jump_to(&CameraOptions {
            center: Some(LatLng::new(89.0, 190.0)),
            zoom: Some(40.0),
            bearing: Some(270.0),
            pitch: Some(85.0),
        });
        assert_eq!(cam.zoom, MAX_ZOOM);
        assert_eq!(cam.pitch, MAX_PITCH);
        assert!(approx(cam.bearing, -90.0));
        assert!(approx(cam.center.longitude, -170.0));
        assert!(approx(cam.center.latitude, MAX_LATITUDE));

        cam.jump_to(&CameraOptions::default().with_zoom(f64::NAN));
        assert_eq!(cam.zoom, MAX_ZOOM);
    }

    #[test]
    fn camera_for_bounds_centers_the_region() {
        let bounds = LatLngBounds::new(LatLng::new(-10.0, -20.0), LatLng::new(10.0, 20.0));
        let cam = camera_for_bounds(&bounds, &EdgeInsets::default(), Size::new(512, 512)).unwrap();
        let center = cam.center.unwrap();
        assert!(approx(center.latitude, 0.0));
        assert!(approx(center.longitude, 0.0));

        // 40 degrees of longitude is the wider side: 512 * 40/360 world px at z0.
        let expected = (512.0_f64 / (512.0 * 40.0 / 360.0)).log2();
        assert!(approx(cam.zoom.unwrap(), expected));
        assert!(cam.bearing.is_none());
        assert!(cam.pitch.is_none());
    }

    #[test]
    fn camera_for_bounds_fits_region_edges_to_viewport() {
        let bounds = LatLngBounds::new(LatLng::new(40.0, -75.0), LatLng::new(41.0, -73.0));
        let size = Size::new(800, 400);
        let opts = camera_for_bounds(&bounds, &EdgeInsets::default(), size).unwrap();
        let mut cam = Camera::default();
        cam.jump_to(&opts);
        let t = Transform::new(cam, size);

        let (x1, y1) = t.latlng_to_screen(bounds.southwest);
        let (x2, y2) = t.latlng_to_screen(bounds.northeast);
        // One axis touches the viewport edges, the other fits inside.
        let fits_x = approx(x1, 0.0) && approx(x2, 800.0);
        let fits_y = approx(y2, 0.0) && approx(y1, 400.0);
        assert!(fits_x || fits_y, "({x1},{y1}) ({x2},{y2})");
        assert!(x1 >= -1e-6 && x2 <= 800.0 + 1e-6);
        assert!(y2 >= -1e-6 && y1 <= 400.0 + 1e-6);
    }

    #[test]
    fn camera_for_bounds_respects_insets() {
        let bounds = LatLngBounds::new(LatLng::new(-10.0, -10.0), LatLng::new(10.0, 10.0));
        let insets = EdgeInsets {
            left: 100.0,
            ..Default::default()
        };
        let size = Size::new(500, 400);
        let opts = camera_for_bounds(&bounds, &insets, size).unwrap();
        let mut cam = Camera::default();
        cam.jump_to(&opts);
        let (x, _) = Transform::new(cam, size).latlng_to_screen(LatLng::new(0.0, 0.0));
        // Region center sits in the middle of the area right of the inset.
        assert!(approx(x, 100.0 + 400.0 / 2.0));
    }

    #[test]
    fn degenerate_region_is_rejected() {
        let p = LatLng::new(0.0, 0.0);
        let err = camera_for_bounds(&LatLngBounds::new(p, p), &EdgeInsets::default(), Size::new(512, 512))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRegion(_)));
    }

    #[test]
    fn zero_area_viewport_is_rejected() {
        let bounds = LatLngBounds::new(LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0));
        let insets = EdgeInsets {
            left: 300.0,
            right: 300.0,
            ..Default::default()
        };
        let err = camera_for_bounds(&bounds, &insets, Size::new(512, 512)).unwrap_err();
        assert!(matches!(err, Error::InvalidRegion(_)));
    }

    #[test]
    fn bearing_rotates_around_viewport_center() {
        let cam = Camera {
            zoom: 3.0,
            bearing: 90.0,
            ..Default::default()
        };
        let t = Transform::new(cam, Size::new(200, 200));
        // East of center appears above center when east is up.
        let (x, y) = t.latlng_to_screen(LatLng::new(0.0, 10.0));
        assert!(approx(x, 100.0));
        assert!(y < 100.0);
    }
}
