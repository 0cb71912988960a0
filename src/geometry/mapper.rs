//! Sensor space <-> view space mapping for overlays, tap-to-focus and zoom

use tracing::{debug, warn};

use super::matrix::Mat3;
use super::rect::{PointF, Rect, RectF, Size};

/// Quarter-turn rotation, clockwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Accepts any multiple of 90, negative values included
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    fn quarter_turns(self) -> usize {
        (self.degrees() / 90) as usize
    }

    /// The image lies on its side: width and height trade places
    pub fn is_sideways(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// Everything the mapper needs to know about the camera and the surface
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraGeometry {
    pub sensor_rotation: Rotation,
    pub display_rotation: Rotation,
    pub front_facing: bool,
    /// Full active pixel array of the sensor
    pub active_region: Rect,
    /// Part of the active array currently streamed, shrinks with zoom
    pub crop_region: Rect,
    pub preview_size: Size,
    pub view_size: Size,
}

impl CameraGeometry {
    pub fn new(preview_size: Size, view_size: Size) -> Self {
        let region = Rect::from_size(preview_size);
        Self {
            active_region: region,
            crop_region: region,
            preview_size,
            view_size,
            ..Default::default()
        }
    }

    pub fn with_rotations(mut self, sensor: Rotation, display: Rotation) -> Self {
        self.sensor_rotation = sensor;
        self.display_rotation = display;
        self
    }

    pub fn with_front_facing(mut self, front_facing: bool) -> Self {
        self.front_facing = front_facing;
        self
    }

    pub fn with_active_region(mut self, active_region: Rect) -> Self {
        self.active_region = active_region;
        self.crop_region = active_region;
        self
    }

    pub fn with_crop_region(mut self, crop_region: Rect) -> Self {
        self.crop_region = crop_region;
        self
    }

    /// Rotation between the sensor image and the view.
    ///
    /// Front sensors are mirrored relative to the display, so the display
    /// rotation adds instead of subtracting.
    pub fn effective_rotation(&self) -> Rotation {
        let sensor = self.sensor_rotation.degrees();
        let display = self.display_rotation.degrees();
        let degrees = if self.front_facing {
            (360 - (sensor + display) % 360) % 360
        } else {
            (360 + sensor - display) % 360
        };
        Rotation::from_degrees(degrees).unwrap_or_default()
    }

    pub fn is_landscape(&self) -> bool {
        self.display_rotation.is_sideways()
    }
}

/// Immutable preview -> view transform, with its inverse cached
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewTransform {
    matrix: Mat3,
    inverse: Mat3,
    rotation: Rotation,
    mirrored: bool,
    source_crop: RectF,
}

impl Default for PreviewTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl PreviewTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Mat3::identity(),
            inverse: Mat3::identity(),
            rotation: Rotation::Deg0,
            mirrored: false,
            source_crop: RectF::empty(),
        }
    }

    pub fn matrix(&self) -> &Mat3 {
        &self.matrix
    }

    pub fn inverse_matrix(&self) -> &Mat3 {
        &self.inverse
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    /// Part of the preview frame that stays visible after scale-to-fill
    pub fn source_crop(&self) -> RectF {
        self.source_crop
    }

    pub fn map_point(&self, point: PointF) -> PointF {
        self.matrix.map_point(point)
    }
}

/// Centered part of the preview that fills the view once scaled.
fn fill_crop(preview: Size, view: Size, rotation: Rotation) -> RectF {
    let (pw, ph) = (preview.width as f32, preview.height as f32);
    let (vw, vh) = (view.width as f32, view.height as f32);

    // source extents that land on the view's x and y axes
    let (along_x, along_y) = if rotation.is_sideways() {
        (ph, pw)
    } else {
        (pw, ph)
    };
    let scale_x = vw / along_x;
    let scale_y = vh / along_y;
    let scale = scale_x.max(scale_y);

    let (visible_x, visible_y) = (vw / scale, vh / scale);
    let (visible_w, visible_h) = if rotation.is_sideways() {
        (visible_y, visible_x)
    } else {
        (visible_x, visible_y)
    };
    debug!(scale_x, scale_y, visible_w, visible_h, "fill crop");

    RectF::new(
        (pw - visible_w) / 2.0,
        (ph - visible_h) / 2.0,
        (pw + visible_w) / 2.0,
        (ph + visible_h) / 2.0,
    )
}

/// Builds the transform taking preview-frame coordinates to view coordinates.
///
/// The preview is scaled to fill the view and the excess is cropped
/// symmetrically. Corners are matched per rotation with a four point
/// mapping; a front camera is mirrored horizontally in frame space first.
/// Empty preview or view sizes yield the identity.
pub fn compute_preview_transform(geometry: &CameraGeometry) -> PreviewTransform {
    if geometry.preview_size.is_empty() || geometry.view_size.is_empty() {
        warn!(?geometry, "preview or view size unknown, using identity transform");
        return PreviewTransform::identity();
    }

    let rotation = geometry.effective_rotation();
    let crop = fill_crop(geometry.preview_size, geometry.view_size, rotation);
    let view = Rect::from_size(geometry.view_size).to_f32().corners();

    let turns = rotation.quarter_turns();
    let dst: [PointF; 4] = std::array::from_fn(|i| view[(i + turns) % 4]);

    let Some(mut matrix) = Mat3::poly_to_poly(&crop.corners(), &dst) else {
        warn!(?crop, "degenerate preview crop, using identity transform");
        return PreviewTransform::identity();
    };

    if geometry.front_facing {
        let width = geometry.preview_size.width as f64;
        matrix = matrix.concat(&Mat3::translate(width, 0.0).concat(&Mat3::scale(-1.0, 1.0)));
    }

    let Some(inverse) = matrix.inverse() else {
        warn!("preview transform is not invertible, using identity transform");
        return PreviewTransform::identity();
    };

    debug!(
        rotation = rotation.degrees(),
        mirrored = geometry.front_facing,
        ?crop,
        "computed preview transform"
    );

    PreviewTransform {
        matrix,
        inverse,
        rotation,
        mirrored: geometry.front_facing,
        source_crop: crop,
    }
}

/// Sensor-space rectangle to view space. Degenerate input maps to empty.
pub fn map_to_view(rect: &RectF, transform: &PreviewTransform) -> RectF {
    if rect.is_empty() {
        return RectF::empty();
    }
    transform.matrix.map_rect(rect)
}

/// View-space rectangle back to sensor space. Degenerate input maps to empty.
pub fn map_to_sensor(rect: &RectF, transform: &PreviewTransform) -> RectF {
    if rect.is_empty() {
        return RectF::empty();
    }
    transform.inverse.map_rect(rect)
}

/// Metering rectangle for a tap, expressed against the full active array.
///
/// The active array is usually larger than the streamed preview, so the
/// inverse-mapped tap is shifted by half the size difference.
pub fn compute_focus_region(
    view_tap: &RectF,
    geometry: &CameraGeometry,
    transform: &PreviewTransform,
) -> Option<Rect> {
    let sensor = map_to_sensor(view_tap, transform);
    if sensor.is_empty() {
        return None;
    }
    let dx = (geometry.active_region.width() - geometry.preview_size.width as i32) / 2;
    let dy = (geometry.active_region.height() - geometry.preview_size.height as i32) / 2;
    let focus = sensor.offset(dx as f32, dy as f32).truncate();
    debug!(?view_tap, ?focus, "focus region");
    Some(focus)
}

/// Square tap rectangle centred on `point`, clamped to the view.
pub fn tap_rect(point: PointF, size: f32, view: Size) -> RectF {
    let half = size / 2.0;
    RectF::new(
        (point.x - half).max(0.0),
        (point.y - half).max(0.0),
        (point.x + half).min(view.width as f32),
        (point.y + half).min(view.height as f32),
    )
}

/// Crop of the active array for a zoom ratio, centred on the array
pub fn compute_crop_region(zoom_ratio: f32, active_region: Rect) -> Rect {
    if zoom_ratio <= 1.0 {
        return active_region;
    }
    let width = (active_region.width() as f32 / zoom_ratio) as i32;
    let height = (active_region.height() as f32 / zoom_ratio) as i32;
    let left = active_region.left + (active_region.width() - width) / 2;
    let top = active_region.top + (active_region.height() - height) / 2;
    Rect::new(left, top, left + width, top + height)
}

/// Largest zoom that keeps the crop at least as large as the preview
pub fn max_zoom(max_digital_zoom: f32, active_region: Rect, preview_size: Size) -> f32 {
    if preview_size.is_empty() {
        return max_digital_zoom;
    }
    max_digital_zoom
        .min(active_region.width() as f32 / preview_size.width as f32)
        .min(active_region.height() as f32 / preview_size.height as f32)
}

/// Requested ratio limited to `[1, max]`
pub fn clamp_zoom(requested: f32, max: f32) -> f32 {
    if requested > max {
        max
    } else if requested < 1.0 {
        1.0
    } else {
        requested
    }
}

/// Outcome of a zoom request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zoom {
    pub ratio: f32,
    pub crop_region: Rect,
}

/// Clamps a requested zoom and computes the resulting crop region
pub fn apply_zoom(requested: f32, max_digital_zoom: f32, geometry: &CameraGeometry) -> Zoom {
    let max = max_zoom(max_digital_zoom, geometry.active_region, geometry.preview_size);
    let ratio = clamp_zoom(requested, max);
    let crop_region = compute_crop_region(ratio, geometry.active_region);
    debug!(requested, max, ratio, ?crop_region, "zoom");
    Zoom { ratio, crop_region }
}

/// Picks the candidate preview size whose aspect ratio best matches the surface.
///
/// Candidates larger than the screen are ignored. In portrait with a
/// sideways sensor the surface ratio is inverted, since the preview is
/// rotated onto it. Falls back to the first candidate.
pub fn select_preview_size(
    candidates: &[Size],
    surface: Size,
    landscape: bool,
    sensor_rotation: Rotation,
    screen: Size,
) -> Option<Size> {
    let first = *candidates.first()?;
    let surface_ratio = if !landscape && sensor_rotation.is_sideways() {
        Size::new(surface.height, surface.width).aspect()
    } else {
        surface.aspect()
    };

    let best = candidates
        .iter()
        .filter(|size| size.area() <= screen.area())
        .fold(first, |best, size| {
            if (size.aspect() - surface_ratio).abs() < (best.aspect() - surface_ratio).abs() {
                *size
            } else {
                best
            }
        });
    debug!(?best, surface_ratio, "selected preview size");
    Some(best)
}
