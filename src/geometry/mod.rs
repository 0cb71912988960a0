pub mod mapper;
pub mod matrix;
pub mod rect;

pub use mapper::{
    apply_zoom, clamp_zoom, compute_crop_region, compute_focus_region, compute_preview_transform,
    map_to_sensor, map_to_view, max_zoom, select_preview_size, tap_rect, CameraGeometry,
    PreviewTransform, Rotation, Zoom,
};
pub use matrix::Mat3;
pub use rect::{PointF, Rect, RectF, Size};
