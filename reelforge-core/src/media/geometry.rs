use serde::{Deserialize, Serialize};

/// Output frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Even dimensions are required by yuv420p.
    #[must_use]
    pub const fn is_even(self) -> bool {
        self.width % 2 == 0 && self.height % 2 == 0
    }

    #[must_use]
    pub const fn is_portrait(self) -> bool {
        self.height >= self.width
    }
}

/// Round to the nearest even integer, never below 2.
#[must_use]
pub fn round_even(value: f64) -> u32 {
    let halved = (value / 2.0).round().max(1.0);
    (halved as u32).saturating_mul(2)
}

/// Placement of a source image inside the canvas: scaled to the largest size
/// that fits without cropping, centred, padding the rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    /// Visible photo size after scaling
    pub width: u32,
    pub height: u32,
    /// Top-left of the visible photo on the canvas
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    #[must_use]
    pub fn fit(src_width: u32, src_height: u32, canvas: CanvasSize) -> Self {
        if src_width == 0 || src_height == 0 {
            return Self::full(canvas);
        }

        let scale = (f64::from(canvas.width) / f64::from(src_width))
            .min(f64::from(canvas.height) / f64::from(src_height));
        let width = round_even(f64::from(src_width) * scale).min(canvas.width);
        let height = round_even(f64::from(src_height) * scale).min(canvas.height);

        Self {
            scale,
            width,
            height,
            offset_x: (canvas.width - width) / 2,
            offset_y: (canvas.height - height) / 2,
        }
    }

    /// The whole canvas is visible. Used when the source size is unknown.
    #[must_use]
    pub const fn full(canvas: CanvasSize) -> Self {
        Self {
            scale: 1.0,
            width: canvas.width,
            height: canvas.height,
            offset_x: 0,
            offset_y: 0,
        }
    }

    /// Convert a point given as percentages of the visible photo to absolute
    /// canvas pixels.
    #[must_use]
    pub fn map_percent(&self, x_percent: f64, y_percent: f64) -> (f64, f64) {
        let x = f64::from(self.offset_x) + f64::from(self.width) * x_percent.clamp(0.0, 100.0) / 100.0;
        let y = f64::from(self.offset_y) + f64::from(self.height) * y_percent.clamp(0.0, 100.0) / 100.0;
        (x, y)
    }
}

/// Overlay square positioned on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayRect {
    pub x: i64,
    pub y: i64,
    pub size: u32,
}

impl OverlayRect {
    /// Centre an overlay of `base_size * scale` pixels on a frame-relative point.
    #[must_use]
    pub fn centered(letterbox: &Letterbox, x_percent: f64, y_percent: f64, base_size: u32, scale: f64) -> Self {
        let size = round_even(f64::from(base_size) * scale);
        let (cx, cy) = letterbox.map_percent(x_percent, y_percent);
        let half = f64::from(size) / 2.0;
        Self {
            x: (cx - half).round() as i64,
            y: (cy - half).round() as i64,
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTRAIT: CanvasSize = CanvasSize::new(1080, 1920);

    #[test]
    fn test_round_even() {
        assert_eq!(round_even(480.0), 480);
        assert_eq!(round_even(481.0), 482);
        assert_eq!(round_even(0.2), 2);
    }

    #[test]
    fn test_landscape_is_pillarboxed_vertically() {
        let lb = Letterbox::fit(1920, 1080, PORTRAIT);
        assert_eq!(lb.width, 1080);
        assert_eq!(lb.height, 608);
        assert_eq!(lb.offset_x, 0);
        assert_eq!(lb.offset_y, (1920 - 608) / 2);
    }

    #[test]
    fn test_exact_fit_has_no_padding() {
        let lb = Letterbox::fit(540, 960, PORTRAIT);
        assert_eq!((lb.width, lb.height), (1080, 1920));
        assert_eq!((lb.offset_x, lb.offset_y), (0, 0));
        assert!((lb.scale - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_centered_avatar_origin() {
        let lb = Letterbox::fit(1080, 1920, PORTRAIT);
        let rect = OverlayRect::centered(&lb, 50.0, 50.0, 480, 1.0);
        assert_eq!(rect.size, 480);
        assert_eq!(rect.x, 540 - 240);
        assert_eq!(rect.y, 960 - 240);
    }

    #[test]
    fn test_percent_is_relative_to_visible_photo() {
        let lb = Letterbox::fit(1920, 1080, PORTRAIT);
        let (x, y) = lb.map_percent(0.0, 0.0);
        assert!((x - 0.0).abs() < f64::EPSILON);
        assert!((y - f64::from(lb.offset_y)).abs() < f64::EPSILON);

        let (_, bottom) = lb.map_percent(50.0, 100.0);
        assert!((bottom - f64::from(lb.offset_y + lb.height)).abs() < f64::EPSILON);
    }
}
