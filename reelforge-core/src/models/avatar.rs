use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An animated character overlaid on one slide.
///
/// Position is frame-relative to the visible photo area of that slide, not
/// to the padded canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarPlacement {
    pub character: String,
    pub slide_index: usize,
    /// Horizontal center, percent of visible width (0..=100)
    pub x_percent: f64,
    /// Vertical center, percent of visible height (0..=100)
    pub y_percent: f64,
    pub scale: f64,
    /// Resolved overlay source file
    pub source: PathBuf,
}

/// Seconds within the composed timeline during which an overlay is shown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    #[must_use]
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}
