//! Slideshow composition on top of ffmpeg
//!
//! The pure pieces (geometry, timing, tempo, filter graph) live in their own
//! modules so they can be tested without an encoder. [`Compositor`] wires them
//! to `ffprobe`/`ffmpeg` child processes.

pub mod codec;
pub mod compositor;
pub mod filter;
pub mod geometry;
pub mod probe;
pub mod progress;
pub mod tempo;
pub mod timing;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use codec::OverlayCodec;
pub use compositor::{CompositionOutput, CompositionRequest, Compositor};
pub use geometry::{round_even, CanvasSize, Letterbox, OverlayRect};
pub use probe::MediaInfo;
pub use timing::SlideTiming;

/// Composition failure
#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("probe failed for {}: {reason}", path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("encoder exited with {status}: {excerpt}")]
    EncoderFailed { status: String, excerpt: String },

    #[error("encoder reported success but produced no output")]
    MissingOutput,

    #[error("encoder exceeded {}s", .0.as_secs())]
    EncoderTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompositionError {
    /// Rejections that happen before any encoder work and map to 4xx.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::SourceNotFound(_) | Self::InvalidRequest(_))
    }
}

/// Keep the tail of encoder stderr: the last `max_lines` non-empty lines,
/// trimmed to at most `max_chars` characters from the end.
#[must_use]
pub fn stderr_excerpt(stderr: &str, max_lines: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    let tail = lines[lines.len().saturating_sub(max_lines)..].join("\n");

    let count = tail.chars().count();
    if count <= max_chars {
        return tail;
    }
    tail.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_keeps_last_lines() {
        let stderr = (1..=20).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let excerpt = stderr_excerpt(&stderr, 12, 600);
        assert!(excerpt.starts_with("line 9"));
        assert!(excerpt.ends_with("line 20"));
    }

    #[test]
    fn test_excerpt_bounded_in_chars() {
        let stderr = "x".repeat(2000);
        assert_eq!(stderr_excerpt(&stderr, 12, 600).len(), 600);
        assert_eq!(stderr_excerpt("", 12, 600), "");
    }

    #[test]
    fn test_validation_classification() {
        assert!(CompositionError::SourceNotFound(PathBuf::from("a.jpg")).is_validation());
        assert!(!CompositionError::MissingOutput.is_validation());
    }
}
