use std::fmt;

/// Overlay sources are WebM with alpha. ffmpeg's native VP8/VP9 decoders drop
/// the alpha plane, so the libvpx decoder matching the stream must be forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayCodec {
    Vp8,
    Vp9,
}

impl OverlayCodec {
    /// Map an ffprobe `codec_name`.
    #[must_use]
    pub fn from_codec_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "vp8" => Some(Self::Vp8),
            "vp9" => Some(Self::Vp9),
            _ => None,
        }
    }

    #[must_use]
    pub const fn decoder(self) -> &'static str {
        match self {
            Self::Vp8 => "libvpx",
            Self::Vp9 => "libvpx-vp9",
        }
    }
}

impl fmt::Display for OverlayCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vp8 => write!(f, "vp8"),
            Self::Vp9 => write!(f, "vp9"),
        }
    }
}
