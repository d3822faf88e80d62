//! `-progress pipe:1` parsing
//!
//! ffmpeg prints blocks of `key=value` lines, each block terminated by
//! `progress=continue` or `progress=end`.

/// Percent range the encoder phase maps into; probing and graph building
/// take the part below.
pub const ENCODE_PERCENT_START: u8 = 10;
pub const ENCODE_PERCENT_END: u8 = 95;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncoderProgress {
    pub out_time_secs: f64,
    pub finished: bool,
}

impl EncoderProgress {
    /// Feed one line. Returns true when the line closes a progress block.
    pub fn update(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.trim().split_once('=') else {
            return false;
        };
        match key {
            // Despite the name, out_time_ms is in microseconds as well.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    if us >= 0 {
                        self.out_time_secs = us as f64 / 1_000_000.0;
                    }
                }
                false
            }
            "progress" => {
                self.finished = value == "end";
                true
            }
            _ => false,
        }
    }

    /// Overall job percent for the current encoder position.
    #[must_use]
    pub fn percent(&self, total_secs: f64) -> u8 {
        let fraction = if total_secs > 0.0 {
            (self.out_time_secs / total_secs).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let span = f64::from(ENCODE_PERCENT_END - ENCODE_PERCENT_START);
        ENCODE_PERCENT_START + (fraction * span).round() as u8
    }
}
