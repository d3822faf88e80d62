//! Overlay tempo heuristic
//!
//! Speeds the avatar animation up or down to roughly follow the music. The BPM
//! comes from whatever the audio file's tags claim; no beat tracking happens.

use std::collections::HashMap;

const BPM_TAG_KEYS: [&str; 3] = ["bpm", "tbpm", "tempo"];
const MIN_PLAUSIBLE_BPM: f64 = 30.0;
const MAX_PLAUSIBLE_BPM: f64 = 300.0;

/// Best-effort BPM from container or stream tags. Keys are matched
/// case-insensitively; implausible values are ignored.
#[must_use]
pub fn bpm_from_tags(tags: &HashMap<String, String>) -> Option<f64> {
    BPM_TAG_KEYS.iter().find_map(|wanted| {
        tags.iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(wanted))
            .find_map(|(_, value)| parse_bpm(value))
    })
}

fn parse_bpm(value: &str) -> Option<f64> {
    // Some taggers write "128 BPM" or "128.00"
    let numeric = value.split_whitespace().next()?;
    let bpm: f64 = numeric.parse().ok()?;
    (MIN_PLAUSIBLE_BPM..=MAX_PLAUSIBLE_BPM).contains(&bpm).then_some(bpm)
}

/// Playback speed for an overlay animated at `baseline_bpm`, clamped to
/// `[min, max]`.
#[must_use]
pub fn playback_multiplier(bpm: f64, baseline_bpm: f64, min: f64, max: f64) -> f64 {
    if bpm <= 0.0 || baseline_bpm <= 0.0 || !bpm.is_finite() {
        return 1.0;
    }
    (bpm / baseline_bpm).clamp(min, max)
}
