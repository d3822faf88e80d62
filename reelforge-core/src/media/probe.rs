use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::CompositionError;

/// What the compositor needs to know about an input file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    pub video_codec: Option<String>,
    /// Format tags merged with stream tags; format tags win.
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl MediaInfo {
    /// Parse `ffprobe -print_format json -show_format -show_streams` output.
    pub fn from_ffprobe_json(json: &str) -> Result<Self, serde_json::Error> {
        let output: ProbeOutput = serde_json::from_str(json)?;

        let video = output
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));

        let mut tags = HashMap::new();
        for stream in &output.streams {
            tags.extend(stream.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(format) = &output.format {
            tags.extend(format.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let duration = output
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .or_else(|| output.streams.iter().find_map(|s| s.duration.as_deref()))
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0);

        Ok(Self {
            width: video.and_then(|s| s.width),
            height: video.and_then(|s| s.height),
            duration,
            video_codec: video.and_then(|s| s.codec_name.clone()),
            tags,
        })
    }
}

/// Run ffprobe on `path`.
pub async fn probe(ffprobe: &str, path: &Path) -> Result<MediaInfo, CompositionError> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(CompositionError::Probe {
            path: path.to_path_buf(),
            reason: super::stderr_excerpt(&String::from_utf8_lossy(&output.stderr), 3, 200),
        });
    }

    MediaInfo::from_ffprobe_json(&String::from_utf8_lossy(&output.stdout)).map_err(|e| {
        CompositionError::Probe {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image() {
        let json = r#"{
            "streams": [{"codec_type": "video", "codec_name": "mjpeg", "width": 4032, "height": 3024}],
            "format": {"format_name": "image2"}
        }"#;
        let info = MediaInfo::from_ffprobe_json(json).unwrap();
        assert_eq!(info.width, Some(4032));
        assert_eq!(info.height, Some(3024));
        assert_eq!(info.duration, None);
        assert_eq!(info.video_codec.as_deref(), Some("mjpeg"));
    }

    #[test]
    fn test_parse_audio_with_tags() {
        let json = r#"{
            "streams": [{"codec_type": "audio", "codec_name": "mp3", "duration": "29.9", "tags": {"encoder": "x"}}],
            "format": {"duration": "30.040000", "tags": {"TBPM": "128", "title": "t"}}
        }"#;
        let info = MediaInfo::from_ffprobe_json(json).unwrap();
        assert!((info.duration.unwrap() - 30.04).abs() < 1e-9);
        assert_eq!(info.width, None);
        assert_eq!(info.tags.get("TBPM").map(String::as_str), Some("128"));
        assert_eq!(info.tags.len(), 3);
    }

    #[test]
    fn test_parse_webm_overlay() {
        let json = r#"{
            "streams": [{"codec_type": "video", "codec_name": "vp9", "width": 512, "height": 512,
                         "tags": {"alpha_mode": "1"}}],
            "format": {"duration": "2.000000"}
        }"#;
        let info = MediaInfo::from_ffprobe_json(json).unwrap();
        assert_eq!(info.video_codec.as_deref(), Some("vp9"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(MediaInfo::from_ffprobe_json("not json").is_err());
    }
}
