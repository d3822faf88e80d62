use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::codec::OverlayCodec;
use super::filter::{OverlayInput, RenderPlan, SlideInput};
use super::geometry::{CanvasSize, Letterbox, OverlayRect};
use super::probe::{probe, MediaInfo};
use super::progress::{EncoderProgress, ENCODE_PERCENT_START};
use super::timing::SlideTiming;
use super::{stderr_excerpt, tempo, CompositionError};
use crate::config::MediaConfig;
use crate::models::{AvatarPlacement, JobId, ProgressReporter};

const MIN_AVATAR_SCALE: f64 = 0.1;
const MAX_AVATAR_SCALE: f64 = 3.0;
const STDERR_EXCERPT_LINES: usize = 12;
const STDERR_EXCERPT_CHARS: usize = 600;
const STILL_IMAGE_CODECS: [&str; 6] = ["mjpeg", "png", "webp", "bmp", "tiff", "jpegls"];

/// One slideshow to render
#[derive(Debug, Clone)]
pub struct CompositionRequest {
    pub job_id: JobId,
    /// Images or clips in display order
    pub slides: Vec<PathBuf>,
    pub audio: PathBuf,
    /// Total length; the audio length when absent
    pub duration: Option<f64>,
    pub fps: u32,
    pub canvas: CanvasSize,
    pub avatars: Vec<AvatarPlacement>,
}

impl CompositionRequest {
    /// Every file the request reads
    pub fn inputs(&self) -> impl Iterator<Item = &Path> {
        self.slides
            .iter()
            .chain(std::iter::once(&self.audio))
            .chain(self.avatars.iter().map(|a| &a.source))
            .map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositionOutput {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub slides: usize,
    pub bpm: f64,
}

/// Renders slideshows with ffmpeg
#[derive(Clone)]
pub struct Compositor {
    config: Arc<MediaConfig>,
}

impl Compositor {
    #[must_use]
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Synchronous checks run before a job is created.
    pub fn validate(&self, request: &CompositionRequest) -> Result<(), CompositionError> {
        let cfg = &self.config;

        if request.slides.is_empty() {
            return Err(CompositionError::InvalidRequest("at least one slide is required".to_string()));
        }
        if request.slides.len() > cfg.max_slides {
            return Err(CompositionError::InvalidRequest(format!(
                "at most {} slides are allowed, got {}",
                cfg.max_slides,
                request.slides.len()
            )));
        }

        if let Some(duration) = request.duration {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(CompositionError::InvalidRequest("duration must be positive".to_string()));
            }
            if duration > cfg.max_duration_secs {
                return Err(CompositionError::InvalidRequest(format!(
                    "duration {duration}s exceeds the {}s limit",
                    cfg.max_duration_secs
                )));
            }
        }

        if request.fps == 0 || request.fps > cfg.max_fps {
            return Err(CompositionError::InvalidRequest(format!(
                "fps must be between 1 and {}",
                cfg.max_fps
            )));
        }

        let canvas = request.canvas;
        if canvas.width == 0 || canvas.height == 0 || !canvas.is_even() || !canvas.is_portrait() {
            return Err(CompositionError::InvalidRequest(format!(
                "resolution {}x{} must be even and portrait",
                canvas.width, canvas.height
            )));
        }

        for avatar in &request.avatars {
            if avatar.slide_index >= request.slides.len() {
                return Err(CompositionError::InvalidRequest(format!(
                    "avatar '{}' refers to slide {} of {}",
                    avatar.character,
                    avatar.slide_index,
                    request.slides.len()
                )));
            }
            let in_percent = |v: f64| (0.0..=100.0).contains(&v);
            if !in_percent(avatar.x_percent) || !in_percent(avatar.y_percent) {
                return Err(CompositionError::InvalidRequest(format!(
                    "avatar '{}' position must be within 0..=100 percent",
                    avatar.character
                )));
            }
            if !(MIN_AVATAR_SCALE..=MAX_AVATAR_SCALE).contains(&avatar.scale) {
                return Err(CompositionError::InvalidRequest(format!(
                    "avatar '{}' scale must be within {MIN_AVATAR_SCALE}..={MAX_AVATAR_SCALE}",
                    avatar.character
                )));
            }
        }

        if let Some(missing) = request.inputs().find(|p| !p.is_file()) {
            return Err(CompositionError::SourceNotFound(missing.to_path_buf()));
        }

        Ok(())
    }

    /// Render `request` into `work/output/{job_id}.mp4`.
    ///
    /// Intermediate files under `work/temp/{job_id}` are left behind on
    /// failure for the lifecycle sweep to reclaim.
    pub async fn compose(
        &self,
        request: &CompositionRequest,
        progress: &ProgressReporter,
    ) -> Result<CompositionOutput, CompositionError> {
        // Inputs may have been swept between acceptance and start.
        self.validate(request)?;

        progress.report(2, "Analyzing audio");
        let (plan, bpm) = self.plan(request, progress).await?;

        let job_dir = self.config.temp_dir().join(request.job_id.as_str());
        tokio::fs::create_dir_all(&job_dir).await?;
        tokio::fs::create_dir_all(self.config.output_dir()).await?;

        progress.report(ENCODE_PERCENT_START, "Encoding video");
        self.run_encoder(&plan, progress).await?;

        match tokio::fs::metadata(&plan.output).await {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => return Err(CompositionError::MissingOutput),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CompositionError::MissingOutput);
            }
            Err(e) => return Err(e.into()),
        }

        progress.report(97, "Finalizing");
        let final_path = self.config.output_dir().join(format!("{}.mp4", request.job_id));
        tokio::fs::rename(&plan.output, &final_path).await?;
        if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
            debug!(path = %job_dir.display(), error = %e, "Could not remove render directory");
        }

        info!(
            job_id = %request.job_id,
            slides = plan.slides.len(),
            overlays = plan.overlays.len(),
            duration_secs = plan.timing.total_secs,
            "Composition finished"
        );

        Ok(CompositionOutput {
            path: final_path,
            duration_secs: plan.timing.total_secs,
            slides: plan.slides.len(),
            bpm,
        })
    }

    async fn plan(
        &self,
        request: &CompositionRequest,
        progress: &ProgressReporter,
    ) -> Result<(RenderPlan, f64), CompositionError> {
        let cfg = &self.config;
        let ffprobe = cfg.ffprobe_path.as_str();

        let audio = probe(ffprobe, &request.audio).await?;
        let total = request
            .duration
            .or(audio.duration)
            .map(|d| d.min(cfg.max_duration_secs))
            .ok_or_else(|| CompositionError::Probe {
                path: request.audio.clone(),
                reason: "audio duration unknown and no duration requested".to_string(),
            })?;
        let bpm = tempo::bpm_from_tags(&audio.tags).unwrap_or(cfg.default_bpm);
        let speed = tempo::playback_multiplier(bpm, cfg.avatar_baseline_bpm, cfg.tempo_min, cfg.tempo_max);
        debug!(job_id = %request.job_id, total, bpm, speed, "Timeline resolved");

        progress.report(4, "Preparing slides");
        let mut slides = Vec::with_capacity(request.slides.len());
        for path in &request.slides {
            let info = probe(ffprobe, path).await?;
            let letterbox = match (info.width, info.height) {
                (Some(w), Some(h)) => Letterbox::fit(w, h, request.canvas),
                _ => {
                    warn!(path = %path.display(), "Slide dimensions unknown, assuming full canvas");
                    Letterbox::full(request.canvas)
                }
            };
            slides.push(SlideInput {
                path: path.clone(),
                still: is_still_image(&info),
                letterbox,
            });
        }

        let timing = SlideTiming::even(total, slides.len());

        progress.report(7, "Placing avatars");
        let mut overlays = Vec::with_capacity(request.avatars.len());
        for avatar in &request.avatars {
            let info = probe(ffprobe, &avatar.source).await?;
            let codec = info
                .video_codec
                .as_deref()
                .and_then(OverlayCodec::from_codec_name)
                .ok_or_else(|| CompositionError::Probe {
                    path: avatar.source.clone(),
                    reason: format!(
                        "unsupported overlay codec {}",
                        info.video_codec.as_deref().unwrap_or("none")
                    ),
                })?;
            let slide = &slides[avatar.slide_index];
            overlays.push(OverlayInput {
                path: avatar.source.clone(),
                codec,
                rect: OverlayRect::centered(
                    &slide.letterbox,
                    avatar.x_percent,
                    avatar.y_percent,
                    cfg.avatar_base_size,
                    avatar.scale,
                ),
                visible: timing.range(avatar.slide_index),
                speed,
            });
        }

        let plan = RenderPlan {
            canvas: request.canvas,
            fps: request.fps,
            timing,
            slides,
            audio: request.audio.clone(),
            overlays,
            output: cfg
                .temp_dir()
                .join(request.job_id.as_str())
                .join("render.mp4"),
        };
        Ok((plan, bpm))
    }

    async fn run_encoder(&self, plan: &RenderPlan, progress: &ProgressReporter) -> Result<(), CompositionError> {
        let limit = self.config.encoder_timeout(plan.timing.total_secs);
        let args = plan.ffmpeg_args();
        debug!(ffmpeg = %self.config.ffmpeg_path, args = ?args, "Starting encoder");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("encoder stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("encoder stderr not captured"))?;

        // ffmpeg blocks once the stderr pipe fills, so drain it alongside progress.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
            buf
        });

        let total = plan.timing.total_secs;
        let run = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut state = EncoderProgress::default();
            let mut last_percent = ENCODE_PERCENT_START;
            while let Some(line) = lines.next_line().await? {
                if state.update(&line) {
                    let percent = state.percent(total);
                    if percent > last_percent {
                        last_percent = percent;
                        progress.report(percent, "Encoding video");
                    }
                }
            }
            child.wait().await
        };
        let outcome = tokio::time::timeout(limit, run).await;

        let status = match outcome {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                stderr_task.abort();
                warn!(timeout_secs = limit.as_secs(), output = %plan.output.display(), "Encoder timed out");
                return Err(CompositionError::EncoderTimeout(limit));
            }
        };

        let stderr = tokio::time::timeout(Duration::from_secs(5), stderr_task)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();

        if !status.success() {
            let excerpt = stderr_excerpt(&stderr, STDERR_EXCERPT_LINES, STDERR_EXCERPT_CHARS);
            warn!(status = %status, excerpt = %excerpt, "Encoder failed");
            return Err(CompositionError::EncoderFailed {
                status: status.to_string(),
                excerpt,
            });
        }

        Ok(())
    }
}

fn is_still_image(info: &MediaInfo) -> bool {
    info.duration.is_none()
        || info
            .video_codec
            .as_deref()
            .is_some_and(|c| STILL_IMAGE_CODECS.contains(&c))
}
