//! ffmpeg invocation for a fully resolved render

use std::fmt::Write as _;
use std::path::PathBuf;

use super::codec::OverlayCodec;
use super::geometry::{CanvasSize, Letterbox, OverlayRect};
use super::timing::SlideTiming;
use crate::models::TimeRange;

#[derive(Debug, Clone, PartialEq)]
pub struct SlideInput {
    pub path: PathBuf,
    /// Still images are looped by the image demuxer; clips are stream-looped.
    pub still: bool,
    pub letterbox: Letterbox,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayInput {
    pub path: PathBuf,
    pub codec: OverlayCodec,
    pub rect: OverlayRect,
    pub visible: TimeRange,
    pub speed: f64,
}

/// Everything the encoder needs, with all probing already done
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub canvas: CanvasSize,
    pub fps: u32,
    pub timing: SlideTiming,
    pub slides: Vec<SlideInput>,
    pub audio: PathBuf,
    pub overlays: Vec<OverlayInput>,
    pub output: PathBuf,
}

impl RenderPlan {
    fn audio_input_index(&self) -> usize {
        self.slides.len()
    }

    fn overlay_input_index(&self, overlay: usize) -> usize {
        self.slides.len() + 1 + overlay
    }

    /// `-filter_complex` graph producing `[vout]`
    #[must_use]
    pub fn filter_graph(&self) -> String {
        let CanvasSize { width, height } = self.canvas;
        let mut graph = String::new();

        for (i, slide) in self.slides.iter().enumerate() {
            let lb = &slide.letterbox;
            let _ = write!(
                graph,
                "[{i}:v]scale={}:{},pad={width}:{height}:{}:{}:color=black,setsar=1,fps={},\
                 format=yuv420p,trim=duration={:.3},setpts=PTS-STARTPTS[s{i}];",
                lb.width,
                lb.height,
                lb.offset_x,
                lb.offset_y,
                self.fps,
                self.timing.range(i).duration(),
            );
        }

        for i in 0..self.slides.len() {
            let _ = write!(graph, "[s{i}]");
        }
        let base = if self.overlays.is_empty() { "vout" } else { "base" };
        let _ = write!(graph, "concat=n={}:v=1:a=0[{base}]", self.slides.len());

        let mut current = base.to_string();
        for (k, overlay) in self.overlays.iter().enumerate() {
            let input = self.overlay_input_index(k);
            let size = overlay.rect.size;
            let next = if k + 1 == self.overlays.len() {
                "vout".to_string()
            } else {
                format!("o{k}")
            };
            let _ = write!(
                graph,
                ";[{input}:v]scale={size}:{size},setpts=PTS/{:.4},format=yuva420p[a{k}]\
                 ;[{current}][a{k}]overlay=x={}:y={}:enable='between(t,{:.3},{:.3})':shortest=1[{next}]",
                overlay.speed,
                overlay.rect.x,
                overlay.rect.y,
                overlay.visible.start,
                overlay.visible.end,
            );
            current = next;
        }

        graph
    }

    /// Full ffmpeg argument list, output path last
    #[must_use]
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostats",
            "-progress",
            "pipe:1",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        for (i, slide) in self.slides.iter().enumerate() {
            if slide.still {
                args.extend(["-loop".to_string(), "1".to_string()]);
                args.extend(["-framerate".to_string(), self.fps.to_string()]);
            } else {
                args.extend(["-stream_loop".to_string(), "-1".to_string()]);
            }
            // Bound each input so looping never outruns its slot.
            args.extend([
                "-t".to_string(),
                format!("{:.3}", self.timing.range(i).duration()),
                "-i".to_string(),
                slide.path.display().to_string(),
            ]);
        }

        args.extend(["-i".to_string(), self.audio.display().to_string()]);

        for overlay in &self.overlays {
            args.extend([
                "-stream_loop".to_string(),
                "-1".to_string(),
                "-c:v".to_string(),
                overlay.codec.decoder().to_string(),
                "-i".to_string(),
                overlay.path.display().to_string(),
            ]);
        }

        args.extend([
            "-filter_complex".to_string(),
            self.filter_graph(),
            "-map".to_string(),
            "[vout]".to_string(),
            "-map".to_string(),
            format!("{}:a:0", self.audio_input_index()),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-profile:v".to_string(),
            "high".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            self.fps.to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-t".to_string(),
            format!("{:.3}", self.timing.total_secs),
            self.output.display().to_string(),
        ]);

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANVAS: CanvasSize = CanvasSize::new(1080, 1920);

    fn plan(slides: usize, overlays: Vec<OverlayInput>) -> RenderPlan {
        RenderPlan {
            canvas: CANVAS,
            fps: 30,
            timing: SlideTiming::even(30.0, slides),
            slides: (0..slides)
                .map(|i| SlideInput {
                    path: PathBuf::from(format!("/up/{i}.jpg")),
                    still: true,
                    letterbox: Letterbox::fit(1920, 1080, CANVAS),
                })
                .collect(),
            audio: PathBuf::from("/up/song.mp3"),
            overlays,
            output: PathBuf::from("/work/temp/job/render.mp4"),
        }
    }

    fn overlay() -> OverlayInput {
        let lb = Letterbox::fit(1080, 1920, CANVAS);
        OverlayInput {
            path: PathBuf::from("/avatars/cat.webm"),
            codec: OverlayCodec::Vp9,
            rect: OverlayRect::centered(&lb, 50.0, 50.0, 480, 1.0),
            visible: TimeRange { start: 10.0, end: 20.0 },
            speed: 1.5,
        }
    }

    #[test]
    fn test_slides_concatenated_in_order() {
        let graph = plan(3, Vec::new()).filter_graph();
        assert!(graph.contains("[s0][s1][s2]concat=n=3:v=1:a=0[vout]"));
        assert!(graph.contains("[0:v]scale=1080:608,pad=1080:1920:0:656:color=black"));
        assert!(graph.contains("trim=duration=10.000"));
        assert!(!graph.contains("overlay"));
    }

    #[test]
    fn test_overlay_gated_to_slide() {
        let graph = plan(3, vec![overlay()]).filter_graph();
        assert!(graph.contains("concat=n=3:v=1:a=0[base]"));
        assert!(graph.contains("[4:v]scale=480:480,setpts=PTS/1.5000"));
        assert!(graph.contains("[base][a0]overlay=x=300:y=720:enable='between(t,10.000,20.000)':shortest=1[vout]"));
    }

    #[test]
    fn test_chained_overlays_end_in_vout() {
        let graph = plan(2, vec![overlay(), overlay()]).filter_graph();
        assert!(graph.contains("[base][a0]overlay"));
        assert!(graph.contains("[o0][a1]overlay"));
        assert!(graph.ends_with("[vout]"));
    }

    #[test]
    fn test_encoder_args() {
        let args = plan(3, vec![overlay()]).ffmpeg_args();
        let joined = args.join(" ");

        assert!(joined.contains("-progress pipe:1"));
        assert!(joined.contains("-stream_loop -1 -c:v libvpx-vp9 -i /avatars/cat.webm"));
        assert!(joined.contains("-map 3:a:0"));
        assert!(joined.contains("-c:v libx264 -profile:v high"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert!(joined.contains("-b:a 192k"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.contains("-t 30.000"));
        assert_eq!(args.last().map(String::as_str), Some("/work/temp/job/render.mp4"));
    }
}
