// src/decode.rs
//
// Frame source capability: probe clip metadata with ffprobe and read
// sampled RGB frames over an ffmpeg rawvideo pipe. Trait-shaped so tests
// feed synthetic frames instead of spawning subprocesses.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::ingest::ClipSource;
use crate::types::Frame;

#[derive(Debug, Clone)]
pub struct ClipMeta {
    pub fps: f64,
    pub width: usize,
    pub height: usize,
    pub frame_count: u64,
    pub duration_s: f64,
}

/// Sampled frames of one opened clip, in strict temporal order.
pub trait ClipFrames {
    fn meta(&self) -> &ClipMeta;
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

/// Opens clips for sampled decoding.
pub trait FrameSource: Send + Sync {
    fn open(&self, clip: &ClipSource, sample_fps: f64) -> Result<Box<dyn ClipFrames>, PipelineError>;
}

// ---------------------------------------------------------------------------
// ffprobe metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<usize>,
    height: Option<usize>,
    /// e.g. "30/1" or "24000/1001"
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse an ffprobe rational rate like "30/1" or "24000/1001".
pub(crate) fn parse_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            Some(num / den)
        }
        None => rate.parse().ok(),
    }
}

fn probe_clip(path: &Path, clip_id: &str) -> Result<ClipMeta, PipelineError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(PipelineError::FfmpegNotFound)?;

    if !output.status.success() {
        return Err(PipelineError::UnreadableVideo {
            clip_id: clip_id.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let parsed: FfprobeOutput =
        serde_json::from_slice(&output.stdout).map_err(|e| PipelineError::UnreadableVideo {
            clip_id: clip_id.to_string(),
            reason: format!("ffprobe output parse: {e}"),
        })?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| PipelineError::UnreadableVideo {
            clip_id: clip_id.to_string(),
            reason: "no video stream".to_string(),
        })?;

    let (Some(width), Some(height)) = (video.width, video.height) else {
        return Err(PipelineError::UnreadableVideo {
            clip_id: clip_id.to_string(),
            reason: "video stream has no dimensions".to_string(),
        });
    };

    let fps = video
        .r_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .filter(|f| *f > 0.0)
        .unwrap_or(30.0);

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    let duration_s = parsed
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse().ok())
        .unwrap_or_else(|| {
            if fps > 0.0 {
                frame_count as f64 / fps
            } else {
                0.0
            }
        });

    Ok(ClipMeta {
        fps,
        width,
        height,
        frame_count,
        duration_s,
    })
}

// ---------------------------------------------------------------------------
// ffmpeg rawvideo reader
// ---------------------------------------------------------------------------

pub struct FfmpegFrameSource;

struct FfmpegClipFrames {
    meta: ClipMeta,
    sample_fps: f64,
    child: Child,
    frame_index: u64,
    done: bool,
}

impl FrameSource for FfmpegFrameSource {
    fn open(&self, clip: &ClipSource, sample_fps: f64) -> Result<Box<dyn ClipFrames>, PipelineError> {
        let meta = probe_clip(&clip.path, &clip.clip_id)?;
        debug!(
            clip_id = %clip.clip_id,
            width = meta.width,
            height = meta.height,
            fps = meta.fps,
            duration_s = meta.duration_s,
            "clip probed"
        );

        let child = Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(&clip.path)
            .args([
                "-vf",
                &format!("fps={sample_fps}"),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(PipelineError::FfmpegNotFound)?;

        Ok(Box::new(FfmpegClipFrames {
            meta,
            sample_fps,
            child,
            frame_index: 0,
            done: false,
        }))
    }
}

impl ClipFrames for FfmpegClipFrames {
    fn meta(&self) -> &ClipMeta {
        &self.meta
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.done {
            return Ok(None);
        }
        let frame_bytes = self.meta.width * self.meta.height * 3;
        let mut data = vec![0u8; frame_bytes];

        let stdout = self
            .child
            .stdout
            .as_mut()
            .ok_or_else(|| PipelineError::UnreadableVideo {
                clip_id: String::new(),
                reason: "ffmpeg stdout closed".to_string(),
            })?;

        match stdout.read_exact(&mut data) {
            Ok(()) => {
                let timestamp = self.frame_index as f64 / self.sample_fps;
                self.frame_index += 1;
                Ok(Some(Frame {
                    data,
                    width: self.meta.width,
                    height: self.meta.height,
                    timestamp,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.done = true;
                let status = self.child.wait()?;
                if !status.success() {
                    warn!(code = ?status.code(), "ffmpeg decode exited non-zero");
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FfmpegClipFrames {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
