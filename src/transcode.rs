//! Preview transcoding. Annotated RGB frames are piped into an encoder
//! session that produces the H.264, faststart-flagged preview clip.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use tracing::debug;

use crate::config::PreviewConfig;
use crate::error::PipelineError;

/// Shape of the raw frames fed to the encoder.
#[derive(Debug, Clone, Copy)]
pub struct RawVideoSpec {
    pub width: usize,
    pub height: usize,
    pub fps: f64,
}

/// An open encode session. Frames are pushed in decode order; `finish`
/// flushes and fails on a non-zero encoder exit.
pub trait PreviewEncoder: Send {
    fn write_frame(&mut self, rgb: &[u8]) -> Result<(), PipelineError>;
    fn finish(self: Box<Self>) -> Result<(), PipelineError>;
}

pub trait Transcoder: Send + Sync {
    fn start(
        &self,
        spec: &RawVideoSpec,
        out_path: &Path,
    ) -> Result<Box<dyn PreviewEncoder>, PipelineError>;
}

/// Encodes through an ffmpeg subprocess reading rawvideo from stdin.
pub struct FfmpegTranscoder {
    cfg: PreviewConfig,
}

impl FfmpegTranscoder {
    pub fn new(cfg: PreviewConfig) -> Self {
        Self { cfg }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn start(
        &self,
        spec: &RawVideoSpec,
        out_path: &Path,
    ) -> Result<Box<dyn PreviewEncoder>, PipelineError> {
        let scale = format!("scale=-2:{}", self.cfg.height);
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", spec.width, spec.height)])
            .args(["-r", &format!("{}", spec.fps)])
            .args(["-i", "pipe:0"])
            .args(["-vf", &scale])
            .args(["-r", &self.cfg.fps.to_string()])
            .args(["-c:v", "libx264"])
            .args(["-preset", &self.cfg.x264_preset])
            .args(["-b:v", &self.cfg.bitrate])
            .args(["-movflags", "+faststart"])
            .arg("-an")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(PipelineError::FfmpegNotFound)?;

        let stdin = child.stdin.take().ok_or(PipelineError::Transcode {
            exit_code: None,
            stderr: "encoder stdin unavailable".to_string(),
        })?;
        debug!(out = %out_path.display(), width = spec.width, height = spec.height, "preview encode started");
        Ok(Box::new(FfmpegEncodeSession {
            child: Some(child),
            stdin: Some(stdin),
            frame_len: spec.width * spec.height * 3,
            out_path: out_path.to_path_buf(),
        }))
    }
}

// `child` is taken by `finish`; `Drop` only kills a session that was
// never finished.
struct FfmpegEncodeSession {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    frame_len: usize,
    out_path: PathBuf,
}

impl PreviewEncoder for FfmpegEncodeSession {
    fn write_frame(&mut self, rgb: &[u8]) -> Result<(), PipelineError> {
        if rgb.len() != self.frame_len {
            return Err(PipelineError::Transcode {
                exit_code: None,
                stderr: format!(
                    "frame size mismatch: got {} bytes, expected {}",
                    rgb.len(),
                    self.frame_len
                ),
            });
        }
        if let Some(stdin) = self.stdin.as_mut() {
            stdin.write_all(rgb)?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), PipelineError> {
        // Closing stdin signals end of stream to the encoder.
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let output = child
            .wait_with_output()
            .map_err(|e| PipelineError::Transcode {
                exit_code: None,
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(PipelineError::Transcode {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        debug!(out = %self.out_path.display(), "preview encode finished");
        Ok(())
    }
}

impl Drop for FfmpegEncodeSession {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullEncoder {
        frame_len: usize,
        frames: usize,
    }

    impl PreviewEncoder for NullEncoder {
        fn write_frame(&mut self, rgb: &[u8]) -> Result<(), PipelineError> {
            assert_eq!(rgb.len(), self.frame_len);
            self.frames += 1;
            Ok(())
        }
        fn finish(self: Box<Self>) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[test]
    fn encoder_sessions_count_frames() {
        let mut enc: Box<dyn PreviewEncoder> = Box::new(NullEncoder { frame_len: 12, frames: 0 });
        enc.write_frame(&[0u8; 12]).unwrap();
        enc.write_frame(&[0u8; 12]).unwrap();
        enc.finish().unwrap();
    }

    /// Session over a stand-in subprocess: its own `Child` is consumed by
    /// `finish`, which must reap the process and report its exit status.
    fn cat_session(frame_len: usize) -> FfmpegEncodeSession {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take();
        FfmpegEncodeSession {
            child: Some(child),
            stdin,
            frame_len,
            out_path: PathBuf::from("/dev/null"),
        }
    }

    #[test]
    fn finish_reaps_the_encoder_process() {
        let mut enc: Box<dyn PreviewEncoder> = Box::new(cat_session(3));
        enc.write_frame(&[1, 2, 3]).unwrap();
        enc.finish().unwrap();
    }

    #[test]
    fn abandoned_session_is_killed_on_drop() {
        let enc = cat_session(3);
        drop(enc);
    }

    #[test]
    fn mismatched_frame_length_is_rejected() {
        let mut enc: Box<dyn PreviewEncoder> = Box::new(cat_session(6));
        let err = enc.write_frame(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, PipelineError::Transcode { .. }));
        enc.finish().unwrap();
    }
}
