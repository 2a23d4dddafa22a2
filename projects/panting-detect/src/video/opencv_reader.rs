use super::{estimate_frame_count, VideoReader};
use anyhow::{anyhow, Context, Result};
use opencv::{
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT},
};
use std::path::Path;

/// Reader backed by `cv::VideoCapture`. Frames come out in OpenCV's native
/// BGR channel order.
pub struct OpencvReader {
    capture: VideoCapture,
    source_fps: f64,
    total_frames: Option<usize>,
}

impl OpencvReader {
    pub fn new(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("Video path is not valid UTF-8: {}", path.display()))?;

        let capture = VideoCapture::from_file(path_str, CAP_ANY)
            .with_context(|| format!("Failed to open video file: {}", path_str))?;
        if !capture.is_opened()? {
            return Err(anyhow!("Failed to open video file: {}", path_str));
        }

        let mut fps = capture.get(CAP_PROP_FPS)?;
        if fps <= 0.0 {
            tracing::warn!("OpencvReader: Failed to get FPS from metadata, falling back to 30.0");
            fps = 30.0;
        }
        let raw_count = capture.get(CAP_PROP_FRAME_COUNT)?;
        let total_frames = estimate_frame_count(raw_count, 0.0, fps);

        tracing::info!(
            "OpencvReader: opened {}, fps={:.2}, stream_frames={:?}",
            path_str,
            fps,
            total_frames
        );

        Ok(Self {
            capture,
            source_fps: fps,
            total_frames,
        })
    }
}

impl VideoReader for OpencvReader {
    fn frame_count_hint(&self) -> Option<usize> {
        self.total_frames
    }

    fn source_fps(&self) -> f64 {
        self.source_fps
    }

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        // `read` returning false is how VideoCapture signals end of stream.
        let success = self.capture.read(&mut frame).context("VideoCapture read failed")?;
        if !success || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}
