pub mod ffmpeg_reader;
pub mod opencv_reader;
pub mod sampler;

use anyhow::Result;
use clap::ValueEnum;
use opencv::core::Mat;
use std::path::Path;

/// Forward-only source of decoded BGR frames. Not restartable: open a new
/// reader per video. The decoder handle is released on drop.
pub trait VideoReader: Send {
    /// Frame count reported by the container, if any. Only a hint.
    fn frame_count_hint(&self) -> Option<usize>;
    fn source_fps(&self) -> f64;
    /// Next frame in presentation order, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Mat>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReaderBackend {
    Opencv,
    Ffmpeg,
}

pub fn open_reader(backend: ReaderBackend, path: &Path) -> Result<Box<dyn VideoReader>> {
    let reader: Box<dyn VideoReader> = match backend {
        ReaderBackend::Opencv => Box::new(opencv_reader::OpencvReader::new(path)?),
        ReaderBackend::Ffmpeg => Box::new(ffmpeg_reader::FfmpegReader::new(path)?),
    };
    Ok(reader)
}

/// Best-guess frame count from container metadata. Containers that don't
/// store it report zero or garbage, so fall back to duration * fps.
pub(crate) fn estimate_frame_count(stream_frames: f64, duration_secs: f64, fps: f64) -> Option<usize> {
    if stream_frames.is_finite() && stream_frames > 0.0 {
        Some(stream_frames as usize)
    } else if duration_secs > 0.0 && fps > 0.0 {
        Some((duration_secs * fps).round() as usize)
    } else {
        None
    }
}
