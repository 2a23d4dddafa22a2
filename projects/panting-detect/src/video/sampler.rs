use super::VideoReader;
use anyhow::Result;
use opencv::core::Mat;

/// Applies the frame-interval stride on top of a reader: only frames at
/// indices 0, N, 2N, ... are yielded.
///
/// Skipped frames are still fully decoded and then discarded, so a corrupt
/// frame fails the scan even when it isn't sampled.
pub struct SampledFrames {
    reader: Box<dyn VideoReader>,
    frame_interval: usize,
    next_index: usize,
    done: bool,
}

/// One decoded frame as seen by the sampler.
pub enum SampledFrame {
    /// On the stride: should be classified.
    Sampled { index: usize, frame: Mat },
    /// Decoded and dropped.
    Skipped { index: usize },
}

impl SampledFrames {
    pub fn new(reader: Box<dyn VideoReader>, frame_interval: usize) -> Self {
        Self {
            reader,
            frame_interval: frame_interval.max(1),
            next_index: 0,
            done: false,
        }
    }

    pub fn frame_count_hint(&self) -> Option<usize> {
        self.reader.frame_count_hint()
    }

    pub fn source_fps(&self) -> f64 {
        self.reader.source_fps()
    }

    /// Number of frames decoded so far, sampled or not.
    pub fn frames_decoded(&self) -> usize {
        self.next_index
    }
}

impl Iterator for SampledFrames {
    type Item = Result<SampledFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_frame() {
            Ok(Some(frame)) => {
                let index = self.next_index;
                self.next_index += 1;
                if index % self.frame_interval == 0 {
                    Some(Ok(SampledFrame::Sampled { index, frame }))
                } else {
                    Some(Ok(SampledFrame::Skipped { index }))
                }
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
