use crate::error::AnalysisError;
use crate::pipeline::classifier::{ClassifierSource, FrameClassifier};
use crate::pipeline::types::{AnalysisReport, Prediction, ScanState, Verdict, OPEN_ERROR_SENTINEL};
use crate::video::sampler::{SampledFrame, SampledFrames};
use crate::video::{open_reader, ReaderBackend, VideoReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Classify every Nth frame (1 = every frame).
    pub frame_interval: usize,
    pub backend: ReaderBackend,
    /// Stop decoding after the first positive frame.
    pub stop_on_first_positive: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            frame_interval: 1,
            backend: ReaderBackend::Opencv,
            stop_on_first_positive: false,
        }
    }
}

/// Progress notifications emitted while a video is scanned.
#[derive(Debug, Clone, Copy)]
pub enum ScanEvent {
    Opened { frame_count_hint: Option<usize> },
    Frame { index: usize, prediction: Option<Prediction> },
}

impl ScanEvent {
    /// One-line summary of a classified frame; `None` for everything else.
    pub fn progress_message(&self) -> Option<String> {
        match self {
            ScanEvent::Frame {
                index,
                prediction: Some(p),
            } => Some(format!(
                "frame {} confidence {:.2}{}",
                index,
                p.confidence,
                if p.is_positive() { " (panting)" } else { "" }
            )),
            _ => None,
        }
    }
}

/// Loads the model, walks the sampled frames and reduces the labels to a
/// verdict. One analysis is a single blocking pass with no retries.
pub struct VideoAnalyzer {
    classifiers: Arc<dyn ClassifierSource>,
    options: ScanOptions,
}

impl VideoAnalyzer {
    pub fn new(classifiers: Arc<dyn ClassifierSource>, options: ScanOptions) -> Self {
        Self {
            classifiers,
            options,
        }
    }

    pub fn analyze(&self, path: &Path) -> Result<AnalysisReport, AnalysisError> {
        self.analyze_observed(path, |_| {})
    }

    /// Legacy string contract: the verdict message, or the open-failure
    /// sentinel in place of an `Open` error. Other errors still propagate.
    pub fn analyze_legacy(&self, path: &Path) -> Result<String, AnalysisError> {
        match self.analyze(path) {
            Ok(report) => Ok(report.message.to_string()),
            Err(e) if e.is_open() => {
                tracing::warn!("{}", e);
                Ok(OPEN_ERROR_SENTINEL.to_string())
            }
            Err(e) => Err(e),
        }
    }

    pub fn analyze_observed<F>(&self, path: &Path, observer: F) -> Result<AnalysisReport, AnalysisError>
    where
        F: FnMut(ScanEvent),
    {
        let classifier = self.classifiers.load()?;

        let mut scan = Scan::new();
        let reader = match open_reader(self.options.backend, path) {
            Ok(reader) => reader,
            Err(e) => {
                scan.transition(ScanState::Failed);
                return Err(AnalysisError::Open {
                    path: path.display().to_string(),
                    reason: format!("{:#}", e),
                });
            }
        };
        scan.transition(ScanState::Opened);
        scan.transition(ScanState::Scanning);

        let result = self.scan(reader, classifier.as_ref(), observer);
        scan.transition(if result.is_ok() {
            ScanState::Done
        } else {
            ScanState::Failed
        });
        result
    }

    /// Drives an opened reader to exhaustion (or the first positive frame
    /// when short-circuiting) and builds the report.
    pub(crate) fn scan<F>(
        &self,
        reader: Box<dyn VideoReader>,
        classifier: &dyn FrameClassifier,
        mut observer: F,
    ) -> Result<AnalysisReport, AnalysisError>
    where
        F: FnMut(ScanEvent),
    {
        let start = Instant::now();
        let mut frames = SampledFrames::new(reader, self.options.frame_interval);
        tracing::debug!(
            "Scanning at {:.2} fps, classifying every {} frame(s)",
            frames.source_fps(),
            self.options.frame_interval
        );
        observer(ScanEvent::Opened {
            frame_count_hint: frames.frame_count_hint(),
        });

        let mut labels = Vec::new();
        let mut max_confidence: Option<f32> = None;
        let mut next_index = 0;

        for item in frames.by_ref() {
            let sampled = item.map_err(|e| AnalysisError::Decode {
                index: next_index,
                reason: format!("{:#}", e),
            })?;

            match sampled {
                SampledFrame::Skipped { index } => {
                    next_index = index + 1;
                    observer(ScanEvent::Frame {
                        index,
                        prediction: None,
                    });
                }
                SampledFrame::Sampled { index, frame } => {
                    next_index = index + 1;
                    let prediction = classifier.predict(&frame)?;
                    tracing::debug!(
                        "frame {}: confidence={:.4} label={}",
                        index,
                        prediction.confidence,
                        prediction.label
                    );
                    labels.push(prediction.label);
                    max_confidence = Some(
                        max_confidence.map_or(prediction.confidence, |m| m.max(prediction.confidence)),
                    );
                    observer(ScanEvent::Frame {
                        index,
                        prediction: Some(prediction),
                    });

                    if self.options.stop_on_first_positive && prediction.is_positive() {
                        tracing::debug!("positive frame {}, stopping early", index);
                        break;
                    }
                }
            }
        }

        let frames_decoded = frames.frames_decoded();
        // Release the decoder before reducing.
        drop(frames);

        let positive_frames = labels.iter().filter(|&&l| l == 1).count();
        let verdict = Verdict::from_labels(labels.iter().copied());

        let report = AnalysisReport {
            verdict,
            message: verdict.message(),
            frames_decoded,
            frames_classified: labels.len(),
            positive_frames,
            max_confidence,
            elapsed_ms: start.elapsed().as_millis(),
        };

        tracing::info!(
            "Analysis done: {} ({} decoded, {} classified, {} positive) in {}ms",
            report.message,
            report.frames_decoded,
            report.frames_classified,
            report.positive_frames,
            report.elapsed_ms
        );

        Ok(report)
    }
}

/// Init -> Opened -> Scanning -> Done, or -> Failed from Init/Scanning.
struct Scan {
    state: ScanState,
}

impl Scan {
    fn new() -> Self {
        Self {
            state: ScanState::Init,
        }
    }

    fn transition(&mut self, next: ScanState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal scan state transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!("scan state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
