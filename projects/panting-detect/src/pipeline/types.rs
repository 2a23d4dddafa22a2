use serde::Serialize;
use std::fmt;

/// Cutoff turning a confidence into a label. Fixed, not data-dependent.
pub const PANTING_THRESHOLD: f32 = 0.5;

/// Returned in place of a verdict when the video cannot be opened.
pub const OPEN_ERROR_SENTINEL: &str = "Error: Could not open video.";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub confidence: f32,
    pub label: u8,
}

impl Prediction {
    pub fn from_confidence(confidence: f32) -> Self {
        let label = if confidence > PANTING_THRESHOLD { 1 } else { 0 };
        Self { confidence, label }
    }

    pub fn is_positive(&self) -> bool {
        self.label == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Panting,
    NotPanting,
}

impl Verdict {
    /// OR over the labels. An empty sequence is not panting.
    pub fn from_labels<I: IntoIterator<Item = u8>>(labels: I) -> Self {
        if labels.into_iter().any(|l| l == 1) {
            Verdict::Panting
        } else {
            Verdict::NotPanting
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Verdict::Panting => "The dog is panting.",
            Verdict::NotPanting => "The dog is not panting.",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Init,
    Opened,
    Scanning,
    Done,
    Failed,
}

impl ScanState {
    /// Init -> Opened -> Scanning -> Done, with Failed reachable from any
    /// non-terminal state.
    pub fn can_advance_to(self, next: ScanState) -> bool {
        use ScanState::*;
        matches!(
            (self, next),
            (Init, Opened) | (Opened, Scanning) | (Scanning, Done) | (Init | Opened | Scanning, Failed)
        )
    }
}

/// Outcome of one analysis.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub verdict: Verdict,
    pub message: &'static str,
    pub frames_decoded: usize,
    pub frames_classified: usize,
    pub positive_frames: usize,
    pub max_confidence: Option<f32>,
    pub elapsed_ms: u128,
}
