use crate::error::AnalysisError;
use crate::model::mobilenet_v2::MobileNetV2;
use crate::model::{load_network, ModelSpec};
use crate::pipeline::types::Prediction;
use candle_core::{DType, Device, Module, Tensor};
use image::{imageops::FilterType, ImageBuffer, Rgb, RgbImage};
use opencv::core::Mat;
use opencv::prelude::*;
use std::sync::Arc;

/// Square input size the network was trained on.
pub const IMG_SIZE: u32 = 224;

/// Turns one decoded frame into a prediction. Implementations hold no
/// per-frame state, so frames are classified independently.
pub trait FrameClassifier: Send + Sync {
    fn predict(&self, frame: &Mat) -> Result<Prediction, AnalysisError>;
}

/// Hands out a ready classifier for one analysis.
pub trait ClassifierSource: Send + Sync {
    fn load(&self) -> Result<Arc<dyn FrameClassifier>, AnalysisError>;
}

/// MobileNetV2 panting classifier.
pub struct PantingClassifier {
    model: MobileNetV2,
    device: Device,
}

impl PantingClassifier {
    pub fn load(spec: &ModelSpec) -> Result<Self, AnalysisError> {
        let device = spec.device.resolve();
        tracing::info!(
            "Loading panting model from {} on {:?}",
            spec.weights_path.display(),
            device
        );
        let model = load_network(&spec.weights_path, &device)?;
        Ok(Self { model, device })
    }

    /// BGR frame -> normalized NCHW tensor of shape (1, 3, 224, 224).
    fn preprocess(&self, frame: &Mat) -> Result<Tensor, AnalysisError> {
        let rgb = mat_to_rgb_image(frame)?;
        let resized = image::imageops::resize(&rgb, IMG_SIZE, IMG_SIZE, FilterType::Triangle);

        let size = IMG_SIZE as usize;
        let tensor = Tensor::from_vec(resized.into_raw(), (size, size, 3), &self.device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .affine(1.0 / 255.0, 0.0)?
            .unsqueeze(0)?;
        Ok(tensor)
    }
}

impl FrameClassifier for PantingClassifier {
    fn predict(&self, frame: &Mat) -> Result<Prediction, AnalysisError> {
        let input = self.preprocess(frame)?;
        let logits = self.model.forward(&input)?;
        let confidence = candle_nn::ops::sigmoid(&logits)?
            .flatten_all()?
            .to_vec1::<f32>()?
            .first()
            .copied()
            .ok_or_else(|| AnalysisError::Inference("model produced no output".to_string()))?;
        Ok(Prediction::from_confidence(confidence))
    }
}

/// Convert an OpenCV Mat (BGR) to an RGB image buffer.
fn mat_to_rgb_image(mat: &Mat) -> Result<RgbImage, AnalysisError> {
    if mat.empty() || mat.rows() <= 0 || mat.cols() <= 0 {
        return Err(AnalysisError::Inference(format!(
            "degenerate frame {}x{}",
            mat.cols(),
            mat.rows()
        )));
    }
    if mat.channels() != 3 {
        return Err(AnalysisError::Inference(format!(
            "expected 3-channel frame, got {}",
            mat.channels()
        )));
    }

    let mut rgb_mat = Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let width = rgb_mat.cols() as u32;
    let height = rgb_mat.rows() as u32;

    if !rgb_mat.is_continuous() {
        return Err(AnalysisError::Inference("Mat is not continuous".to_string()));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    ImageBuffer::<Rgb<u8>, _>::from_vec(width, height, buffer).ok_or_else(|| {
        AnalysisError::Inference("Failed to create ImageBuffer from Mat data".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::write_random_weights;
    use crate::model::ComputeDevice;
    use opencv::core::{Scalar, Vec3b, CV_8UC3};

    fn cpu_spec(path: &std::path::Path) -> ModelSpec {
        ModelSpec {
            weights_path: path.to_path_buf(),
            device: ComputeDevice::Cpu,
        }
    }

    fn patterned_frame() -> Mat {
        let mut mat =
            Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(0.0)).unwrap();
        for y in 0..120 {
            for x in 0..160 {
                *mat.at_2d_mut::<Vec3b>(y, x).unwrap() =
                    Vec3b::from([(x % 256) as u8, (y * 2 % 256) as u8, ((x + y) % 256) as u8]);
            }
        }
        mat
    }

    #[test]
    fn test_bgr_is_swapped_to_rgb() {
        // pure blue in BGR
        let mat = Mat::new_rows_cols_with_default(4, 4, CV_8UC3, Scalar::new(255.0, 0.0, 0.0, 0.0))
            .unwrap();
        let rgb = mat_to_rgb_image(&mat).unwrap();
        assert_eq!(rgb.dimensions(), (4, 4));
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 255]);
    }

    #[test]
    fn test_degenerate_frame_is_inference_error() {
        let err = mat_to_rgb_image(&Mat::default()).err().unwrap();
        assert!(matches!(err, AnalysisError::Inference(_)));
    }

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        write_random_weights(&path);
        let classifier = PantingClassifier::load(&cpu_spec(&path)).unwrap();

        // BGR (0, 0, 255) is red
        let mat =
            Mat::new_rows_cols_with_default(300, 500, CV_8UC3, Scalar::new(0.0, 0.0, 255.0, 0.0))
                .unwrap();
        let tensor = classifier.preprocess(&mat).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);

        let channel_means: Vec<f32> = tensor
            .mean((2, 3))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!((channel_means[0] - 1.0).abs() < 1e-5);
        assert!(channel_means[1].abs() < 1e-5);
        assert!(channel_means[2].abs() < 1e-5);
    }

    #[test]
    fn test_prediction_is_deterministic_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        write_random_weights(&path);

        let frame = patterned_frame();
        let first = PantingClassifier::load(&cpu_spec(&path))
            .unwrap()
            .predict(&frame)
            .unwrap();
        let second = PantingClassifier::load(&cpu_spec(&path))
            .unwrap()
            .predict(&frame)
            .unwrap();

        assert_eq!(first, second);
        assert!((0.0..=1.0).contains(&first.confidence));
        assert_eq!(first.label, u8::from(first.confidence > 0.5));
    }

    #[test]
    fn test_empty_frame_fails_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        write_random_weights(&path);
        let classifier = PantingClassifier::load(&cpu_spec(&path)).unwrap();

        let err = classifier.predict(&Mat::default()).err().unwrap();
        assert!(matches!(err, AnalysisError::Inference(_)));
    }
}
