pub mod device;
pub mod mobilenet_v2;
pub mod store;

use crate::error::AnalysisError;
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use mobilenet_v2::MobileNetV2;
use std::path::{Path, PathBuf};

pub use device::ComputeDevice;
pub use store::{ModelPolicy, ModelStore};

pub const DEFAULT_MODEL_PATH: &str = "models/panting_frame_model.pth";

/// Where the weights live and where inference runs.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub weights_path: PathBuf,
    pub device: ComputeDevice,
}

/// Load the panting network from a PyTorch state dict (`.pth`/`.pt`/`.bin`)
/// or a `.safetensors` file. Weights must match the architecture exactly.
pub fn load_network(path: &Path, device: &Device) -> Result<MobileNetV2, AnalysisError> {
    let load_err = |reason: String| AnalysisError::ModelLoad {
        path: path.to_path_buf(),
        reason,
    };

    if !path.is_file() {
        return Err(load_err("weights file not found".to_string()));
    }

    let is_safetensors = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("safetensors"))
        .unwrap_or(false);

    let stored = stored_tensor_names(path, is_safetensors).map_err(|e| load_err(e.to_string()))?;
    let expected = mobilenet_v2::parameter_names(1).map_err(|e| load_err(e.to_string()))?;
    let mut unexpected: Vec<&str> = stored
        .iter()
        .map(String::as_str)
        .filter(|name| !expected.contains(*name) && !name.ends_with(".num_batches_tracked"))
        .collect();
    if !unexpected.is_empty() {
        unexpected.sort_unstable();
        return Err(load_err(format!(
            "unexpected keys in state dict: {}",
            unexpected.join(", ")
        )));
    }

    let vb = if is_safetensors {
        // SAFETY: the weights file is treated as read-only for the lifetime of the mmap.
        unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device) }
    } else {
        VarBuilder::from_pth(path, DType::F32, device)
    };
    let vb = vb.map_err(|e| load_err(e.to_string()))?;

    MobileNetV2::new(vb, 1).map_err(|e| load_err(e.to_string()))
}

/// Names of every tensor stored in the weights file.
fn stored_tensor_names(path: &Path, is_safetensors: bool) -> candle_core::Result<Vec<String>> {
    if is_safetensors {
        // SAFETY: the weights file is treated as read-only for the lifetime of the mmap.
        let tensors = unsafe { candle_core::safetensors::MmapedSafetensors::new(path)? };
        Ok(tensors.tensors().into_iter().map(|(name, _)| name).collect())
    } else {
        let infos = candle_core::pickle::read_pth_tensor_info(path, false, None)?;
        Ok(infos.into_iter().map(|info| info.name).collect())
    }
}
