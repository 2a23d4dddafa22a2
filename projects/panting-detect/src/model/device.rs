use candle_core::{utils, Device};
use clap::ValueEnum;

/// Compute backend for inference. Accelerators need the matching cargo
/// feature (`cuda`, `metal`); without it they fall back to CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ComputeDevice {
    /// CUDA if available, then Metal, then CPU.
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn resolve(self) -> Device {
        match self {
            ComputeDevice::Cpu => Device::Cpu,
            ComputeDevice::Cuda => cuda_or_cpu(),
            ComputeDevice::Metal => metal_or_cpu(),
            ComputeDevice::Auto => {
                if utils::cuda_is_available() {
                    cuda_or_cpu()
                } else if utils::metal_is_available() {
                    metal_or_cpu()
                } else {
                    Device::Cpu
                }
            }
        }
    }
}

fn cuda_or_cpu() -> Device {
    Device::new_cuda(0).unwrap_or_else(|e| {
        tracing::warn!("CUDA device unavailable ({}), falling back to CPU", e);
        Device::Cpu
    })
}

fn metal_or_cpu() -> Device {
    Device::new_metal(0).unwrap_or_else(|e| {
        tracing::warn!("Metal device unavailable ({}), falling back to CPU", e);
        Device::Cpu
    })
}
