//! Backend selection
//!
//! Training and inference are generic over a Burn backend. The concrete backend
//! is picked at runtime: CUDA when the crate is built with the `cuda` feature and
//! an NVIDIA GPU is present, NdArray on the CPU otherwise.

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

/// CPU backend, always compiled in
pub type CpuBackend = NdArray<f32>;

/// Autodiff wrapper over the CPU backend, used by tests and CPU training
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

/// Where tensors live for a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "NdArray (CPU)"),
            ComputeDevice::Cuda(id) => write!(f, "CUDA (GPU:{})", id),
        }
    }
}

/// Pick the accelerator if one is usable, else the CPU
pub fn select_device() -> ComputeDevice {
    if cfg!(feature = "cuda") && has_nvidia_gpu() {
        ComputeDevice::Cuda(0)
    } else {
        ComputeDevice::Cpu
    }
}

fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
            || nvidia_smi_ok("nvidia-smi")
    }

    #[cfg(target_os = "windows")]
    {
        nvidia_smi_ok("nvidia-smi.exe")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        false
    }
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
fn nvidia_smi_ok(binary: &str) -> bool {
    std::process::Command::new(binary)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Work that must be monomorphized for whichever backend gets selected.
///
/// Closures cannot be generic over a type parameter, so callers package their
/// arguments in a struct and implement this trait instead.
pub trait BackendTask {
    type Output;

    fn run<B: AutodiffBackend>(self, device: B::Device, compute: ComputeDevice) -> Self::Output;
}

/// Run `task` on the backend chosen by [`select_device`]
pub fn dispatch<T: BackendTask>(task: T) -> T::Output {
    let compute = select_device();
    tracing::info!("Compute device: {}", compute);

    match compute {
        #[cfg(feature = "cuda")]
        ComputeDevice::Cuda(index) => task.run::<Autodiff<burn_cuda::Cuda>>(
            burn_cuda::CudaDevice::new(index),
            compute,
        ),
        _ => task.run::<CpuTrainingBackend>(NdArrayDevice::Cpu, ComputeDevice::Cpu),
    }
}
