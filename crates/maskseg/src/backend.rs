//! Backend selection from feature flags.

use burn::backend::Autodiff;
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        use burn::backend::cuda::{Cuda, CudaDevice};

        /// Selected backend type
        pub type SelectedBackend = Cuda;
        /// Selected device type
        pub type SelectedDevice = CudaDevice;

        /// Creates the appropriate device for the selected backend
        pub fn create_device() -> SelectedDevice {
            CudaDevice::default()
        }

        /// Gets the backend name for logging purposes
        pub const fn get_backend_name() -> &'static str {
            "CUDA (NVIDIA GPU)"
        }
    } else if #[cfg(feature = "wgpu")] {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        pub type SelectedBackend = Wgpu;
        pub type SelectedDevice = WgpuDevice;

        pub fn create_device() -> SelectedDevice {
            WgpuDevice::default()
        }

        pub const fn get_backend_name() -> &'static str {
            "WGPU (GPU)"
        }
    } else {
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        pub type SelectedBackend = NdArray;
        pub type SelectedDevice = NdArrayDevice;

        pub fn create_device() -> SelectedDevice {
            NdArrayDevice::default()
        }

        pub const fn get_backend_name() -> &'static str {
            "NdArray (CPU)"
        }
    }
}

/// Backend used for training.
pub type TrainingBackend = Autodiff<SelectedBackend>;
