//! Compute device selection.

use anyhow::Result;
use candle_core::Device;
use tracing::info;

/// Metal or CUDA when compiled in and available, otherwise CPU.
pub fn select_device() -> Result<Device> {
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device");
            return Ok(device);
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device");
            return Ok(device);
        }
    }

    info!("Using CPU device");
    Ok(Device::Cpu)
}
