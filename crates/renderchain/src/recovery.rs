use tracing::warn;

use crate::device::GpuDevice;
use crate::error::DeviceError;

/// Lifecycle of a chain with respect to its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainState {
    /// Resources are valid and frames render normally.
    #[default]
    Active,
    /// The device reported loss; the next frame attempts recovery.
    Lost,
    /// Resources are being torn down and rebuilt.
    Rebuilding,
}

/// Which path brought the device back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePath {
    Reset,
    Recreated,
}

/// Tries a lightweight reset, falling back to recreating the device.
pub(crate) fn restore_device<D: GpuDevice>(device: &mut D) -> Result<RestorePath, DeviceError> {
    match device.reset() {
        Ok(()) => Ok(RestorePath::Reset),
        Err(error) => {
            warn!(error = %error, "device reset failed; recreating device");
            device.recreate()?;
            Ok(RestorePath::Recreated)
        }
    }
}
