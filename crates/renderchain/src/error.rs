use std::fmt;
use std::path::PathBuf;

use crate::types::Axis;

/// Failures reported by a [`crate::GpuDevice`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device lost")]
    Lost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("failed to compile {label}: {message}")]
    Compile { label: String, message: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced by [`crate::RenderChain`].
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("a render chain needs at least one pass")]
    NoPasses,
    #[error("{count} passes requested; at most {max} are supported")]
    TooManyPasses { count: usize, max: usize },
    #[error("{count} lookup textures requested; at most {max} are supported")]
    TooManyLuts { count: usize, max: usize },
    #[error("input scale must be at least 1")]
    InvalidInputScale,
    #[error("pass {pass}: invalid {axis} scale: {reason}")]
    InvalidScale {
        pass: usize,
        axis: Axis,
        reason: String,
    },
    #[error("pass {pass}: failed to read shader {}: {source}", path.display())]
    ShaderSource {
        pass: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pass {pass}: {source}")]
    Pass {
        pass: usize,
        #[source]
        source: DeviceError,
    },
    #[error("pass {pass}: alias '{alias}' {reason}")]
    InvalidAlias {
        pass: usize,
        alias: String,
        reason: String,
    },
    #[error("duplicate lookup texture name '{0}'")]
    DuplicateLut(String),
    #[error("lookup texture '{name}' ({}): {source}", path.display())]
    Lut {
        name: String,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("device lost")]
    DeviceLost,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error(transparent)]
    Device(DeviceError),
}

impl ChainError {
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            ChainError::DeviceLost
                | ChainError::Device(DeviceError::Lost)
                | ChainError::Pass {
                    source: DeviceError::Lost,
                    ..
                }
        )
    }
}

impl From<DeviceError> for ChainError {
    fn from(value: DeviceError) -> Self {
        match value {
            DeviceError::Lost => ChainError::DeviceLost,
            other => ChainError::Device(other),
        }
    }
}

/// A shader declared an input the chain cannot supply. Logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingMismatch {
    pub pass: usize,
    pub name: String,
    pub reason: String,
}

impl fmt::Display for BindingMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass {}: input '{}' {}", self.pass, self.name, self.reason)
    }
}

/// Failed chain construction. Hands the device back so the caller can retry.
pub struct ConstructError<D> {
    pub error: ChainError,
    pub device: D,
}

impl<D> ConstructError<D> {
    pub fn into_parts(self) -> (ChainError, D) {
        (self.error, self.device)
    }
}

impl<D> fmt::Debug for ConstructError<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<D> fmt::Display for ConstructError<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to construct render chain: {}", self.error)
    }
}

impl<D> std::error::Error for ConstructError<D> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
