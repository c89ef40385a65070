// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

/// Result alias used by both gradient engines.
pub type Result<T> = std::result::Result<T, LayerNormGradError>;

/// Errors emitted while validating or executing `LayerNormalizationGrad`.
///
/// Configuration variants are raised before any output is touched. Resource
/// and backend variants are fatal for the invocation and are never retried.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum LayerNormGradError {
    /// A required operator attribute was not present in the attribute bag.
    #[error("missing required attribute `{name}`")]
    MissingAttribute { name: &'static str },
    /// An attribute was present but could not be decoded.
    #[error("invalid attribute `{name}`: {message}")]
    InvalidAttribute { name: &'static str, message: String },
    /// The axis does not address a dimension of the input.
    #[error("axis {axis} is out of range for a tensor of rank {rank}")]
    InvalidAxis { axis: i64, rank: usize },
    /// Normalizing over a single scalar leaves degenerate statistics.
    #[error("normalized extent M must not be 1 (shape {shape:?}, axis {axis})")]
    DegenerateFeatures { shape: Vec<usize>, axis: usize },
    /// The element count of a shape does not fit in `usize`.
    #[error("element count of shape {shape:?} overflows usize")]
    ShapeOverflow { shape: Vec<usize> },
    /// Two tensors that must agree in shape do not.
    #[error("{label} has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        label: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A buffer length disagrees with the shape describing it.
    #[error("{label} holds {got} elements, expected {expected}")]
    DataLength {
        label: &'static str,
        expected: usize,
        got: usize,
    },
    /// A tuning value is outside the range the kernels accept.
    #[error("invalid configuration `{label}`: {message}")]
    InvalidConfig { label: &'static str, message: String },
    /// Scratch or device memory could not be obtained.
    #[error("failed to allocate {bytes} bytes for {what}: {message}")]
    Allocation {
        what: &'static str,
        bytes: usize,
        message: String,
    },
    /// A backend was explicitly requested but cannot be used in this process.
    #[error("backend `{backend}` is unavailable: {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },
    /// Execution failed on an accelerator backend.
    #[error("backend `{backend}` failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
}

impl LayerNormGradError {
    /// Returns true for errors detected before any computation started.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingAttribute { .. }
                | Self::InvalidAttribute { .. }
                | Self::InvalidAxis { .. }
                | Self::DegenerateFeatures { .. }
                | Self::ShapeOverflow { .. }
                | Self::ShapeMismatch { .. }
                | Self::DataLength { .. }
                | Self::InvalidConfig { .. }
        )
    }

    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_classified() {
        let err = LayerNormGradError::DegenerateFeatures {
            shape: vec![4, 1],
            axis: 1,
        };
        assert!(err.is_configuration());
        assert!(err.to_string().contains("must not be 1"));

        let alloc = LayerNormGradError::Allocation {
            what: "scale partials",
            bytes: 64,
            message: "out of memory".into(),
        };
        assert!(!alloc.is_configuration());
        assert!(!LayerNormGradError::backend("cuda", "launch failed").is_configuration());
    }
}
