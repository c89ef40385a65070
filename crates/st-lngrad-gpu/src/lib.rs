// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Parallel `LayerNormalizationGrad`.
//!
//! The input gradient is a per-instance pass; `scale_grad` and `bias_grad`
//! are reduced over instances in two phases: `P` buckets each sum a strided
//! subset of instances into a `P × M` scratch buffer, then a collapse pass
//! folds the `P` partials of every feature in bucket order.
//!
//! With the `cuda` feature the kernels are compiled through NVRTC and run
//! on device 0. The `software` executor runs the same plan on the host with
//! rayon and is always available.

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod element;
pub mod engine;
pub mod plan;
pub mod software;

pub use element::{DeviceElement, DeviceStatistic};
pub use engine::{layer_norm_grad_gpu, Backend};
pub use plan::{LaunchDims, PartialPlan};
