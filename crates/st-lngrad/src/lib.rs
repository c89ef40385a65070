// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! `LayerNormalizationGrad` compute bodies.
//!
//! Given `Y_grad`, the forward input `X`, the per-feature `scale` and the
//! cached per-instance `mean`/`inv_std_var`, the engines produce `X_grad`,
//! `scale_grad` and `bias_grad`. This crate holds the pieces both execution
//! targets share (axis resolution, the tensor contract, element traits,
//! tuning) plus the host engine. The parallel engine lives in
//! `st-lngrad-gpu`.

pub mod config;
pub mod cpu;
pub mod element;
pub mod error;
pub mod op;
pub mod shape;
pub mod telemetry;
pub mod tensor;

pub use config::{config, BackendPreference, ParallelConfig};
pub use cpu::{layer_norm_grad_cpu, HostGradients};
pub use element::{DType, Element, Statistic};
pub use error::{LayerNormGradError, Result};
pub use op::{
    find_signature, validate, ExecutionTarget, KernelSignature, LayerNormGradAttrs,
    LayerNormGradInputs, LayerNormGradOutputs, CPU_SIGNATURES, GPU_SIGNATURES, OP_DOMAIN,
    OP_NAME, SINCE_VERSION,
};
pub use shape::{normalize_axis, resolve, InstanceSplit};
pub use telemetry::init_tracing;
pub use tensor::{TensorView, TensorViewMut};

pub use half::f16;
