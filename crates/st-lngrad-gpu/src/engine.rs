// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Entry point of the parallel engine and backend selection.

use std::fmt;
use std::sync::OnceLock;

use tracing::{debug, warn};

use st_lngrad::{
    validate, BackendPreference, LayerNormGradAttrs, LayerNormGradInputs, LayerNormGradOutputs,
    ParallelConfig, Result,
};

use crate::element::{DeviceElement, DeviceStatistic};
use crate::plan::PartialPlan;
use crate::software;

/// Executor a launch actually runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    Software,
    Cuda,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Software => "software",
            Backend::Cuda => "cuda",
        }
    }

    /// Resolves the configured preference against what this build and host
    /// can run. `Auto` degrades to the host mirror, an explicit `Cuda`
    /// request does not.
    pub fn select(config: &ParallelConfig) -> Result<Self> {
        match config.backend {
            BackendPreference::Software => Ok(Backend::Software),
            BackendPreference::Cuda => {
                cuda_probe()?;
                Ok(Backend::Cuda)
            }
            BackendPreference::Auto => Ok(*AUTO_BACKEND.get_or_init(resolve_auto)),
        }
    }
}

/// `Auto` is resolved once per process; the fallback warning fires once.
static AUTO_BACKEND: OnceLock<Backend> = OnceLock::new();

fn resolve_auto() -> Backend {
    match cuda_probe() {
        Ok(()) => Backend::Cuda,
        Err(err) => {
            warn!(
                target: "st_lngrad::engine",
                error = %err,
                "cuda unavailable, falling back to the software executor"
            );
            Backend::Software
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(feature = "cuda")]
fn cuda_probe() -> Result<()> {
    crate::cuda::probe()
}

#[cfg(not(feature = "cuda"))]
fn cuda_probe() -> Result<()> {
    Err(st_lngrad::LayerNormGradError::BackendUnavailable {
        backend: "cuda",
        message: "built without the `cuda` feature".to_string(),
    })
}

/// Parallel `LayerNormalizationGrad`: input gradient in one pass, parameter
/// gradients through `P` partial buckets and a collapse.
///
/// Outputs are untouched when validation, backend selection or allocation
/// fails. Pass [`st_lngrad::config()`] to pick up the `ST_LNGRAD_*`
/// environment overrides; an explicit `ParallelConfig` ignores them.
pub fn layer_norm_grad_gpu<T: DeviceElement, U: DeviceStatistic>(
    attrs: &LayerNormGradAttrs,
    inputs: &LayerNormGradInputs<'_, T, U>,
    outputs: &mut LayerNormGradOutputs<'_, T>,
    config: &ParallelConfig,
) -> Result<Backend> {
    let split = validate(attrs, inputs, outputs)?;
    let plan = PartialPlan::new(split, config)?;
    let backend = Backend::select(config)?;
    debug!(
        target: "st_lngrad::engine",
        instances = split.instances,
        features = split.features,
        storage = %T::DTYPE,
        statistics = %U::DTYPE,
        partial_buckets = plan.parts(),
        block_threads = plan.block_threads(),
        backend = backend.name(),
        "layer_norm_grad"
    );

    match backend {
        Backend::Software => software::run(&plan, inputs, outputs)?,
        #[cfg(feature = "cuda")]
        Backend::Cuda => crate::cuda::run(&plan, inputs, outputs)?,
        #[cfg(not(feature = "cuda"))]
        Backend::Cuda => {
            return Err(st_lngrad::LayerNormGradError::BackendUnavailable {
                backend: "cuda",
                message: "built without the `cuda` feature".to_string(),
            })
        }
    }
    Ok(backend)
}
