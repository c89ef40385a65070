// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Launch geometry for the three kernels of the parallel engine.
//!
//! * input gradient: one block per instance, `block_threads` lanes striding
//!   over the features, tree-reduced in shared memory.
//! * partition (phase 1): grid `(feature_tiles, P)`; bucket `p` owns
//!   instances `p, p + P, p + 2P, ...` and writes row `p` of each `P × M`
//!   scratch buffer.
//! * collapse (phase 2): grid `(feature_tiles, 1)`; each lane scans the `P`
//!   partials of one feature in bucket order.

use std::iter::StepBy;
use std::ops::Range;

use st_lngrad::{InstanceSplit, LayerNormGradError, ParallelConfig, Result, Statistic};

/// Grid, block and dynamic shared memory for one launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
    pub shared_bytes: u32,
}

/// CUDA bound on `gridDim.x`.
const MAX_GRID_X: u64 = i32::MAX as u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartialPlan {
    split: InstanceSplit,
    parts: u32,
    block_threads: u32,
}

impl PartialPlan {
    pub fn new(split: InstanceSplit, config: &ParallelConfig) -> Result<Self> {
        config.validate()?;
        let plan = Self {
            split,
            parts: config.partial_buckets,
            block_threads: config.block_threads,
        };
        plan.partial_len()?;
        Ok(plan)
    }

    pub fn split(&self) -> InstanceSplit {
        self.split
    }

    pub fn instances(&self) -> usize {
        self.split.instances
    }

    pub fn features(&self) -> usize {
        self.split.features
    }

    /// Number of partial-sum buckets (P).
    pub fn parts(&self) -> usize {
        self.parts as usize
    }

    pub fn block_threads(&self) -> usize {
        self.block_threads as usize
    }

    /// Length of each `P × M` scratch buffer.
    pub fn partial_len(&self) -> Result<usize> {
        self.parts()
            .checked_mul(self.features())
            .ok_or_else(|| LayerNormGradError::InvalidConfig {
                label: "partial_buckets",
                message: format!(
                    "{} buckets × {} features overflows usize",
                    self.parts,
                    self.features()
                ),
            })
    }

    /// Instances accumulated by bucket `part`.
    pub fn instances_for(&self, part: usize) -> StepBy<Range<usize>> {
        (part..self.instances()).step_by(self.parts())
    }

    /// Blocks needed to cover the feature axis.
    pub fn feature_tiles(&self) -> usize {
        self.features().div_ceil(self.block_threads())
    }

    /// Dims for the input-gradient pass; two `U` lanes of shared memory per thread.
    pub fn input_dims<U: Statistic>(&self) -> Result<LaunchDims> {
        let shared = 2 * self.block_threads() * U::DTYPE.size_in_bytes();
        Ok(LaunchDims {
            grid: (grid_x("instances", self.instances())?, 1, 1),
            block: (self.block_threads, 1, 1),
            shared_bytes: shared as u32,
        })
    }

    pub fn partial_dims(&self) -> Result<LaunchDims> {
        Ok(LaunchDims {
            grid: (grid_x("features", self.feature_tiles())?, self.parts, 1),
            block: (self.block_threads, 1, 1),
            shared_bytes: 0,
        })
    }

    pub fn collapse_dims(&self) -> Result<LaunchDims> {
        Ok(LaunchDims {
            grid: (grid_x("features", self.feature_tiles())?, 1, 1),
            block: (self.block_threads, 1, 1),
            shared_bytes: 0,
        })
    }
}

fn grid_x(label: &'static str, blocks: usize) -> Result<u32> {
    if blocks as u64 > MAX_GRID_X {
        return Err(LayerNormGradError::InvalidConfig {
            label,
            message: format!("{blocks} blocks exceed the grid limit of {MAX_GRID_X}"),
        });
    }
    Ok(blocks as u32)
}
