// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Host executor that mirrors the CUDA kernels launch-for-launch. Rayon tasks
//! stand in for blocks: each bucket task owns one row of the scratch buffers,
//! and the collapse only starts once every bucket has joined. Reductions use
//! the same lane/tree order as the device code, so the mirror doubles as the
//! reference the device results are checked against.

use rayon::prelude::*;
use tracing::trace;

use st_lngrad::{
    Element, LayerNormGradError, LayerNormGradInputs, LayerNormGradOutputs, Result, Statistic,
};

use crate::plan::PartialPlan;

/// Per-feature partial sums produced by phase 1, each laid out `P × M`.
#[derive(Clone, Debug, PartialEq)]
pub struct Partials<U> {
    pub scale: Vec<U>,
    pub bias: Vec<U>,
}

/// Runs all three kernels. Scratch is reserved before anything is written,
/// so an allocation failure leaves `outputs` untouched.
pub fn run<T: Element, U: Statistic>(
    plan: &PartialPlan,
    inputs: &LayerNormGradInputs<'_, T, U>,
    outputs: &mut LayerNormGradOutputs<'_, T>,
) -> Result<()> {
    if plan.features() == 0 {
        return Ok(());
    }
    let mut partials = Partials {
        scale: scratch::<U>("scale_grad partials", plan.partial_len()?)?,
        bias: scratch::<U>("bias_grad partials", plan.partial_len()?)?,
    };

    partition(plan, inputs, &mut partials);
    input_gradient(plan, inputs, outputs.x_grad.data_mut());
    collapse(
        plan,
        &partials,
        outputs.scale_grad.data_mut(),
        outputs.bias_grad.data_mut(),
    );
    Ok(())
}

/// Zero-filled scratch buffer, reserved fallibly.
pub fn scratch<U: Statistic>(what: &'static str, len: usize) -> Result<Vec<U>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|err| LayerNormGradError::Allocation {
            what,
            bytes: len.saturating_mul(U::DTYPE.size_in_bytes()),
            message: err.to_string(),
        })?;
    buffer.resize(len, U::from_wide(0.0));
    Ok(buffer)
}

/// Phase 1: bucket `p` accumulates `A = Y_grad * D` and `Y_grad` over its
/// instances into row `p` of the scratch buffers.
pub fn partition<T: Element, U: Statistic>(
    plan: &PartialPlan,
    inputs: &LayerNormGradInputs<'_, T, U>,
    partials: &mut Partials<U>,
) {
    let features = plan.features();
    let dy = inputs.y_grad.data();
    let x = inputs.x.data();
    let mean = inputs.mean.data();
    let inv_std_var = inputs.inv_std_var.data();

    partials
        .scale
        .par_chunks_mut(features)
        .zip(partials.bias.par_chunks_mut(features))
        .enumerate()
        .for_each(|(part, (scale_row, bias_row))| {
            let zero = U::from_wide(0.0);
            scale_row.fill(zero);
            bias_row.fill(zero);
            for n in plan.instances_for(part) {
                let row = n * features..(n + 1) * features;
                let (mu, inv) = (mean[n], inv_std_var[n]);
                for (m, (&g, &xv)) in dy[row.clone()].iter().zip(&x[row]).enumerate() {
                    let g: U = g.convert();
                    let d = (xv.convert::<U>() - mu) * inv;
                    scale_row[m] = scale_row[m] + g * d;
                    bias_row[m] = bias_row[m] + g;
                }
            }
            trace!(target: "st_lngrad::software", part, "bucket committed");
        });
}

/// Phase 2: per feature, sums the `P` partials in bucket order.
pub fn collapse<T: Element, U: Statistic>(
    plan: &PartialPlan,
    partials: &Partials<U>,
    scale_grad: &mut [T],
    bias_grad: &mut [T],
) {
    let features = plan.features();
    scale_grad
        .par_iter_mut()
        .zip(bias_grad.par_iter_mut())
        .enumerate()
        .for_each(|(m, (scale_out, bias_out))| {
            let mut scale_acc = U::from_wide(0.0);
            let mut bias_acc = U::from_wide(0.0);
            for part in 0..plan.parts() {
                scale_acc = scale_acc + partials.scale[part * features + m];
                bias_acc = bias_acc + partials.bias[part * features + m];
            }
            *scale_out = scale_acc.convert();
            *bias_out = bias_acc.convert();
        });
}

/// Input-gradient pass: one task per instance. Lane `t` accumulates the
/// features `t, t + block, ...` and the lanes are folded pairwise, halving
/// the stride each round, exactly as the shared-memory reduction does.
pub fn input_gradient<T: Element, U: Statistic>(
    plan: &PartialPlan,
    inputs: &LayerNormGradInputs<'_, T, U>,
    x_grad: &mut [T],
) {
    let features = plan.features();
    let block = plan.block_threads();
    let dy = inputs.y_grad.data();
    let x = inputs.x.data();
    let scale = inputs.scale.data();
    let mean = inputs.mean.data();
    let inv_std_var = inputs.inv_std_var.data();
    let count = U::from_wide(features as f64);

    x_grad
        .par_chunks_mut(features)
        .enumerate()
        .for_each(|(n, out)| {
            let base = n * features;
            let (mu, inv) = (mean[n], inv_std_var[n]);
            let zero = U::from_wide(0.0);
            let mut sum_b = vec![zero; block];
            let mut sum_c = vec![zero; block];
            for m in 0..features {
                let lane = m % block;
                let d = (x[base + m].convert::<U>() - mu) * inv;
                let b = dy[base + m].convert::<U>() * scale[m].convert::<U>() * inv;
                sum_b[lane] = sum_b[lane] + b;
                sum_c[lane] = sum_c[lane] + b * d;
            }
            let mut stride = block / 2;
            while stride > 0 {
                for lane in 0..stride {
                    sum_b[lane] = sum_b[lane] + sum_b[lane + stride];
                    sum_c[lane] = sum_c[lane] + sum_c[lane + stride];
                }
                stride /= 2;
            }
            let mean_b = sum_b[0] / count;
            let mean_c = sum_c[0] / count;
            for (m, slot) in out.iter_mut().enumerate() {
                let d = (x[base + m].convert::<U>() - mu) * inv;
                let b = dy[base + m].convert::<U>() * scale[m].convert::<U>() * inv;
                *slot = (b - mean_b - d * mean_c).convert();
            }
        });
}
