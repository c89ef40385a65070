// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Host engine for `LayerNormalizationGrad`.
//!
//! Works on an `N × M` row-major view (instances × features) and evaluates the
//! closed-form backward pass with broadcast array arithmetic:
//!
//! ```text
//! D = (X - mean) * inv_std_var
//! A = Y_grad * D
//! B = Y_grad * scale * inv_std_var
//! C = B * D
//!
//! X_grad     = B - mean_M(B) - D * mean_M(C)
//! scale_grad = sum_N(A)
//! bias_grad  = sum_N(Y_grad)
//! ```
//!
//! `mean_M(B)` and `mean_M(C)` are per-instance corrections coming from the
//! mean and variance reductions of the forward pass.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};
use tracing::debug;

use crate::element::{Element, Statistic};
use crate::error::{LayerNormGradError, Result};
use crate::op::{validate, LayerNormGradAttrs, LayerNormGradInputs, LayerNormGradOutputs};
use crate::shape::InstanceSplit;

/// Owned gradients produced by [`backward`].
#[derive(Clone, Debug)]
pub struct HostGradients<T> {
    /// `[N, M]`
    pub x_grad: Array2<T>,
    /// `[M]`
    pub scale_grad: Array1<T>,
    /// `[M]`
    pub bias_grad: Array1<T>,
}

/// Computes all three gradients and writes them into `outputs`.
///
/// Outputs are untouched when validation fails.
pub fn layer_norm_grad_cpu<T: Element, U: Statistic>(
    attrs: &LayerNormGradAttrs,
    inputs: &LayerNormGradInputs<'_, T, U>,
    outputs: &mut LayerNormGradOutputs<'_, T>,
) -> Result<()> {
    let split = validate(attrs, inputs, outputs)?;
    debug!(
        target: "st_lngrad::cpu",
        instances = split.instances,
        features = split.features,
        storage = %T::DTYPE,
        statistics = %U::DTYPE,
        "layer_norm_grad"
    );

    let grads = backward(split, inputs)?;

    matrix_mut("X_grad", outputs.x_grad.data_mut(), split)?.assign(&grads.x_grad);
    ArrayViewMut1::from(outputs.scale_grad.data_mut()).assign(&grads.scale_grad);
    ArrayViewMut1::from(outputs.bias_grad.data_mut()).assign(&grads.bias_grad);
    Ok(())
}

/// Evaluates the backward formulas for an already validated split.
pub fn backward<T: Element, U: Statistic>(
    split: InstanceSplit,
    inputs: &LayerNormGradInputs<'_, T, U>,
) -> Result<HostGradients<T>> {
    let dy = matrix("Y_grad", inputs.y_grad.data(), split)?;
    let x = matrix("X", inputs.x.data(), split)?;
    let scale = ArrayView1::from(inputs.scale.data());
    let mean = statistic_column::<T, U>(inputs.mean.data());
    let inv_std_var = statistic_column::<T, U>(inputs.inv_std_var.data());

    let d = (&x - &mean) * &inv_std_var;
    let a = &dy * &d;
    let b = &(&dy * &scale) * &inv_std_var;
    let c = &b * &d;

    let mean_b = feature_mean(&b, split.instances);
    let mean_c = feature_mean(&c, split.instances);

    let x_grad = (&b - &mean_b) - (&d * &mean_c);
    let scale_grad = a.sum_axis(Axis(0));
    let bias_grad = dy.sum_axis(Axis(0));

    Ok(HostGradients {
        x_grad,
        scale_grad,
        bias_grad,
    })
}

/// `[N, 1]` column of statistics promoted from `U` to `T`.
fn statistic_column<T: Element, U: Statistic>(values: &[U]) -> Array2<T> {
    Array1::from_iter(values.iter().map(|&value| value.convert::<T>())).insert_axis(Axis(1))
}

/// Mean over the feature axis as an `[N, 1]` column.
fn feature_mean<T: Element>(values: &Array2<T>, instances: usize) -> Array2<T> {
    values
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(instances))
        .insert_axis(Axis(1))
}

fn matrix<'a, E>(label: &'static str, data: &'a [E], split: InstanceSplit) -> Result<ArrayView2<'a, E>> {
    let len = data.len();
    ArrayView2::from_shape((split.instances, split.features), data)
        .map_err(|_| layout_error(label, split, len))
}

fn matrix_mut<'a, E>(
    label: &'static str,
    data: &'a mut [E],
    split: InstanceSplit,
) -> Result<ArrayViewMut2<'a, E>> {
    let len = data.len();
    ArrayViewMut2::from_shape((split.instances, split.features), data)
        .map_err(|_| layout_error(label, split, len))
}

fn layout_error(label: &'static str, split: InstanceSplit, len: usize) -> LayerNormGradError {
    LayerNormGradError::ShapeMismatch {
        label,
        expected: vec![split.instances, split.features],
        got: vec![len],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{TensorView, TensorViewMut};
    use approx::assert_abs_diff_eq;

    #[test]
    fn two_by_three_scenario() {
        let shape = [2usize, 3];
        let feat = [3usize];
        let stat = [2usize];
        let x = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let dy = [1.0f32; 6];
        let scale = [1.0f32; 3];
        let mean = [2.0f32, 5.0];
        let inv = [1.0f32, 1.0];

        let inputs = LayerNormGradInputs::new(
            TensorView::new(&dy, &shape).unwrap(),
            TensorView::new(&x, &shape).unwrap(),
            TensorView::new(&scale, &feat).unwrap(),
            TensorView::new(&mean, &stat).unwrap(),
            TensorView::new(&inv, &stat).unwrap(),
        );
        let mut dx = [f32::NAN; 6];
        let mut ds = [f32::NAN; 3];
        let mut db = [f32::NAN; 3];
        let mut outputs = LayerNormGradOutputs::new(
            TensorViewMut::new(&mut dx, &shape).unwrap(),
            TensorViewMut::new(&mut ds, &feat).unwrap(),
            TensorViewMut::new(&mut db, &feat).unwrap(),
        );
        layer_norm_grad_cpu(&LayerNormGradAttrs::new(-1), &inputs, &mut outputs).unwrap();

        assert_eq!(db, [2.0, 2.0, 2.0]);
        // D = [-1, 0, 1] for both rows, so scale_grad = 2 * D.
        assert_eq!(ds, [-2.0, 0.0, 2.0]);
        for row in dx.chunks(3) {
            assert_abs_diff_eq!(row.iter().sum::<f32>(), 0.0, epsilon = 1e-6);
        }
        // B = 1, mean_B = 1, mean_C = mean(D) = 0, so X_grad vanishes.
        for value in dx {
            assert_abs_diff_eq!(value, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn statistics_are_promoted_from_a_narrower_type() {
        let shape = [1usize, 2];
        let feat = [2usize];
        let one = [1usize];
        let x = [0.25f64, -0.75];
        let dy = [0.5f64, 2.0];
        let scale = [3.0f64, -1.0];
        let mean = [-0.25f32];
        let inv = [2.0f32];
        let inputs = LayerNormGradInputs::new(
            TensorView::new(&dy, &shape).unwrap(),
            TensorView::new(&x, &shape).unwrap(),
            TensorView::new(&scale, &feat).unwrap(),
            TensorView::new(&mean, &one).unwrap(),
            TensorView::new(&inv, &one).unwrap(),
        );
        let split = crate::shape::resolve(&shape, -1).unwrap();
        let grads = backward(split, &inputs).unwrap();
        // D = [1, -1]; A = [0.5, -2]
        assert_eq!(grads.scale_grad.to_vec(), vec![0.5, -2.0]);
        assert_eq!(grads.bias_grad.to_vec(), vec![0.5, 2.0]);
        // B = [3, -4], C = [3, 4]; mean_B = -0.5, mean_C = 3.5
        // X_grad = [3 + 0.5 - 3.5, -4 + 0.5 + 3.5] = [0, 0]
        assert_eq!(grads.x_grad.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0]);
    }

    #[test]
    fn degenerate_split_leaves_outputs_untouched() {
        let shape = [3usize, 1];
        let feat = [1usize];
        let stat = [3usize];
        let data = [1.0f32; 3];
        let inputs = LayerNormGradInputs::new(
            TensorView::new(&data, &shape).unwrap(),
            TensorView::new(&data, &shape).unwrap(),
            TensorView::new(&data[..1], &feat).unwrap(),
            TensorView::new(&data, &stat).unwrap(),
            TensorView::new(&data, &stat).unwrap(),
        );
        let mut dx = [9.0f32; 3];
        let mut ds = [9.0f32; 1];
        let mut db = [9.0f32; 1];
        let mut outputs = LayerNormGradOutputs::new(
            TensorViewMut::new(&mut dx, &shape).unwrap(),
            TensorViewMut::new(&mut ds, &feat).unwrap(),
            TensorViewMut::new(&mut db, &feat).unwrap(),
        );
        let err = layer_norm_grad_cpu(&LayerNormGradAttrs::new(1), &inputs, &mut outputs).unwrap_err();
        assert!(matches!(err, LayerNormGradError::DegenerateFeatures { .. }));
        assert_eq!(dx, [9.0; 3]);
        assert_eq!(ds, [9.0]);
        assert_eq!(db, [9.0]);
    }

    #[test]
    fn empty_batch_yields_zero_parameter_gradients() {
        let shape = [0usize, 4];
        let feat = [4usize];
        let stat = [0usize];
        let empty: [f32; 0] = [];
        let scale = [1.0f32; 4];
        let inputs = LayerNormGradInputs::new(
            TensorView::new(&empty, &shape).unwrap(),
            TensorView::new(&empty, &shape).unwrap(),
            TensorView::new(&scale, &feat).unwrap(),
            TensorView::new(&empty, &stat).unwrap(),
            TensorView::new(&empty, &stat).unwrap(),
        );
        let mut dx: [f32; 0] = [];
        let mut ds = [5.0f32; 4];
        let mut db = [5.0f32; 4];
        let mut outputs = LayerNormGradOutputs::new(
            TensorViewMut::new(&mut dx, &shape).unwrap(),
            TensorViewMut::new(&mut ds, &feat).unwrap(),
            TensorViewMut::new(&mut db, &feat).unwrap(),
        );
        layer_norm_grad_cpu(&LayerNormGradAttrs::new(1), &inputs, &mut outputs).unwrap();
        assert_eq!(ds, [0.0; 4]);
        assert_eq!(db, [0.0; 4]);
    }
}
