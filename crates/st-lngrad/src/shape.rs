// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Axis resolution shared by the host and parallel engines so both always
//! agree on the instance/feature partition.

use crate::error::{LayerNormGradError, Result};

/// Partition of a tensor into `instances` (N) independent rows of
/// `features` (M) contiguous scalars.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstanceSplit {
    /// Normalized, non-negative axis.
    pub axis: usize,
    /// Product of the dimensions before `axis`.
    pub instances: usize,
    /// Product of the dimensions from `axis` to the end.
    pub features: usize,
}

impl InstanceSplit {
    pub fn elements(&self) -> usize {
        self.instances * self.features
    }
}

/// Maps a possibly negative axis into `[0, rank)`.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let rank_i = i64::try_from(rank).map_err(|_| LayerNormGradError::InvalidAxis { axis, rank })?;
    if rank == 0 || axis < -rank_i || axis >= rank_i {
        return Err(LayerNormGradError::InvalidAxis { axis, rank });
    }
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    Ok(resolved as usize)
}

/// Checked product of a run of dimensions.
pub fn extent(dims: &[usize], full_shape: &[usize]) -> Result<usize> {
    dims.iter().try_fold(1usize, |acc, &dim| {
        acc.checked_mul(dim)
            .ok_or_else(|| LayerNormGradError::ShapeOverflow {
                shape: full_shape.to_vec(),
            })
    })
}

/// Resolves `(N, M)` for `shape` split at `axis`.
pub fn resolve(shape: &[usize], axis: i64) -> Result<InstanceSplit> {
    let axis = normalize_axis(axis, shape.len())?;
    let instances = extent(&shape[..axis], shape)?;
    let features = extent(&shape[axis..], shape)?;
    // Total element count must also be addressable.
    instances
        .checked_mul(features)
        .ok_or_else(|| LayerNormGradError::ShapeOverflow {
            shape: shape.to_vec(),
        })?;
    if features == 1 {
        return Err(LayerNormGradError::DegenerateFeatures {
            shape: shape.to_vec(),
            axis,
        });
    }
    Ok(InstanceSplit {
        axis,
        instances,
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_axes_count_from_the_end() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert_eq!(normalize_axis(-3, 3).unwrap(), 0);
        assert_eq!(normalize_axis(1, 3).unwrap(), 1);
    }

    #[test]
    fn out_of_range_axes_are_rejected() {
        assert_eq!(
            normalize_axis(3, 3),
            Err(LayerNormGradError::InvalidAxis { axis: 3, rank: 3 })
        );
        assert!(normalize_axis(-4, 3).is_err());
        assert!(normalize_axis(0, 0).is_err());
    }

    #[test]
    fn split_multiplies_leading_and_trailing_dims() {
        let split = resolve(&[2, 3, 4, 5], 2).unwrap();
        assert_eq!(split.instances, 6);
        assert_eq!(split.features, 20);
        assert_eq!(split.elements(), 120);

        let split = resolve(&[2, 3, 4, 5], -1).unwrap();
        assert_eq!((split.axis, split.instances, split.features), (3, 24, 5));

        let whole = resolve(&[7, 3], 0).unwrap();
        assert_eq!((whole.instances, whole.features), (1, 21));
    }

    #[test]
    fn single_feature_is_degenerate() {
        let err = resolve(&[8, 1], -1).unwrap_err();
        assert!(matches!(err, LayerNormGradError::DegenerateFeatures { axis: 1, .. }));
        let err = resolve(&[8, 4, 1, 1], 2).unwrap_err();
        assert!(matches!(err, LayerNormGradError::DegenerateFeatures { .. }));
    }

    #[test]
    fn empty_instance_dimension_is_allowed() {
        let split = resolve(&[0, 4], 1).unwrap();
        assert_eq!((split.instances, split.features), (0, 4));
    }

    #[test]
    fn overflow_is_reported() {
        let err = resolve(&[usize::MAX, 2, 2], 1).unwrap_err();
        assert!(matches!(err, LayerNormGradError::ShapeOverflow { .. }));
    }
}
