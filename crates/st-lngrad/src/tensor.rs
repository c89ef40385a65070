// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Borrowed tensor views. The engines never own tensor memory; callers hand
//! in storage plus a shape descriptor and keep ownership.

use crate::error::{LayerNormGradError, Result};
use crate::shape::extent;

/// Read-only view over caller-owned, row-major storage.
#[derive(Clone, Copy, Debug)]
pub struct TensorView<'a, E> {
    data: &'a [E],
    shape: &'a [usize],
}

impl<'a, E> TensorView<'a, E> {
    pub fn new(data: &'a [E], shape: &'a [usize]) -> Result<Self> {
        check_len("tensor view", data.len(), shape)?;
        Ok(Self { data, shape })
    }

    pub fn data(&self) -> &'a [E] {
        self.data
    }

    pub fn shape(&self) -> &'a [usize] {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Writable view over caller-owned, row-major storage.
#[derive(Debug)]
pub struct TensorViewMut<'a, E> {
    data: &'a mut [E],
    shape: &'a [usize],
}

impl<'a, E> TensorViewMut<'a, E> {
    pub fn new(data: &'a mut [E], shape: &'a [usize]) -> Result<Self> {
        check_len("tensor view", data.len(), shape)?;
        Ok(Self { data, shape })
    }

    pub fn data(&self) -> &[E] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [E] {
        &mut *self.data
    }

    pub fn shape(&self) -> &'a [usize] {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn check_len(label: &'static str, got: usize, shape: &[usize]) -> Result<()> {
    let expected = extent(shape, shape)?;
    if expected != got {
        return Err(LayerNormGradError::DataLength {
            label,
            expected,
            got,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_checks_length_against_shape() {
        let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = TensorView::new(&data, &[2, 3]).unwrap();
        assert_eq!(view.len(), 6);
        assert_eq!(view.shape(), &[2, 3]);

        let err = TensorView::new(&data, &[4, 2]).unwrap_err();
        assert_eq!(
            err,
            LayerNormGradError::DataLength {
                label: "tensor view",
                expected: 8,
                got: 6
            }
        );
    }

    #[test]
    fn mutable_view_writes_through() {
        let mut data = vec![0.0f64; 4];
        {
            let mut view = TensorViewMut::new(&mut data, &[4]).unwrap();
            view.data_mut()[2] = 7.0;
        }
        assert_eq!(data[2], 7.0);
    }
}
