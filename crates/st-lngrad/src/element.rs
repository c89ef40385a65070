// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Numeric capabilities shared by the storage type `T` and the statistics
//! type `U`.
//!
//! Every conversion between element types routes through `f64`. Widening
//! through `f64` is exact for all supported types and narrowing rounds once,
//! so `T -> U -> T` never double-rounds.

use half::f16;
use num_traits::{Float, FromPrimitive};
use std::fmt;

/// Element types understood by the gradient engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    F32,
    F64,
}

impl DType {
    /// ONNX-style type name used in kernel signatures.
    pub fn name(self) -> &'static str {
        match self {
            DType::F16 => "float16",
            DType::F32 => "float",
            DType::F64 => "double",
        }
    }

    /// Short suffix used to name kernel instantiations (`f32`, `f16`, ...).
    pub fn suffix(self) -> &'static str {
        match self {
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage precision capability: arithmetic plus lossless widening.
pub trait Element: Float + FromPrimitive + Default + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    /// Widens to `f64` without loss.
    fn to_wide(self) -> f64;

    /// Narrows from `f64` with a single round-to-nearest.
    fn from_wide(value: f64) -> Self;

    /// Converts into another element type.
    #[inline]
    fn convert<V: Element>(self) -> V {
        V::from_wide(self.to_wide())
    }
}

/// Precision used for cached statistics and reduction accumulators.
pub trait Statistic: Element {}

macro_rules! impl_native_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            #[inline]
            fn to_wide(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_wide(value: f64) -> Self {
                value as $ty
            }
        }
    };
}

impl_native_element!(f32, DType::F32);
impl_native_element!(f64, DType::F64);

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_wide(self) -> f64 {
        f16::to_f64(self)
    }

    #[inline]
    fn from_wide(value: f64) -> Self {
        f16::from_f64(value)
    }
}

impl Statistic for f32 {}
impl Statistic for f64 {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_is_exact_and_narrowing_rounds_once() {
        let x = 0.1f32;
        let wide: f64 = x.convert();
        assert_eq!(wide, x as f64);
        let back: f32 = wide.convert();
        assert_eq!(back, x);

        let h: f16 = 1.0009765625f64.convert();
        assert_eq!(h.to_wide(), 1.0009765625);
        let rounded: f16 = 1.0001f32.convert();
        assert_eq!(rounded, f16::ONE);
    }

    #[test]
    fn dtype_metadata() {
        assert_eq!(<f16 as Element>::DTYPE.size_in_bytes(), 2);
        assert_eq!(<f32 as Element>::DTYPE.name(), "float");
        assert_eq!(<f64 as Element>::DTYPE.suffix(), "f64");
        assert_eq!(DType::F16.to_string(), "float16");
    }

    #[test]
    fn non_finite_values_pass_through() {
        let nan: f32 = f64::NAN.convert();
        assert!(nan.is_nan());
        let inf: f16 = f64::INFINITY.convert();
        assert!(Float::is_infinite(inf));
    }
}
