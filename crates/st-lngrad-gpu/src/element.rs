// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Host/device representation of kernel element types. `f16` crosses the
//! boundary as its raw `u16` bits so the kernels need no half-precision
//! headers.

use half::f16;
use st_lngrad::{Element, Statistic};

pub trait DeviceElement: Element {
    #[cfg(feature = "cuda")]
    type Repr: cudarc::driver::DeviceRepr
        + cudarc::driver::ValidAsZeroBits
        + Copy
        + Default
        + Unpin
        + Send
        + Sync
        + 'static;
    #[cfg(not(feature = "cuda"))]
    type Repr: Copy + Default + Send + Sync + 'static;

    fn to_repr(self) -> Self::Repr;
    fn from_repr(repr: Self::Repr) -> Self;
}

/// Statistics/accumulator types the kernels are instantiated for.
pub trait DeviceStatistic: DeviceElement + Statistic {}

impl DeviceElement for f32 {
    type Repr = f32;

    #[inline]
    fn to_repr(self) -> f32 {
        self
    }

    #[inline]
    fn from_repr(repr: f32) -> Self {
        repr
    }
}

impl DeviceElement for f64 {
    type Repr = f64;

    #[inline]
    fn to_repr(self) -> f64 {
        self
    }

    #[inline]
    fn from_repr(repr: f64) -> Self {
        repr
    }
}

impl DeviceElement for f16 {
    type Repr = u16;

    #[inline]
    fn to_repr(self) -> u16 {
        self.to_bits()
    }

    #[inline]
    fn from_repr(repr: u16) -> Self {
        f16::from_bits(repr)
    }
}

impl DeviceStatistic for f32 {}
impl DeviceStatistic for f64 {}
