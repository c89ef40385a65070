// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Invocation contract for `LayerNormalizationGrad`.
//!
//! Five positional inputs (`Y_grad`, `X`, `scale`, `mean`, `inv_std_var`),
//! three positional outputs (`X_grad`, `scale_grad`, `bias_grad`) and one
//! required integer attribute, `axis`. The signature tables below are plain
//! data for a hosting dispatcher; nothing here registers itself anywhere.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::element::{DType, Element, Statistic};
use crate::error::{LayerNormGradError, Result};
use crate::shape::{resolve, InstanceSplit};
use crate::tensor::{TensorView, TensorViewMut};

pub const OP_NAME: &str = "LayerNormalizationGrad";
/// Default ONNX domain.
pub const OP_DOMAIN: &str = "";
pub const SINCE_VERSION: u32 = 9;

/// Execution target tag a dispatcher routes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionTarget {
    Cpu,
    Cuda,
}

impl ExecutionTarget {
    pub fn provider(self) -> &'static str {
        match self {
            ExecutionTarget::Cpu => "CPUExecutionProvider",
            ExecutionTarget::Cuda => "CUDAExecutionProvider",
        }
    }
}

/// One `(T, U)` instantiation of the operator on a given target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelSignature {
    pub name: &'static str,
    pub domain: &'static str,
    pub since_version: u32,
    pub target: ExecutionTarget,
    pub storage: DType,
    pub statistics: DType,
}

impl KernelSignature {
    const fn new(target: ExecutionTarget, storage: DType, statistics: DType) -> Self {
        Self {
            name: OP_NAME,
            domain: OP_DOMAIN,
            since_version: SINCE_VERSION,
            target,
            storage,
            statistics,
        }
    }

    /// Type-constraint key, e.g. `float16_float`.
    pub fn type_key(&self) -> String {
        format!("{}_{}", self.storage.name(), self.statistics.name())
    }
}

pub const CPU_SIGNATURES: &[KernelSignature] = &[
    KernelSignature::new(ExecutionTarget::Cpu, DType::F32, DType::F32),
    KernelSignature::new(ExecutionTarget::Cpu, DType::F64, DType::F32),
    KernelSignature::new(ExecutionTarget::Cpu, DType::F64, DType::F64),
];

pub const GPU_SIGNATURES: &[KernelSignature] = &[
    KernelSignature::new(ExecutionTarget::Cuda, DType::F32, DType::F32),
    KernelSignature::new(ExecutionTarget::Cuda, DType::F64, DType::F32),
    KernelSignature::new(ExecutionTarget::Cuda, DType::F16, DType::F32),
    KernelSignature::new(ExecutionTarget::Cuda, DType::F32, DType::F64),
    KernelSignature::new(ExecutionTarget::Cuda, DType::F64, DType::F64),
    KernelSignature::new(ExecutionTarget::Cuda, DType::F16, DType::F64),
];

/// Looks up the signature serving `(storage, statistics)` on `target`.
pub fn find_signature(
    target: ExecutionTarget,
    storage: DType,
    statistics: DType,
) -> Option<&'static KernelSignature> {
    let table = match target {
        ExecutionTarget::Cpu => CPU_SIGNATURES,
        ExecutionTarget::Cuda => GPU_SIGNATURES,
    };
    table
        .iter()
        .find(|sig| sig.storage == storage && sig.statistics == statistics)
}

/// Operator attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerNormGradAttrs {
    /// First normalized dimension; negative values count from the end.
    pub axis: i64,
}

impl LayerNormGradAttrs {
    pub fn new(axis: i64) -> Self {
        Self { axis }
    }

    /// Decodes the attribute bag handed over by a dispatcher.
    pub fn from_value(value: &Value) -> Result<Self> {
        let bag = value
            .as_object()
            .ok_or_else(|| LayerNormGradError::InvalidAttribute {
                name: "axis",
                message: format!("attribute bag must be an object, found {value}"),
            })?;
        if !bag.contains_key("axis") {
            return Err(LayerNormGradError::MissingAttribute { name: "axis" });
        }
        serde_json::from_value(value.clone()).map_err(|err| {
            LayerNormGradError::InvalidAttribute {
                name: "axis",
                message: err.to_string(),
            }
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "axis": self.axis })
    }
}

/// The five positional inputs.
#[derive(Clone, Copy, Debug)]
pub struct LayerNormGradInputs<'a, T, U> {
    pub y_grad: TensorView<'a, T>,
    pub x: TensorView<'a, T>,
    pub scale: TensorView<'a, T>,
    pub mean: TensorView<'a, U>,
    pub inv_std_var: TensorView<'a, U>,
}

impl<'a, T, U> LayerNormGradInputs<'a, T, U> {
    pub fn new(
        y_grad: TensorView<'a, T>,
        x: TensorView<'a, T>,
        scale: TensorView<'a, T>,
        mean: TensorView<'a, U>,
        inv_std_var: TensorView<'a, U>,
    ) -> Self {
        Self {
            y_grad,
            x,
            scale,
            mean,
            inv_std_var,
        }
    }
}

/// The three positional outputs.
#[derive(Debug)]
pub struct LayerNormGradOutputs<'a, T> {
    pub x_grad: TensorViewMut<'a, T>,
    pub scale_grad: TensorViewMut<'a, T>,
    pub bias_grad: TensorViewMut<'a, T>,
}

impl<'a, T> LayerNormGradOutputs<'a, T> {
    pub fn new(
        x_grad: TensorViewMut<'a, T>,
        scale_grad: TensorViewMut<'a, T>,
        bias_grad: TensorViewMut<'a, T>,
    ) -> Self {
        Self {
            x_grad,
            scale_grad,
            bias_grad,
        }
    }
}

/// Checks every shape invariant and resolves `(N, M)`.
///
/// Both engines call this before touching any output.
pub fn validate<T: Element, U: Statistic>(
    attrs: &LayerNormGradAttrs,
    inputs: &LayerNormGradInputs<'_, T, U>,
    outputs: &LayerNormGradOutputs<'_, T>,
) -> Result<InstanceSplit> {
    let x_shape = inputs.x.shape();
    let split = resolve(x_shape, attrs.axis)?;

    expect_shape("Y_grad", x_shape, inputs.y_grad.shape())?;
    expect_len("scale", split.features, inputs.scale.len())?;
    expect_len("mean", split.instances, inputs.mean.len())?;
    expect_len("inv_std_var", split.instances, inputs.inv_std_var.len())?;

    let scale_shape = inputs.scale.shape();
    expect_shape("X_grad", x_shape, outputs.x_grad.shape())?;
    expect_shape("scale_grad", scale_shape, outputs.scale_grad.shape())?;
    expect_shape("bias_grad", scale_shape, outputs.bias_grad.shape())?;
    Ok(split)
}

fn expect_shape(label: &'static str, expected: &[usize], got: &[usize]) -> Result<()> {
    if expected != got {
        return Err(LayerNormGradError::ShapeMismatch {
            label,
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}

fn expect_len(label: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(LayerNormGradError::DataLength {
            label,
            expected,
            got,
        });
    }
    Ok(())
}
