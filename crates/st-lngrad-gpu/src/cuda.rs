// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::element::{DeviceElement, DeviceStatistic};
use crate::plan::{LaunchDims, PartialPlan};
use cudarc::driver::{CudaDevice, CudaFunction, CudaSlice, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::compile_ptx;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

use st_lngrad::{DType, LayerNormGradError, LayerNormGradInputs, LayerNormGradOutputs, Result};

const BACKEND: &str = "cuda";
const MODULE_NAME: &str = "spiraltorch_layer_norm_grad";
const CUDA_SOURCE: &str = include_str!("layer_norm_grad.cu");

/// The three entry points compiled for one `(T, U)` pair.
struct KernelSet {
    storage: DType,
    statistics: DType,
    input: &'static str,
    partial: &'static str,
    collapse: &'static str,
}

macro_rules! kernel_set {
    ($storage:ident, $statistics:ident, $suffix:literal) => {
        KernelSet {
            storage: DType::$storage,
            statistics: DType::$statistics,
            input: concat!("lngrad_input_", $suffix),
            partial: concat!("lngrad_partial_", $suffix),
            collapse: concat!("lngrad_collapse_", $suffix),
        }
    };
}

const KERNELS: &[KernelSet] = &[
    kernel_set!(F32, F32, "f32_f32"),
    kernel_set!(F64, F32, "f64_f32"),
    kernel_set!(F16, F32, "f16_f32"),
    kernel_set!(F32, F64, "f32_f64"),
    kernel_set!(F64, F64, "f64_f64"),
    kernel_set!(F16, F64, "f16_f64"),
];

/// Resolved entry points of one `KernelSet`.
#[derive(Clone)]
struct KernelFns {
    input: CudaFunction,
    partial: CudaFunction,
    collapse: CudaFunction,
}

/// Device 0 plus every instantiation, resolved once. Indexed like `KERNELS`.
struct LoadedModule {
    device: Arc<CudaDevice>,
    kernels: Vec<KernelFns>,
}

static DEVICE: OnceLock<Result<Arc<CudaDevice>>> = OnceLock::new();
static MODULE: OnceLock<Result<LoadedModule>> = OnceLock::new();

fn device() -> Result<Arc<CudaDevice>> {
    DEVICE
        .get_or_init(|| {
            CudaDevice::new(0).map_err(|err| LayerNormGradError::BackendUnavailable {
                backend: BACKEND,
                message: err.to_string(),
            })
        })
        .clone()
}

/// Opens device 0 without compiling anything.
pub fn probe() -> Result<()> {
    device().map(|_| ())
}

fn load_module() -> Result<LoadedModule> {
    let device = device()?;
    let ptx = compile_ptx(CUDA_SOURCE)
        .map_err(|err| LayerNormGradError::backend(BACKEND, format!("nvrtc: {err}")))?;
    let names: Vec<&'static str> = KERNELS
        .iter()
        .flat_map(|set| [set.input, set.partial, set.collapse])
        .collect();
    device
        .load_ptx(ptx, MODULE_NAME, &names)
        .map_err(|err| LayerNormGradError::backend(BACKEND, err.to_string()))?;

    let resolve = |name: &'static str| {
        device.get_func(MODULE_NAME, name).ok_or_else(|| {
            LayerNormGradError::backend(BACKEND, format!("`{name}` missing from `{MODULE_NAME}`"))
        })
    };
    let kernels = KERNELS
        .iter()
        .map(|set| -> Result<KernelFns> {
            Ok(KernelFns {
                input: resolve(set.input)?,
                partial: resolve(set.partial)?,
                collapse: resolve(set.collapse)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    debug!(target: "st_lngrad::cuda", kernels = names.len(), "module loaded");
    Ok(LoadedModule { device, kernels })
}

fn module() -> Result<&'static LoadedModule> {
    MODULE
        .get_or_init(load_module)
        .as_ref()
        .map_err(Clone::clone)
}

fn kernel_index(storage: DType, statistics: DType) -> Result<usize> {
    KERNELS
        .iter()
        .position(|set| set.storage == storage && set.statistics == statistics)
        .ok_or_else(|| {
            LayerNormGradError::backend(
                BACKEND,
                format!("no kernel instantiated for {storage}/{statistics}"),
            )
        })
}

fn launch_config(dims: LaunchDims) -> LaunchConfig {
    LaunchConfig {
        grid_dim: dims.grid,
        block_dim: dims.block,
        shared_mem_bytes: dims.shared_bytes,
    }
}

fn device_extent(label: &'static str, value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| LayerNormGradError::InvalidConfig {
        label,
        message: format!("{value} exceeds the device index range"),
    })
}

fn upload<E: DeviceElement>(
    device: &Arc<CudaDevice>,
    what: &'static str,
    host: &[E],
) -> Result<CudaSlice<E::Repr>> {
    let staged: Vec<E::Repr> = host.iter().map(|&value| value.to_repr()).collect();
    device
        .htod_sync_copy(&staged)
        .map_err(|err| allocation::<E>(what, host.len(), err))
}

fn zeros<E: DeviceElement>(
    device: &Arc<CudaDevice>,
    what: &'static str,
    len: usize,
) -> Result<CudaSlice<E::Repr>> {
    device
        .alloc_zeros::<E::Repr>(len)
        .map_err(|err| allocation::<E>(what, len, err))
}

fn download<E: DeviceElement>(
    device: &Arc<CudaDevice>,
    slice: &CudaSlice<E::Repr>,
) -> Result<Vec<E>> {
    let host = device
        .dtoh_sync_copy(slice)
        .map_err(|err| LayerNormGradError::backend(BACKEND, err.to_string()))?;
    Ok(host.into_iter().map(E::from_repr).collect())
}

fn allocation<E: DeviceElement>(
    what: &'static str,
    len: usize,
    err: impl std::fmt::Display,
) -> LayerNormGradError {
    LayerNormGradError::Allocation {
        what,
        bytes: len.saturating_mul(E::DTYPE.size_in_bytes()),
        message: err.to_string(),
    }
}

fn launch_error(kernel: &'static str) -> impl Fn(cudarc::driver::DriverError) -> LayerNormGradError {
    move |err| LayerNormGradError::backend(BACKEND, format!("{kernel}: {err}"))
}

/// Runs the input-gradient pass and both reduction phases on device 0.
///
/// Every device buffer is allocated and every input uploaded before the
/// first launch; host outputs are only written after the final copy back.
pub fn run<T: DeviceElement, U: DeviceStatistic>(
    plan: &PartialPlan,
    inputs: &LayerNormGradInputs<'_, T, U>,
    outputs: &mut LayerNormGradOutputs<'_, T>,
) -> Result<()> {
    if plan.features() == 0 {
        return Ok(());
    }
    if plan.instances() == 0 {
        let zero = T::from_wide(0.0);
        outputs.scale_grad.data_mut().fill(zero);
        outputs.bias_grad.data_mut().fill(zero);
        return Ok(());
    }

    let index = kernel_index(T::DTYPE, U::DTYPE)?;
    let names = &KERNELS[index];
    let module = module()?;
    let device = &module.device;
    let kernels = module.kernels[index].clone();

    let instances = device_extent("instances", plan.instances())?;
    let features = device_extent("features", plan.features())?;
    let parts = device_extent("partial_buckets", plan.parts())?;
    let input_dims = plan.input_dims::<U>()?;
    let partial_dims = plan.partial_dims()?;
    let collapse_dims = plan.collapse_dims()?;
    let partial_len = plan.partial_len()?;

    let dy = upload(device, "Y_grad", inputs.y_grad.data())?;
    let x = upload(device, "X", inputs.x.data())?;
    let scale = upload(device, "scale", inputs.scale.data())?;
    let mean = upload(device, "mean", inputs.mean.data())?;
    let inv_std_var = upload(device, "inv_std_var", inputs.inv_std_var.data())?;
    let mut x_grad = zeros::<T>(device, "X_grad", inputs.x.len())?;
    let mut partial_scale = zeros::<U>(device, "scale_grad partials", partial_len)?;
    let mut partial_bias = zeros::<U>(device, "bias_grad partials", partial_len)?;
    let mut scale_grad = zeros::<T>(device, "scale_grad", plan.features())?;
    let mut bias_grad = zeros::<T>(device, "bias_grad", plan.features())?;

    trace!(target: "st_lngrad::cuda", kernel = names.input, grid = ?input_dims.grid, "launch");
    unsafe {
        kernels
            .input
            .launch(
                launch_config(input_dims),
                (&dy, &x, &scale, &mean, &inv_std_var, features, &mut x_grad),
            )
            .map_err(launch_error(names.input))?;
    }

    trace!(target: "st_lngrad::cuda", kernel = names.partial, grid = ?partial_dims.grid, "launch");
    unsafe {
        kernels
            .partial
            .launch(
                launch_config(partial_dims),
                (
                    &dy,
                    &x,
                    &mean,
                    &inv_std_var,
                    instances,
                    features,
                    &mut partial_scale,
                    &mut partial_bias,
                ),
            )
            .map_err(launch_error(names.partial))?;
    }

    trace!(target: "st_lngrad::cuda", kernel = names.collapse, grid = ?collapse_dims.grid, "launch");
    unsafe {
        kernels
            .collapse
            .launch(
                launch_config(collapse_dims),
                (
                    &partial_scale,
                    &partial_bias,
                    parts,
                    features,
                    &mut scale_grad,
                    &mut bias_grad,
                ),
            )
            .map_err(launch_error(names.collapse))?;
    }

    device
        .synchronize()
        .map_err(|err| LayerNormGradError::backend(BACKEND, err.to_string()))?;

    let host_x_grad = download::<T>(device, &x_grad)?;
    let host_scale_grad = download::<T>(device, &scale_grad)?;
    let host_bias_grad = download::<T>(device, &bias_grad)?;

    outputs.x_grad.data_mut().copy_from_slice(&host_x_grad);
    outputs.scale_grad.data_mut().copy_from_slice(&host_scale_grad);
    outputs.bias_grad.data_mut().copy_from_slice(&host_bias_grad);
    Ok(())
}
