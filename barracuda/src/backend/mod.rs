// SPDX-License-Identifier: AGPL-3.0-only

//! Compute-backend contract and backend selection.
//!
//! The engine drives a backend through six operations:
//!
//! ```text
//! allocate(dims)        → BufferId       4-channel 2D grid, device-owned
//! dispatch(pass)                         run a kernel over the pass domain
//! wait_idle()                            block until every dispatch landed
//! read_back(id)         → HostGrid       blocking transfer to host memory
//! take_back(id)         → HostGrid       read back and free in one step
//! release(id)                            free the grid
//! ```
//!
//! Buffers are wrapped in a [`ScopedBuffer`] so they are released on every
//! exit path, including errors.
//!
//! [`open_backend`] asks the forge inventory which substrate can run the
//! pipeline and fails with [`PiSpringError::BackendUnavailable`] before any
//! allocation when nothing qualifies. Positions past
//! [`GPU_MAX_DIGIT_POSITION`] never reach the f32 GPU kernels.

pub mod cpu;

use crate::config::{BackendChoice, Plan};
use crate::error::PiSpringError;
use crate::grid::{GridDims, HostGrid};
use crate::kernels::KernelSource;
use crate::tolerances::GPU_MAX_DIGIT_POSITION;
use bytemuck::{Pod, Zeroable};
use pispring_forge::dispatch::{self, profiles};
use pispring_forge::substrate::{Substrate, SubstrateKind};
use std::fmt;
use std::sync::Arc;

pub use cpu::CpuBackend;

/// Handle of a grid buffer owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Uniform block shared by both kernels (32 bytes, std140-compatible).
///
/// The term pass uses `dst_*` as the grid and `n`; the reduction reads
/// `src_*`, writes `dst_*` and uses `scale`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct KernelParams {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    pub n: u32,
    pub scale: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl KernelParams {
    /// Parameters of the term-evaluation pass over `dims` for position `n`.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] if `n` does not fit in 32 bits.
    pub fn terms(dims: GridDims, n: u64) -> Result<Self, PiSpringError> {
        let n = u32::try_from(n)
            .map_err(|_| PiSpringError::invalid(format!("position {n} exceeds 32 bits")))?;
        Ok(Self {
            src_width: dims.width,
            src_height: dims.height,
            dst_width: dims.width,
            dst_height: dims.height,
            n,
            ..Self::zeroed()
        })
    }

    /// Parameters of a block-mean pass from `src` into `dst`.
    #[must_use]
    pub fn block_mean(src: GridDims, dst: GridDims, scale: u32) -> Self {
        Self {
            src_width: src.width,
            src_height: src.height,
            dst_width: dst.width,
            dst_height: dst.height,
            scale,
            ..Self::zeroed()
        }
    }

    #[must_use]
    pub const fn src_dims(&self) -> GridDims {
        GridDims::new(self.src_width, self.src_height)
    }

    #[must_use]
    pub const fn dst_dims(&self) -> GridDims {
        GridDims::new(self.dst_width, self.dst_height)
    }
}

/// One kernel dispatch over the `output` grid.
#[derive(Debug, Clone, Copy)]
pub struct Pass<'k> {
    pub kernel: &'k KernelSource,
    pub input: Option<BufferId>,
    pub output: BufferId,
    pub params: KernelParams,
}

impl Pass<'_> {
    /// Dispatch domain: one invocation per output cell.
    #[must_use]
    pub const fn domain(&self) -> GridDims {
        self.params.dst_dims()
    }
}

/// A parallel compute backend able to run the two pipeline kernels.
///
/// Methods take `&self`; implementations guard their buffer tables
/// internally so a [`ScopedBuffer`] can hold a shared borrow.
pub trait ComputeBackend: Send + Sync {
    /// Human-readable device name (adapter name or CPU model).
    fn name(&self) -> &str;

    fn kind(&self) -> SubstrateKind;

    /// Allocate an uninitialized 4-channel grid.
    ///
    /// # Errors
    ///
    /// Returns an error if `dims` is empty or exceeds device limits.
    fn allocate(&self, dims: GridDims, label: &str) -> Result<BufferId, PiSpringError>;

    /// Run `pass.kernel` once per cell of `pass.domain()`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown buffers or kernel compile failures.
    fn dispatch(&self, pass: &Pass<'_>) -> Result<(), PiSpringError>;

    /// Block until every submitted dispatch has completed.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::GpuCompute`] if the device is lost.
    fn wait_idle(&self) -> Result<(), PiSpringError>;

    /// Copy a grid into host memory (blocking).
    ///
    /// # Errors
    ///
    /// Returns an error for unknown buffers or failed transfers.
    fn read_back(&self, id: BufferId) -> Result<HostGrid, PiSpringError>;

    /// Read a grid back and free it. Backends holding host memory can move
    /// the cells out instead of copying them.
    ///
    /// # Errors
    ///
    /// As [`Self::read_back`]; the grid is freed either way.
    fn take_back(&self, id: BufferId) -> Result<HostGrid, PiSpringError> {
        let grid = self.read_back(id);
        self.release(id);
        grid
    }

    /// Free a grid. Unknown ids are ignored.
    fn release(&self, id: BufferId);
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> SubstrateKind {
        (**self).kind()
    }

    fn allocate(&self, dims: GridDims, label: &str) -> Result<BufferId, PiSpringError> {
        (**self).allocate(dims, label)
    }

    fn dispatch(&self, pass: &Pass<'_>) -> Result<(), PiSpringError> {
        (**self).dispatch(pass)
    }

    fn wait_idle(&self) -> Result<(), PiSpringError> {
        (**self).wait_idle()
    }

    fn read_back(&self, id: BufferId) -> Result<HostGrid, PiSpringError> {
        (**self).read_back(id)
    }

    fn take_back(&self, id: BufferId) -> Result<HostGrid, PiSpringError> {
        (**self).take_back(id)
    }

    fn release(&self, id: BufferId) {
        (**self).release(id);
    }
}

/// A grid buffer released when dropped.
pub struct ScopedBuffer<'b> {
    backend: &'b dyn ComputeBackend,
    id: BufferId,
    dims: GridDims,
}

impl<'b> ScopedBuffer<'b> {
    /// Allocate through `backend` and take ownership of the result.
    ///
    /// # Errors
    ///
    /// Propagates [`ComputeBackend::allocate`] errors.
    pub fn allocate(
        backend: &'b dyn ComputeBackend,
        dims: GridDims,
        label: &str,
    ) -> Result<Self, PiSpringError> {
        let id = backend.allocate(dims, label)?;
        Ok(Self { backend, id, dims })
    }

    #[must_use]
    pub const fn id(&self) -> BufferId {
        self.id
    }

    #[must_use]
    pub const fn dims(&self) -> GridDims {
        self.dims
    }

    /// Blocking read-back of this buffer.
    ///
    /// # Errors
    ///
    /// Propagates [`ComputeBackend::read_back`] errors.
    pub fn read_back(&self) -> Result<HostGrid, PiSpringError> {
        self.backend.read_back(self.id)
    }

    /// Read back and free this buffer.
    ///
    /// # Errors
    ///
    /// Propagates [`ComputeBackend::take_back`] errors.
    pub fn into_host(self) -> Result<HostGrid, PiSpringError> {
        self.backend.take_back(self.id)
    }
}

impl Drop for ScopedBuffer<'_> {
    fn drop(&mut self) {
        self.backend.release(self.id);
    }
}

/// Reject positions the f32 GPU kernels cannot resolve to a digit.
///
/// # Errors
///
/// Returns [`PiSpringError::BackendUnavailable`] past
/// [`GPU_MAX_DIGIT_POSITION`].
pub fn check_gpu_position(position: u64) -> Result<(), PiSpringError> {
    if position > GPU_MAX_DIGIT_POSITION {
        return Err(PiSpringError::BackendUnavailable(format!(
            "position {position} exceeds the f32 GPU limit {GPU_MAX_DIGIT_POSITION}; use the CPU backend"
        )));
    }
    Ok(())
}

/// Open the backend for `choice` using the forge substrate inventory.
///
/// See [`open_backend_with`].
///
/// # Errors
///
/// As [`open_backend_with`].
pub fn open_backend(
    choice: BackendChoice,
    plan: Option<&Plan>,
) -> Result<Box<dyn ComputeBackend>, PiSpringError> {
    open_backend_with(choice, plan, &pispring_forge::inventory::discover())
}

/// Open the backend for `choice` from an explicit substrate inventory.
///
/// `Auto` follows forge routing (GPU first). With a `plan`, a GPU whose
/// limits cannot hold its grid is passed over, and a position past
/// [`GPU_MAX_DIGIT_POSITION`] leaves only CPU substrates. If the routed GPU
/// fails to create a device, `Auto` falls back to the CPU backend; an
/// explicit `Gpu` request fails.
///
/// # Errors
///
/// Returns [`PiSpringError::BackendUnavailable`] when no substrate can run
/// the pipeline, when a `Gpu` request names a position past the f32 limit,
/// or when the GPU device cannot be created for a `Gpu` request.
pub fn open_backend_with(
    choice: BackendChoice,
    plan: Option<&Plan>,
    substrates: &[Substrate],
) -> Result<Box<dyn ComputeBackend>, PiSpringError> {
    let mut workload = match choice {
        BackendChoice::Auto => profiles::bbp_digit(),
        BackendChoice::Gpu => profiles::bbp_digit_gpu(),
        BackendChoice::Cpu => profiles::bbp_digit_cpu(),
    };
    let mut gpu_allowed = true;
    if let Some(plan) = plan {
        workload = workload.with_grid_side(plan.grid.max_side());
        if let Err(err) = check_gpu_position(plan.position) {
            if choice == BackendChoice::Gpu {
                return Err(err);
            }
            gpu_allowed = false;
        }
    }

    let eligible: Vec<Substrate> = substrates
        .iter()
        .filter(|s| gpu_allowed || s.kind != SubstrateKind::Gpu)
        .cloned()
        .collect();
    if eligible.len() < substrates.len() {
        tracing::info!(
            limit = GPU_MAX_DIGIT_POSITION,
            "position past the f32 GPU limit, GPU substrates skipped"
        );
    }

    let Some(decision) = dispatch::route(&workload, &eligible) else {
        let reasons: Vec<String> = eligible
            .iter()
            .filter_map(|s| {
                workload
                    .rejection(s)
                    .map(|why| format!("{} {why}", s.identity.name))
            })
            .collect();
        let detail = if reasons.is_empty() {
            "no eligible substrates".to_string()
        } else {
            reasons.join("; ")
        };
        return Err(PiSpringError::BackendUnavailable(format!(
            "no substrate can run '{}': {detail}",
            workload.name
        )));
    };

    tracing::info!(
        workload = %workload.name,
        substrate = %decision.substrate.identity.name,
        reason = ?decision.reason,
        "routed digit pipeline"
    );

    match decision.substrate.kind {
        SubstrateKind::Cpu => Ok(Box::new(CpuBackend::with_name(
            decision.substrate.identity.name.clone(),
        ))),
        SubstrateKind::Gpu => {
            match crate::gpu::GpuBackend::open(decision.substrate.identity.adapter_index) {
                Ok(gpu) => Ok(Box::new(gpu)),
                Err(err) if choice == BackendChoice::Auto => {
                    tracing::warn!(error = %err, "GPU backend failed, using CPU");
                    Ok(Box::new(CpuBackend::new()))
                }
                Err(err) => Err(PiSpringError::BackendUnavailable(err.to_string())),
            }
        }
    }
}
