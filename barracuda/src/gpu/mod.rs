// SPDX-License-Identifier: AGPL-3.0-only

//! wgpu compute backend for the digit pipeline.
//!
//! Runs the WGSL kernels over `vec4<f32>` storage buffers on any adapter
//! wgpu can open (Vulkan, Metal, DX12, GL). No optional device features are
//! required: the term kernel does its modular arithmetic in 32-bit integers
//! and stores f32 results, widened to f64 on read-back.
//!
//! ## Adapter selection
//!
//! | `PISPRING_GPU_ADAPTER` | Behavior |
//! |-------|----------|
//! | *(unset)* / `auto` | adapter the forge routed to, else discrete first |
//! | `0`, `1`, … | Select adapter by enumeration index |
//! | substring | Case-insensitive name match (e.g. `"4070"`) |
//!
//! ## Module structure
//!
//! - `adapter`: adapter discovery and selection
//! - `buffers`: grid buffers and staging read-back
//! - `dispatch`: pipeline cache, bind groups and pass submission

mod adapter;
mod buffers;
mod dispatch;

pub use adapter::{parse_backends, ADAPTER_ENV, WGPU_BACKEND_ENV};
pub use buffers::{grid_bytes, mapped_bytes_to_f32, CELL_BYTES};
pub use dispatch::{workgroups_for, WORKGROUP_EDGE};

use crate::backend::{BufferId, ComputeBackend, Pass};
use crate::error::PiSpringError;
use crate::grid::{GridDims, HostGrid};
use crate::kernels::KernelName;
use dispatch::CachedPipeline;
use pispring_forge::substrate::SubstrateKind;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

struct GpuGrid {
    dims: GridDims,
    buffer: wgpu::Buffer,
}

/// wgpu device plus the grids and compiled pipelines living on it.
///
/// The pipeline cache lives as long as the device; the engine that owns this
/// backend decides which kernel text is compiled.
pub struct GpuBackend {
    pub adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    max_workgroups: u32,
    max_grid_bytes: u64,
    runtime: tokio::runtime::Runtime,
    buffers: Mutex<HashMap<BufferId, GpuGrid>>,
    pipelines: Mutex<HashMap<KernelName, CachedPipeline>>,
    next_id: AtomicU64,
}

// ── Constructor ──────────────────────────────────────────────────────

impl GpuBackend {
    /// Open a device on the selected adapter, blocking on a local runtime.
    ///
    /// `routed` is the adapter index chosen by forge routing, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::BackendUnavailable`] if no adapter matches or
    /// [`PiSpringError::DeviceCreation`] if the device request fails.
    pub fn open(routed: Option<usize>) -> Result<Self, PiSpringError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| PiSpringError::DeviceCreation(format!("tokio runtime: {e}")))?;
        let selected = adapter::select_adapter(routed)?;
        let info = selected.get_info();
        let adapter_limits = selected.limits();

        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size: adapter_limits.max_buffer_size,
            ..wgpu::Limits::downlevel_defaults()
        };

        let (device, queue) = runtime
            .block_on(selected.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("piSpring digit device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: required_limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            ))
            .map_err(|e| PiSpringError::DeviceCreation(e.to_string()))?;

        let max_grid_bytes = u64::from(required_limits.max_storage_buffer_binding_size)
            .min(required_limits.max_buffer_size);

        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            driver = %info.driver,
            max_grid_bytes,
            "GPU device ready"
        );

        Ok(Self {
            adapter_name: info.name,
            device,
            queue,
            max_workgroups: required_limits.max_compute_workgroups_per_dimension,
            max_grid_bytes,
            runtime,
            buffers: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    fn grids(&self) -> MutexGuard<'_, HashMap<BufferId, GpuGrid>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pipelines(&self) -> MutexGuard<'_, HashMap<KernelName, CachedPipeline>> {
        self.pipelines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Backend contract ─────────────────────────────────────────────────

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn kind(&self) -> SubstrateKind {
        SubstrateKind::Gpu
    }

    fn allocate(&self, dims: GridDims, label: &str) -> Result<BufferId, PiSpringError> {
        if dims.is_empty() {
            return Err(PiSpringError::invalid(format!(
                "cannot allocate empty grid {dims} for '{label}'"
            )));
        }
        if grid_bytes(dims) > self.max_grid_bytes {
            return Err(PiSpringError::invalid(format!(
                "grid {dims} needs {} bytes, device binding limit is {}",
                grid_bytes(dims),
                self.max_grid_bytes
            )));
        }
        let buffer = self.create_grid_buffer(dims, label);
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.grids().insert(id, GpuGrid { dims, buffer });
        tracing::trace!(%id, %dims, label, "gpu allocate");
        Ok(id)
    }

    fn dispatch(&self, pass: &Pass<'_>) -> Result<(), PiSpringError> {
        let pipeline = self.pipeline(pass.kernel)?;
        let params = self.create_uniform_buffer(bytemuck::bytes_of(&pass.params), "kernel params");

        let grids = self.grids();
        let output = grids
            .get(&pass.output)
            .ok_or_else(|| PiSpringError::invalid(format!("unknown buffer {}", pass.output)))?;
        if output.dims != pass.domain() {
            return Err(PiSpringError::invalid(format!(
                "pass domain {} does not match output grid {}",
                pass.domain(),
                output.dims
            )));
        }

        let mut bound: Vec<&wgpu::Buffer> = vec![&params];
        if let Some(input) = pass.input {
            let src = grids
                .get(&input)
                .ok_or_else(|| PiSpringError::invalid(format!("unknown buffer {input}")))?;
            bound.push(&src.buffer);
        }
        bound.push(&output.buffer);

        self.submit_pass(&pipeline, &bound, pass.domain(), pass.kernel.name.as_str())
    }

    fn wait_idle(&self) -> Result<(), PiSpringError> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn read_back(&self, id: BufferId) -> Result<HostGrid, PiSpringError> {
        let grids = self.grids();
        let grid = grids
            .get(&id)
            .ok_or_else(|| PiSpringError::invalid(format!("unknown buffer {id}")))?;
        self.read_back_grid(&grid.buffer, grid.dims)
    }

    fn release(&self, id: BufferId) {
        if let Some(grid) = self.grids().remove(&id) {
            grid.buffer.destroy();
            tracing::trace!(%id, "gpu release");
        }
    }
}
