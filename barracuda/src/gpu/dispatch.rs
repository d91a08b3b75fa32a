// SPDX-License-Identifier: AGPL-3.0-only

//! Pipeline compilation and kernel dispatch.
//!
//! ```text
//! pipeline(kernel)   → compiled once per kernel text, cached per backend
//! bind group         → params, [input], output at bindings 0, 1, 2
//! encode + submit    → ONE submission per pass
//! wait_idle()        → blocking device poll
//! ```

use super::GpuBackend;
use crate::error::PiSpringError;
use crate::grid::GridDims;
use crate::kernels::KernelSource;
use std::sync::Arc;

/// Workgroup edge of both kernels (`@workgroup_size(8, 8, 1)`).
pub const WORKGROUP_EDGE: u32 = 8;

/// Workgroups covering `domain` with 8×8 tiles.
#[must_use]
pub const fn workgroups_for(domain: GridDims) -> (u32, u32, u32) {
    (
        domain.width.div_ceil(WORKGROUP_EDGE),
        domain.height.div_ceil(WORKGROUP_EDGE),
        1,
    )
}

/// A compiled pipeline and the text it was built from.
pub(super) struct CachedPipeline {
    source: String,
    pipeline: Arc<wgpu::ComputePipeline>,
}

impl GpuBackend {
    /// Compiled pipeline for `kernel`, building it on first use or when the
    /// kernel text changed.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::KernelCompile`] with the validation message
    /// if the shader or pipeline is rejected.
    pub(super) fn pipeline(
        &self,
        kernel: &KernelSource,
    ) -> Result<Arc<wgpu::ComputePipeline>, PiSpringError> {
        let mut cache = self.pipelines();
        if let Some(cached) = cache.get(&kernel.name) {
            if cached.source == kernel.text {
                return Ok(Arc::clone(&cached.pipeline));
            }
        }

        let label = kernel.name.as_str();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(kernel.text.as_str().into()),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module: &module,
                entry_point: "main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        if let Some(err) = self.block_on(self.device.pop_error_scope()) {
            return Err(PiSpringError::KernelCompile {
                kernel: label,
                message: err.to_string(),
            });
        }

        tracing::debug!(kernel = label, adapter = %self.adapter_name, "compiled pipeline");
        let pipeline = Arc::new(pipeline);
        cache.insert(
            kernel.name,
            CachedPipeline {
                source: kernel.text.clone(),
                pipeline: Arc::clone(&pipeline),
            },
        );
        Ok(pipeline)
    }

    /// Create a bind group from a pipeline and ordered buffer slice.
    ///
    /// Each buffer is bound at binding index 0, 1, 2, ... in order.
    pub(super) fn create_bind_group(
        &self,
        pipeline: &wgpu::ComputePipeline,
        buffers: &[&wgpu::Buffer],
    ) -> wgpu::BindGroup {
        let layout = pipeline.get_bind_group_layout(0);
        let entries: Vec<wgpu::BindGroupEntry> = (0u32..)
            .zip(buffers)
            .map(|(binding, buf)| wgpu::BindGroupEntry {
                binding,
                resource: buf.as_entire_binding(),
            })
            .collect();
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pass bind group"),
            layout: &layout,
            entries: &entries,
        })
    }

    /// Encode one compute pass over `domain` and submit it.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] if the domain needs more
    /// workgroups per dimension than the device allows, or
    /// [`PiSpringError::GpuCompute`] on a validation failure.
    pub(super) fn submit_pass(
        &self,
        pipeline: &wgpu::ComputePipeline,
        buffers: &[&wgpu::Buffer],
        domain: GridDims,
        label: &str,
    ) -> Result<(), PiSpringError> {
        let (wx, wy, wz) = workgroups_for(domain);
        if wx > self.max_workgroups || wy > self.max_workgroups {
            return Err(PiSpringError::invalid(format!(
                "grid {domain} needs {wx}×{wy} workgroups, device allows {} per dimension",
                self.max_workgroups
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.create_bind_group(pipeline, buffers);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(wx, wy, wz);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(err) = self.block_on(self.device.pop_error_scope()) {
            return Err(PiSpringError::GpuCompute(format!("{label}: {err}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroups_round_up() {
        assert_eq!(workgroups_for(GridDims::square(8)), (1, 1, 1));
        assert_eq!(workgroups_for(GridDims::square(41)), (6, 6, 1));
        assert_eq!(workgroups_for(GridDims::new(1, 17)), (1, 3, 1));
    }
}
