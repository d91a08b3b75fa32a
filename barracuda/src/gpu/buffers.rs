// SPDX-License-Identifier: AGPL-3.0-only

//! Grid buffer creation and staging read-back.
//!
//! Device grids are `array<vec4<f32>>`, 16 bytes per cell. Read-back copies
//! into a `MAP_READ` staging buffer, blocks on the device poll, and widens
//! each channel to `f64` on the host.

use super::GpuBackend;
use crate::error::PiSpringError;
use crate::grid::{GridDims, HostGrid, CHANNELS};

/// Bytes per grid cell on the device (`vec4<f32>`).
pub const CELL_BYTES: u64 = (CHANNELS * std::mem::size_of::<f32>()) as u64;

/// Device size of a grid in bytes.
#[must_use]
pub const fn grid_bytes(dims: GridDims) -> u64 {
    dims.area() as u64 * CELL_BYTES
}

impl GpuBackend {
    /// Create a storage buffer for a 4-channel grid (contents undefined).
    pub(super) fn create_grid_buffer(&self, dims: GridDims, label: &str) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: grid_bytes(dims),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Create a uniform buffer from raw bytes.
    pub(super) fn create_uniform_buffer(&self, data: &[u8], label: &str) -> wgpu::Buffer {
        use wgpu::util::DeviceExt;
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }

    /// Create a staging buffer for reading results back to the host.
    fn create_staging_buffer(&self, size: u64, label: &str) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Copy `buffer` into a staging buffer, wait, and decode the cells.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::GpuCompute`] if the map callback fails or
    /// the channel is dropped.
    pub(super) fn read_back_grid(
        &self,
        buffer: &wgpu::Buffer,
        dims: GridDims,
    ) -> Result<HostGrid, PiSpringError> {
        let size = grid_bytes(dims);
        let staging = self.create_staging_buffer(size, "grid readback");
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grid readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| {
                PiSpringError::GpuCompute("GPU map callback: channel recv failed".into())
            })?
            .map_err(|e| PiSpringError::GpuCompute(format!("GPU buffer mapping: {e}")))?;

        let data = slice.get_mapped_range();
        let values = mapped_bytes_to_f32(&data);
        drop(data);
        staging.unmap();

        let flat: Vec<f64> = values.into_iter().map(f64::from).collect();
        HostGrid::from_flat(dims, &flat)
    }
}

/// Convert mapped GPU buffer bytes to f32 values.
///
/// Mapped buffers are normally page-aligned so `bytemuck::try_cast_slice`
/// succeeds; misaligned data falls back to per-value decoding.
#[must_use]
pub fn mapped_bytes_to_f32(data: &[u8]) -> Vec<f32> {
    bytemuck::try_cast_slice(data).map_or_else(
        |_| {
            data.chunks_exact(4)
                .map(|chunk| {
                    let mut b = [0u8; 4];
                    b.copy_from_slice(chunk);
                    f32::from_le_bytes(b)
                })
                .collect()
        },
        <[f32]>::to_vec,
    )
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn grid_bytes_is_sixteen_per_cell() {
        assert_eq!(CELL_BYTES, 16);
        assert_eq!(grid_bytes(GridDims::square(41)), 41 * 41 * 16);
    }

    #[test]
    fn mapped_bytes_decode_aligned_and_misaligned() {
        let values = [0.2f32, 2.0 / 3.0, -1.5, 0.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(mapped_bytes_to_f32(&bytes), values);

        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        assert_eq!(mapped_bytes_to_f32(&shifted[1..]), values);
    }
}
