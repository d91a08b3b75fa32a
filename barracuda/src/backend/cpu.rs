// SPDX-License-Identifier: AGPL-3.0-only

//! Native CPU backend.
//!
//! Grids live in host memory as `f64` cells. Each named kernel maps to its
//! host implementation in [`crate::kernels`]; the kernel text is not
//! interpreted, so only the bundled programs are accepted and anything else
//! fails as [`PiSpringError::KernelCompile`]. Rows are evaluated in parallel with rayon and a dispatch
//! returns only after every row is written, so [`ComputeBackend::wait_idle`]
//! has nothing to wait for.

use super::{BufferId, ComputeBackend, Pass};
use crate::error::PiSpringError;
use crate::grid::{Cell, GridCoord, GridDims, HostGrid};
use crate::kernels::{reduction, term_eval, KernelName};
use pispring_forge::substrate::SubstrateKind;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

struct CpuGrid {
    dims: GridDims,
    cells: Vec<Cell>,
}

/// Rayon-parallel backend storing grids as `Vec<[f64; 4]>`.
pub struct CpuBackend {
    name: String,
    buffers: Mutex<HashMap<BufferId, CpuGrid>>,
    next_id: AtomicU64,
}

impl CpuBackend {
    /// Backend named after the host CPU model.
    #[must_use]
    pub fn new() -> Self {
        let cpu = pispring_forge::probe::probe_cpu();
        Self::with_name(cpu.identity.name)
    }

    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of grids currently allocated.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<BufferId, CpuGrid>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, id: BufferId) -> Result<CpuGrid, PiSpringError> {
        self.table()
            .remove(&id)
            .ok_or_else(|| PiSpringError::invalid(format!("unknown buffer {id}")))
    }

    fn put(&self, id: BufferId, grid: CpuGrid) {
        self.table().insert(id, grid);
    }

    fn run_terms(out: &mut CpuGrid, n: u64) {
        let dims = out.dims;
        let width = dims.width as usize;
        out.cells
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                #[allow(clippy::cast_possible_truncation)]
                let y = y as u32;
                for (x, cell) in row.iter_mut().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    let coord = GridCoord::new(x as u32, y);
                    *cell = term_eval::evaluate_cell(coord, dims, n);
                }
            });
    }

    fn run_block_mean(src: &CpuGrid, out: &mut CpuGrid, scale: u32) {
        let dst_width = out.dims.width as usize;
        out.cells
            .par_chunks_mut(dst_width)
            .enumerate()
            .for_each(|(y, row)| {
                #[allow(clippy::cast_possible_truncation)]
                let y = y as u32;
                for (x, cell) in row.iter_mut().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    let dst = GridCoord::new(x as u32, y);
                    *cell = reduction::block_mean(&src.cells, src.dims, dst, scale);
                }
            });
    }

    fn reduce_into(&self, pass: &Pass<'_>, out: &mut CpuGrid) -> Result<(), PiSpringError> {
        let input = match pass.input {
            Some(input) if input != pass.output => input,
            _ => {
                return Err(PiSpringError::invalid(
                    "reduction needs a distinct input buffer",
                ))
            }
        };
        let table = self.table();
        let src = table
            .get(&input)
            .ok_or_else(|| PiSpringError::invalid(format!("unknown buffer {input}")))?;
        if src.dims != pass.params.src_dims() {
            return Err(PiSpringError::invalid(format!(
                "reduction input {input} is {}, params say {}",
                src.dims,
                pass.params.src_dims()
            )));
        }
        Self::run_block_mean(src, out, pass.params.scale);
        Ok(())
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SubstrateKind {
        SubstrateKind::Cpu
    }

    fn allocate(&self, dims: GridDims, label: &str) -> Result<BufferId, PiSpringError> {
        if dims.is_empty() {
            return Err(PiSpringError::invalid(format!(
                "cannot allocate empty grid {dims} for '{label}'"
            )));
        }
        let mut cells: Vec<Cell> = Vec::new();
        cells.try_reserve_exact(dims.area()).map_err(|e| {
            PiSpringError::Allocation(format!("{dims} grid for '{label}': {e}"))
        })?;
        cells.resize(dims.area(), [0.0; 4]);
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.put(id, CpuGrid { dims, cells });
        tracing::trace!(%id, %dims, label, "cpu allocate");
        Ok(id)
    }

    fn dispatch(&self, pass: &Pass<'_>) -> Result<(), PiSpringError> {
        if !pass.kernel.is_builtin() {
            return Err(PiSpringError::KernelCompile {
                kernel: pass.kernel.name.as_str(),
                message: "the CPU backend runs only the bundled program".into(),
            });
        }
        let mut out = self.take(pass.output)?;
        if out.dims != pass.domain() {
            let found = out.dims;
            self.put(pass.output, out);
            return Err(PiSpringError::invalid(format!(
                "pass domain {} does not match output grid {found}",
                pass.domain()
            )));
        }

        let result = match pass.kernel.name {
            KernelName::TermEvaluation => {
                Self::run_terms(&mut out, u64::from(pass.params.n));
                Ok(())
            }
            KernelName::Reduction => self.reduce_into(pass, &mut out),
        };
        self.put(pass.output, out);
        result
    }

    fn wait_idle(&self) -> Result<(), PiSpringError> {
        Ok(())
    }

    fn read_back(&self, id: BufferId) -> Result<HostGrid, PiSpringError> {
        let table = self.table();
        let grid = table
            .get(&id)
            .ok_or_else(|| PiSpringError::invalid(format!("unknown buffer {id}")))?;
        HostGrid::from_cells(grid.dims, grid.cells.clone())
    }

    fn take_back(&self, id: BufferId) -> Result<HostGrid, PiSpringError> {
        let grid = self.take(id)?;
        tracing::trace!(%id, "cpu take back");
        HostGrid::from_cells(grid.dims, grid.cells)
    }

    fn release(&self, id: BufferId) {
        if self.table().remove(&id).is_some() {
            tracing::trace!(%id, "cpu release");
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::backend::KernelParams;
    use crate::kernels::KernelSet;

    #[test]
    fn term_pass_fills_grid_and_zeroes_padding() {
        let cpu = CpuBackend::with_name("test");
        let kernels = KernelSet::builtin();
        let dims = GridDims::square(3);
        let id = cpu.allocate(dims, "terms").unwrap();
        cpu.dispatch(&Pass {
            kernel: kernels.get(KernelName::TermEvaluation),
            input: None,
            output: id,
            params: KernelParams::terms(dims, 5).unwrap(),
        })
        .unwrap();
        let grid = cpu.read_back(id).unwrap();
        assert_eq!(grid.cells()[3], term_eval::evaluate_terms(3, 5));
        assert_eq!(grid.cells()[5], term_eval::evaluate_terms(5, 5));
        assert!(grid.cells()[6..].iter().all(|c| *c == [0.0; 4]));
        cpu.release(id);
        assert_eq!(cpu.live_buffers(), 0);
    }

    #[test]
    fn reduction_pass_writes_block_means() {
        let cpu = CpuBackend::with_name("test");
        let kernels = KernelSet::builtin();
        let src_dims = GridDims::square(4);
        let dst_dims = src_dims.reduced(2).unwrap();
        let src = cpu.allocate(src_dims, "src").unwrap();
        let dst = cpu.allocate(dst_dims, "dst").unwrap();
        cpu.dispatch(&Pass {
            kernel: kernels.get(KernelName::TermEvaluation),
            input: None,
            output: src,
            params: KernelParams::terms(src_dims, 15).unwrap(),
        })
        .unwrap();
        cpu.dispatch(&Pass {
            kernel: kernels.get(KernelName::Reduction),
            input: Some(src),
            output: dst,
            params: KernelParams::block_mean(src_dims, dst_dims, 2),
        })
        .unwrap();
        let full = cpu.read_back(src).unwrap();
        let reduced = cpu.read_back(dst).unwrap();
        let expect = reduction::block_mean(full.cells(), src_dims, GridCoord::new(1, 1), 2);
        assert_eq!(reduced.cells()[3], expect);
    }

    #[test]
    fn reduction_without_input_is_rejected_and_keeps_output() {
        let cpu = CpuBackend::with_name("test");
        let kernels = KernelSet::builtin();
        let dims = GridDims::square(2);
        let out = cpu.allocate(dims, "out").unwrap();
        let err = cpu
            .dispatch(&Pass {
                kernel: kernels.get(KernelName::Reduction),
                input: None,
                output: out,
                params: KernelParams::block_mean(dims, dims, 1),
            })
            .unwrap_err();
        assert!(matches!(err, PiSpringError::InvalidArgument(_)));
        assert_eq!(cpu.live_buffers(), 1);
    }

    #[test]
    fn edited_kernel_text_is_refused() {
        let cpu = CpuBackend::with_name("test");
        let dims = GridDims::square(2);
        let id = cpu.allocate(dims, "out").unwrap();
        let edited = crate::kernels::KernelSource {
            name: KernelName::TermEvaluation,
            text: "this is not WGSL at all".into(),
        };
        let err = cpu
            .dispatch(&Pass {
                kernel: &edited,
                input: None,
                output: id,
                params: KernelParams::terms(dims, 1).unwrap(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            PiSpringError::KernelCompile { kernel: "term-evaluation", .. }
        ));
        assert_eq!(cpu.read_back(id).unwrap().cells(), &[[0.0; 4]; 4]);
    }

    #[test]
    fn oversized_allocation_is_an_error() {
        let cpu = CpuBackend::with_name("test");
        let err = cpu
            .allocate(GridDims::square(u32::MAX), "huge")
            .unwrap_err();
        assert!(matches!(err, PiSpringError::Allocation(_)));
        assert_eq!(cpu.live_buffers(), 0);
    }

    #[test]
    fn take_back_moves_the_grid_out() {
        let cpu = CpuBackend::with_name("test");
        let kernels = KernelSet::builtin();
        let dims = GridDims::square(3);
        let id = cpu.allocate(dims, "terms").unwrap();
        cpu.dispatch(&Pass {
            kernel: kernels.get(KernelName::TermEvaluation),
            input: None,
            output: id,
            params: KernelParams::terms(dims, 5).unwrap(),
        })
        .unwrap();
        let grid = cpu.take_back(id).unwrap();
        assert_eq!(grid.cells()[2], term_eval::evaluate_terms(2, 5));
        assert_eq!(cpu.live_buffers(), 0);
        assert!(cpu.take_back(id).is_err());
    }

    #[test]
    fn empty_grid_and_unknown_buffer_rejected() {
        let cpu = CpuBackend::with_name("test");
        assert!(cpu.allocate(GridDims::new(0, 4), "empty").is_err());
        assert!(cpu.read_back(BufferId(99)).is_err());
        cpu.release(BufferId(99));
    }
}
