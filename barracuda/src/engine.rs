// SPDX-License-Identifier: AGPL-3.0-only

//! Digit engine: orchestrates one digit computation end to end.
//!
//! ```text
//! DigitConfig::validate          reject bad input before any allocation
//!   allocate term grid           side = max(⌈√n⌉, 1) + 1
//!   dispatch term-evaluation     one invocation per cell
//!   [dispatch reduction]         block means, scale > 1 only
//!   read back + host reduce      deterministic channel totals
//!   [+ host tail]                tail_terms > 0 only
//!   extract digit
//! ```
//!
//! The engine owns its backend and its [`KernelSet`] for its whole
//! lifetime. Each call allocates its own grids and releases them on every
//! exit path; nothing persists between calls.

use crate::backend::{self, ComputeBackend, CpuBackend, KernelParams, Pass, ScopedBuffer};
use crate::config::{BackendChoice, DigitConfig};
use crate::digit::{self, HexDigit};
use crate::error::PiSpringError;
use crate::grid::{check_dims, check_position, GridDims, HostGrid};
use crate::kernels::{KernelName, KernelSet};
use crate::reducer::{self, ChannelSums, ReductionPolicy};
use pispring_forge::substrate::SubstrateKind;
use serde::Serialize;
use std::time::Instant;

/// Outcome of [`DigitEngine::compute`].
#[derive(Debug, Clone, Serialize)]
pub struct DigitResult {
    pub position: u64,
    pub digit: HexDigit,
    /// Channel totals over the term grid (tail excluded).
    pub sums: ChannelSums,
    /// Host tail added before extraction, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail: Option<ChannelSums>,
    /// `4·S1 − 2·S4 − S5 − S6` of the totals the digit came from.
    pub raw: f64,
    pub grid: GridDims,
    pub scale: u32,
    pub backend: String,
}

/// A compute backend plus the kernel programs it runs.
pub struct DigitEngine {
    backend: Box<dyn ComputeBackend>,
    kernels: KernelSet,
}

impl DigitEngine {
    #[must_use]
    pub fn new(backend: Box<dyn ComputeBackend>, kernels: KernelSet) -> Self {
        Self { backend, kernels }
    }

    /// Open the backend for `choice` through forge routing.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::BackendUnavailable`] when no substrate can
    /// run the pipeline.
    pub fn open(choice: BackendChoice, kernels: KernelSet) -> Result<Self, PiSpringError> {
        Ok(Self::new(backend::open_backend(choice, None)?, kernels))
    }

    /// Like [`Self::open`], but route for `config`: skip substrates too small
    /// for its grid, and keep positions past the f32 GPU limit on the CPU.
    ///
    /// # Errors
    ///
    /// [`PiSpringError::InvalidArgument`] if `config` is invalid, otherwise
    /// as [`Self::open`].
    pub fn open_for(
        config: &DigitConfig,
        choice: BackendChoice,
        kernels: KernelSet,
    ) -> Result<Self, PiSpringError> {
        let plan = config.validate()?;
        let backend = backend::open_backend(choice, Some(&plan))?;
        Ok(Self::new(backend, kernels))
    }

    /// CPU backend with the bundled kernels.
    #[must_use]
    pub fn cpu() -> Self {
        Self::new(Box::new(CpuBackend::new()), KernelSet::builtin())
    }

    #[must_use]
    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    #[must_use]
    pub const fn kernels(&self) -> &KernelSet {
        &self.kernels
    }

    /// Hex digit at `position` with default options.
    ///
    /// # Errors
    ///
    /// See [`Self::compute`].
    pub fn digit(&self, position: u64) -> Result<HexDigit, PiSpringError> {
        self.compute(&DigitConfig::new(position)).map(|r| r.digit)
    }

    /// Run the full pipeline for `config`.
    ///
    /// # Errors
    ///
    /// [`PiSpringError::InvalidArgument`] for a bad configuration (nothing
    /// is allocated), [`PiSpringError::NumericDivergence`] for NaN/Inf, or
    /// any backend error.
    pub fn compute(&self, config: &DigitConfig) -> Result<DigitResult, PiSpringError> {
        let plan = config.validate()?;
        let policy = ReductionPolicy::from_scale(plan.scale)?;
        let started = Instant::now();

        let sums = self.channel_sums(plan.position, plan.grid, policy)?;
        let tail = (plan.tail_terms > 0).then(|| digit::tail_sums(plan.position, plan.tail_terms));
        let total = tail.map_or(sums, |t| sums + t);
        let digit = digit::extract_digit(&total)?;

        tracing::info!(
            position = plan.position,
            %digit,
            grid = %plan.grid,
            scale = plan.scale,
            backend = self.backend.name(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
            "digit extracted"
        );

        Ok(DigitResult {
            position: plan.position,
            digit,
            sums,
            tail,
            raw: digit::combine(&total),
            grid: plan.grid,
            scale: plan.scale,
            backend: self.backend.name().to_string(),
        })
    }

    fn check_grid(n: u64, dims: GridDims) -> Result<(), PiSpringError> {
        check_position(n)?;
        check_dims(dims)
    }

    fn term_pass(&self, buffer: &ScopedBuffer<'_>, n: u64) -> Result<(), PiSpringError> {
        let t0 = Instant::now();
        self.backend.dispatch(&Pass {
            kernel: self.kernels.get(KernelName::TermEvaluation),
            input: None,
            output: buffer.id(),
            params: KernelParams::terms(buffer.dims(), n)?,
        })?;
        self.backend.wait_idle()?;
        tracing::debug!(
            grid = %buffer.dims(),
            elapsed_ms = t0.elapsed().as_secs_f64() * 1e3,
            "term pass"
        );
        Ok(())
    }

    /// Evaluate the term grid for position `n` over `dims` and read it back.
    ///
    /// `dims` need not cover every term; cells beyond the grid are simply
    /// not evaluated (used for recorded fixtures).
    ///
    /// # Errors
    ///
    /// [`PiSpringError::InvalidArgument`] for an empty grid or bad position,
    /// [`PiSpringError::NumericDivergence`] if a cell is NaN/Inf.
    pub fn evaluate_grid(&self, n: u64, dims: GridDims) -> Result<HostGrid, PiSpringError> {
        Self::check_grid(n, dims)?;
        let grid = ScopedBuffer::allocate(self.backend(), dims, "term grid")?;
        self.term_pass(&grid, n)?;
        let host = grid.into_host()?;
        if let Some((cell, channel, value)) = host.first_non_finite() {
            return Err(PiSpringError::NumericDivergence {
                stage: "term evaluation",
                detail: format!("cell {cell} channel {channel} = {value}"),
            });
        }
        Ok(host)
    }

    /// Channel totals for position `n` over `dims` under `policy`.
    ///
    /// # Errors
    ///
    /// [`PiSpringError::InvalidArgument`] for an empty or oversized grid, bad
    /// position or a bad scale; [`PiSpringError::BackendUnavailable`] for a
    /// GPU backend past its f32 position limit; otherwise backend or
    /// divergence errors.
    pub fn channel_sums(
        &self,
        n: u64,
        dims: GridDims,
        policy: ReductionPolicy,
    ) -> Result<ChannelSums, PiSpringError> {
        Self::check_grid(n, dims)?;
        if self.backend.kind() == SubstrateKind::Gpu {
            backend::check_gpu_position(n)?;
        }
        let reduced_dims = dims.reduced(policy.scale())?;
        let backend = self.backend();

        let grid = ScopedBuffer::allocate(backend, dims, "term grid")?;
        self.term_pass(&grid, n)?;

        let t0 = Instant::now();
        let host = match policy {
            ReductionPolicy::Direct => grid.into_host()?,
            ReductionPolicy::Decimated { scale } => {
                let reduced = ScopedBuffer::allocate(backend, reduced_dims, "reduced grid")?;
                backend.dispatch(&Pass {
                    kernel: self.kernels.get(KernelName::Reduction),
                    input: Some(grid.id()),
                    output: reduced.id(),
                    params: KernelParams::block_mean(dims, reduced_dims, scale),
                })?;
                backend.wait_idle()?;
                drop(grid);
                tracing::debug!(
                    from = %dims,
                    to = %reduced_dims,
                    scale,
                    elapsed_ms = t0.elapsed().as_secs_f64() * 1e3,
                    "reduction pass"
                );
                reduced.into_host()?
            }
        };

        let t1 = Instant::now();
        let sums = reducer::reduce(&host, policy)?;
        tracing::debug!(
            cells = host.dims().area(),
            elapsed_ms = t1.elapsed().as_secs_f64() * 1e3,
            "host reduction"
        );
        Ok(sums)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::BufferId;
    use crate::provenance;
    use crate::tolerances::{
        GPU_MAX_DIGIT_POSITION, PADDING_INVARIANCE_ABS, REDUCTION_EQUIVALENCE_ABS,
    };
    use std::sync::Arc;

    fn engine() -> DigitEngine {
        DigitEngine::new(Box::new(CpuBackend::with_name("test cpu")), KernelSet::builtin())
    }

    /// Host buffers behind a backend that reports itself as a GPU.
    struct GpuKind(Arc<CpuBackend>);

    impl ComputeBackend for GpuKind {
        fn name(&self) -> &str {
            "gpu-kind"
        }
        fn kind(&self) -> SubstrateKind {
            SubstrateKind::Gpu
        }
        fn allocate(&self, dims: GridDims, label: &str) -> Result<BufferId, PiSpringError> {
            self.0.allocate(dims, label)
        }
        fn dispatch(&self, pass: &Pass<'_>) -> Result<(), PiSpringError> {
            self.0.dispatch(pass)
        }
        fn wait_idle(&self) -> Result<(), PiSpringError> {
            self.0.wait_idle()
        }
        fn read_back(&self, id: BufferId) -> Result<HostGrid, PiSpringError> {
            self.0.read_back(id)
        }
        fn release(&self, id: BufferId) {
            self.0.release(id);
        }
    }

    #[test]
    fn first_four_digits() {
        let e = engine();
        let got: String = (0..4).map(|n| e.digit(n).unwrap().as_char()).collect();
        assert_eq!(got, "243F");
    }

    #[test]
    fn result_carries_plan_and_backend() {
        let r = engine().compute(&DigitConfig::new(1600)).unwrap();
        assert_eq!(r.digit.as_char(), 'E');
        assert_eq!(r.grid, GridDims::square(41));
        assert_eq!(r.scale, 16);
        assert_eq!(r.backend, "test cpu");
        assert!(r.tail.is_none());
        assert!(r.sums.max_abs_diff(&provenance::POSITION_1600_SUMS) < REDUCTION_EQUIVALENCE_ABS);
    }

    #[test]
    fn oversize_scale_is_rejected() {
        let e = engine();
        let err = e.compute(&DigitConfig::new(10).with_scale(99)).unwrap_err();
        assert!(matches!(err, PiSpringError::InvalidArgument(_)));
    }

    #[test]
    fn padding_does_not_change_sums() {
        let e = engine();
        let a = e.channel_sums(50, GridDims::square(8), ReductionPolicy::Direct).unwrap();
        let b = e.channel_sums(50, GridDims::square(20), ReductionPolicy::Direct).unwrap();
        assert!(a.max_abs_diff(&b) < PADDING_INVARIANCE_ABS);
    }

    #[test]
    fn tail_is_reported_but_not_in_grid_sums() {
        let e = engine();
        let plain = e.compute(&DigitConfig::new(200)).unwrap();
        let tailed = e.compute(&DigitConfig::new(200).with_tail_terms(4)).unwrap();
        assert_eq!(plain.sums, tailed.sums);
        assert!(tailed.tail.is_some());
        assert_eq!(plain.digit, tailed.digit);
    }

    #[test]
    fn json_result_has_digit_char() {
        let r = engine().compute(&DigitConfig::new(3)).unwrap();
        let v: serde_json::Value = serde_json::to_value(&r).unwrap();
        assert_eq!(v["digit"], "F");
        assert_eq!(v["position"], 3);
        assert!(v.get("tail").is_none());
    }

    #[test]
    fn gpu_backend_refuses_positions_past_f32_limit() {
        let host = Arc::new(CpuBackend::with_name("host"));
        let e = DigitEngine::new(Box::new(GpuKind(Arc::clone(&host))), KernelSet::builtin());
        let err = e.digit(GPU_MAX_DIGIT_POSITION + 1).unwrap_err();
        assert!(matches!(err, PiSpringError::BackendUnavailable(_)));
        assert_eq!(host.live_buffers(), 0);
        assert_eq!(e.digit(3).unwrap().as_char(), 'F');
    }

    #[test]
    fn huge_explicit_grid_is_rejected_not_allocated() {
        let e = engine();
        let err = e.compute(&DigitConfig::new(0).with_grid_side(u32::MAX)).unwrap_err();
        assert!(matches!(err, PiSpringError::InvalidArgument(_)));
        let err = e
            .channel_sums(0, GridDims::square(u32::MAX), ReductionPolicy::Direct)
            .unwrap_err();
        assert!(matches!(err, PiSpringError::InvalidArgument(_)));
    }
}
