// SPDX-License-Identifier: AGPL-3.0-only

//! Integration tests: block-mean reduction and host reduction.
//!
//! Decimated totals must agree with direct totals at every scale, including
//! scales that leave a partial last block.

use pispring_barracuda::grid::GridDims;
use pispring_barracuda::tolerances;
use pispring_barracuda::{ChannelSums, DigitEngine, PiSpringError, ReductionPolicy};

const N: u64 = 1600;

fn policy(scale: u32) -> ReductionPolicy {
    ReductionPolicy::from_scale(scale).unwrap()
}

fn direct(engine: &DigitEngine, dims: GridDims) -> ChannelSums {
    engine
        .channel_sums(N, dims, ReductionPolicy::Direct)
        .unwrap()
}

#[test]
fn decimated_matches_direct_for_dividing_scales() {
    let engine = DigitEngine::cpu();
    let dims = GridDims::square(40);
    let reference = direct(&engine, dims);
    for scale in [1, 2, 4, 5, 8, 10, 20, 40] {
        let sums = engine
            .channel_sums(N, dims, policy(scale))
            .unwrap();
        let diff = sums.max_abs_diff(&reference);
        assert!(
            diff < tolerances::REDUCTION_EQUIVALENCE_ABS,
            "scale {scale}: |Δ| = {diff}"
        );
    }
}

#[test]
fn partial_blocks_are_zero_padded() {
    let engine = DigitEngine::cpu();
    let dims = GridDims::square(41);
    let reference = direct(&engine, dims);
    for scale in [3, 7, 16, 41] {
        let sums = engine
            .channel_sums(N, dims, policy(scale))
            .unwrap();
        assert!(
            sums.max_abs_diff(&reference) < tolerances::REDUCTION_EQUIVALENCE_ABS,
            "scale {scale}"
        );
    }
}

#[test]
fn oversize_scale_rejected_before_dispatch() {
    let engine = DigitEngine::cpu();
    let err = engine
        .channel_sums(N, GridDims::square(40), policy(41))
        .unwrap_err();
    assert!(matches!(err, PiSpringError::InvalidArgument(_)));
}

#[test]
fn zero_scale_has_no_policy() {
    let err = ReductionPolicy::from_scale(0).unwrap_err();
    assert!(matches!(err, PiSpringError::InvalidArgument(_)));
    let engine = DigitEngine::cpu();
    let err = engine
        .channel_sums(N, GridDims::square(4), ReductionPolicy::Decimated { scale: 0 })
        .unwrap_err();
    assert!(matches!(err, PiSpringError::InvalidArgument(_)));
}

#[test]
fn padding_cells_contribute_nothing() {
    let engine = DigitEngine::cpu();
    let tight = direct(&engine, GridDims::square(41));
    let loose = direct(&engine, GridDims::square(64));
    assert!(tight.max_abs_diff(&loose) < tolerances::PADDING_INVARIANCE_ABS);
}

#[test]
fn rectangular_grid_reduces() {
    let engine = DigitEngine::cpu();
    let dims = GridDims::new(64, 26);
    let reference = direct(&engine, dims);
    let sums = engine
        .channel_sums(N, dims, policy(16))
        .unwrap();
    assert!(sums.max_abs_diff(&reference) < tolerances::REDUCTION_EQUIVALENCE_ABS);
}

#[test]
fn empty_grid_rejected() {
    let engine = DigitEngine::cpu();
    let err = engine
        .channel_sums(N, GridDims::new(0, 8), ReductionPolicy::Direct)
        .unwrap_err();
    assert!(matches!(err, PiSpringError::InvalidArgument(_)));
}

#[test]
fn backend_releases_every_buffer() {
    use pispring_barracuda::backend::cpu::CpuBackend;
    use pispring_barracuda::kernels::KernelSet;
    use std::sync::Arc;

    let backend = Arc::new(CpuBackend::new());
    let engine = DigitEngine::new(Box::new(Arc::clone(&backend)), KernelSet::builtin());
    engine
        .channel_sums(N, GridDims::square(41), policy(4))
        .unwrap();
    let _ = engine.channel_sums(N, GridDims::square(40), policy(99));
    assert_eq!(backend.live_buffers(), 0);
}
