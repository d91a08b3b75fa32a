// SPDX-License-Identifier: AGPL-3.0-only

//! Integration tests: term grid against the recorded 40×40 reference, and
//! loading kernel programs from a directory. The CPU backend only runs the
//! bundled programs, so edited kernel text must be refused there.

use pispring_barracuda::backend::CpuBackend;
use pispring_barracuda::grid::GridDims;
use pispring_barracuda::kernels::{KernelName, KernelSet};
use pispring_barracuda::provenance::{self, FIXTURE_POSITION, FIXTURE_SIDE};
use pispring_barracuda::tolerances;
use pispring_barracuda::{DigitConfig, DigitEngine, PiSpringError, ReductionPolicy};

use std::sync::Arc;

const FIXTURE_JSON: &str = include_str!("data/bbp_terms_n1600.json");

fn reference_terms() -> Vec<f64> {
    serde_json::from_str(FIXTURE_JSON).unwrap()
}

#[test]
fn fixture_has_one_value_per_channel_cell() {
    let side = FIXTURE_SIDE as usize;
    assert_eq!(reference_terms().len(), side * side * 4);
}

#[test]
fn term_grid_matches_reference() {
    let engine = DigitEngine::cpu();
    let grid = engine
        .evaluate_grid(FIXTURE_POSITION, GridDims::square(FIXTURE_SIDE))
        .unwrap();
    let reference = reference_terms();
    let flat = grid.to_flat();
    assert_eq!(flat.len(), reference.len());
    let max_delta = flat
        .iter()
        .zip(&reference)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    assert!(
        max_delta < tolerances::REFERENCE_TERM_ABS,
        "max |Δ| = {max_delta}"
    );
}

#[test]
fn fixture_totals_match_recorded() {
    let engine = DigitEngine::cpu();
    let sums = engine
        .channel_sums(
            FIXTURE_POSITION,
            GridDims::square(FIXTURE_SIDE),
            ReductionPolicy::Direct,
        )
        .unwrap();
    assert!(sums.max_abs_diff(&provenance::FIXTURE_SUMS) < 1e-6);
}

fn kernel_dir(text_for: impl Fn(KernelName) -> String) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in KernelName::ALL {
        std::fs::write(dir.path().join(name.file_name()), text_for(name)).unwrap();
    }
    dir
}

#[test]
fn bundled_kernels_load_from_directory() {
    let dir = kernel_dir(|name| name.builtin_text().to_string());
    let loaded = KernelSet::from_dir(dir.path()).unwrap();
    assert_eq!(loaded, KernelSet::builtin());
    let engine = DigitEngine::new(Box::new(CpuBackend::new()), loaded);
    let result = engine.compute(&DigitConfig::new(1600)).unwrap();
    assert_eq!(result.digit.as_char(), 'E');
}

#[test]
fn cpu_backend_refuses_replacement_kernels() {
    let dir = kernel_dir(|_| "this is not WGSL at all".to_string());
    let loaded = KernelSet::from_dir(dir.path()).unwrap();
    assert_eq!(
        loaded.get(KernelName::TermEvaluation).text,
        "this is not WGSL at all"
    );

    let backend = Arc::new(CpuBackend::new());
    let engine = DigitEngine::new(Box::new(Arc::clone(&backend)), loaded);
    let err = engine.compute(&DigitConfig::new(1600)).unwrap_err();
    assert!(
        matches!(err, PiSpringError::KernelCompile { kernel: "term-evaluation", .. }),
        "{err}"
    );
    assert_eq!(backend.live_buffers(), 0);
}

#[test]
fn one_edited_kernel_is_enough_to_refuse() {
    let dir = kernel_dir(|name| match name {
        KernelName::TermEvaluation => name.builtin_text().to_string(),
        KernelName::Reduction => format!("{}\n// tweaked", name.builtin_text()),
    });
    let engine = DigitEngine::new(
        Box::new(CpuBackend::new()),
        KernelSet::from_dir(dir.path()).unwrap(),
    );
    let err = engine.compute(&DigitConfig::new(1600)).unwrap_err();
    assert!(matches!(err, PiSpringError::KernelCompile { kernel: "reduction", .. }));
}

#[test]
fn missing_kernel_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = KernelSet::from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, PiSpringError::KernelSource { .. }));
}
