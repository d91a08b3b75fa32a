// SPDX-License-Identifier: AGPL-3.0-only

//! Integration tests: digit extraction end to end on the CPU backend.
//!
//! Every test runs the full pipeline (term grid, block-mean reduction,
//! read-back, host reduction, extraction) through the public engine API.

use pispring_barracuda::config::BackendChoice;
use pispring_barracuda::grid::{GridDims, MAX_DIGIT_POSITION};
use pispring_barracuda::kernels::KernelSet;
use pispring_barracuda::provenance::{self, KNOWN_DIGITS, PI_HEX_FRACTION};
use pispring_barracuda::tolerances::GPU_MAX_DIGIT_POSITION;
use pispring_barracuda::{DigitConfig, DigitEngine, PiSpringError};
use pispring_forge::substrate::SubstrateKind;

#[test]
fn first_hex_digits_of_pi() {
    let engine = DigitEngine::cpu();
    let digits: String = (0..12)
        .map(|n| engine.digit(n).unwrap().as_char())
        .collect();
    assert_eq!(digits, PI_HEX_FRACTION[..12]);
}

#[test]
fn full_reference_fraction() {
    let engine = DigitEngine::cpu();
    for (n, expected) in PI_HEX_FRACTION.chars().enumerate() {
        let d = engine.digit(n as u64).unwrap();
        assert_eq!(d.as_char(), expected, "position {n}");
    }
}

#[test]
fn known_far_positions() {
    let engine = DigitEngine::cpu();
    for (n, expected) in KNOWN_DIGITS {
        let d = engine.digit(n).unwrap();
        assert_eq!(d.as_char(), expected, "position {n}");
        assert_eq!(provenance::expected_digit(n), Some(expected));
    }
}

#[test]
fn result_reports_plan() {
    let engine = DigitEngine::cpu();
    let result = engine.compute(&DigitConfig::new(1600)).unwrap();
    assert_eq!(result.digit.as_char(), 'E');
    assert_eq!(result.grid, GridDims::square(41));
    assert_eq!(result.scale, 16);
    assert!(result.tail.is_none());
    let diff = result.sums.max_abs_diff(&provenance::POSITION_1600_SUMS);
    assert!(diff < 1e-6, "sums drifted by {diff}");
}

#[test]
fn tail_terms_do_not_change_digit_at_1600() {
    let engine = DigitEngine::cpu();
    let plain = engine.compute(&DigitConfig::new(1600)).unwrap();
    let tailed = engine
        .compute(&DigitConfig::new(1600).with_tail_terms(4))
        .unwrap();
    assert_eq!(plain.digit, tailed.digit);
    assert_eq!(plain.sums, tailed.sums);
    let tail = tailed.tail.unwrap();
    assert!(tail.s1 > 0.0 && tail.s1 < 0.1);
}

#[test]
fn explicit_grid_side_matches_default() {
    let engine = DigitEngine::cpu();
    let default = engine.compute(&DigitConfig::new(500)).unwrap();
    let padded = engine
        .compute(&DigitConfig::new(500).with_grid_side(32).with_scale(4))
        .unwrap();
    assert_eq!(default.digit, padded.digit);
    assert!(default.sums.max_abs_diff(&padded.sums) < 1e-9);
}

#[test]
fn invalid_arguments_are_rejected() {
    let engine = DigitEngine::cpu();
    let cases = [
        DigitConfig::new(MAX_DIGIT_POSITION + 1),
        DigitConfig::new(1600).with_scale(0),
        DigitConfig::new(1600).with_scale(42),
        DigitConfig::new(1600).with_grid_side(40),
    ];
    for config in cases {
        match engine.compute(&config) {
            Err(PiSpringError::InvalidArgument(_)) => {}
            other => panic!("{config:?} gave {other:?}"),
        }
    }
}

#[test]
fn json_result_has_digit_as_char() {
    let engine = DigitEngine::cpu();
    let result = engine.compute(&DigitConfig::new(0)).unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["digit"], "2");
    assert_eq!(json["position"], 0);
    assert!(json.get("tail").is_none());
}

#[test]
fn cpu_choice_opens_without_gpu() {
    let engine = DigitEngine::open(BackendChoice::Cpu, KernelSet::builtin()).unwrap();
    assert_eq!(engine.digit(3).unwrap().as_char(), 'F');
}

#[test]
fn open_for_validates_before_routing() {
    let config = DigitConfig::new(1600);
    let engine = DigitEngine::open_for(&config, BackendChoice::Cpu, KernelSet::builtin()).unwrap();
    assert_eq!(engine.compute(&config).unwrap().digit.as_char(), 'E');

    let bad = DigitConfig::new(1600).with_scale(0);
    let err = DigitEngine::open_for(&bad, BackendChoice::Cpu, KernelSet::builtin()).err();
    assert!(matches!(err, Some(PiSpringError::InvalidArgument(_))));
}

#[test]
fn positions_past_gpu_limit_route_to_cpu() {
    let far = DigitConfig::new(GPU_MAX_DIGIT_POSITION + 1);
    let engine = DigitEngine::open_for(&far, BackendChoice::Auto, KernelSet::builtin()).unwrap();
    assert_eq!(engine.backend().kind(), SubstrateKind::Cpu);

    let err = DigitEngine::open_for(&far, BackendChoice::Gpu, KernelSet::builtin()).err();
    assert!(matches!(err, Some(PiSpringError::BackendUnavailable(_))));
}

#[test]
fn deterministic_across_runs() {
    let engine = DigitEngine::cpu();
    let config = DigitConfig::new(1000);
    let first = engine.compute(&config).unwrap();
    for _ in 0..3 {
        let again = engine.compute(&config).unwrap();
        assert_eq!(again.sums.as_array().map(f64::to_bits), first.sums.as_array().map(f64::to_bits));
        assert_eq!(again.digit, first.digit);
    }
}
