// SPDX-License-Identifier: AGPL-3.0-only

//! BBP digit pipeline validation.
//!
//! Checks the whole pipeline against recorded references:
//!
//! | Phase | What | Backend |
//! |-------|------|---------|
//! | 1 | digits 0..32 and isolated positions | CPU |
//! | 2 | n = 1600 term grid vs. recorded 6400-value array | CPU |
//! | 3 | direct vs. decimated totals, scale ∈ {1, 2, 4, 5, 10} | CPU |
//! | 4 | ceil-block scale, collapse, oversize and zero scale rejection, padding | CPU |
//! | 5 | bitwise determinism | CPU |
//! | 6 | GPU vs. CPU parity, f32 position limit (skipped without an adapter) | GPU |
//!
//! Exit code 0 = all checks pass, exit code 1 = any failure.

use pispring_barracuda::config::BackendChoice;
use pispring_barracuda::grid::GridDims;
use pispring_barracuda::kernels::KernelSet;
use pispring_barracuda::provenance::{self, FIXTURE_POSITION, FIXTURE_SIDE};
use pispring_barracuda::tolerances;
use pispring_barracuda::validation::ValidationHarness;
use pispring_barracuda::{ChannelSums, DigitConfig, DigitEngine, PiSpringError, ReductionPolicy};

const FIXTURE_JSON: &str = include_str!("../../tests/data/bbp_terms_n1600.json");
const EQUIVALENCE_SCALES: [u32; 5] = [1, 2, 4, 5, 10];

fn main() {
    pispring_barracuda::logging::init_tracing("warn");

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  BBP Digit Pipeline Validation                             ║");
    println!("║  Term grid → block mean → host reduce → hex digit          ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let mut harness = ValidationHarness::new("bbp");
    let cpu = DigitEngine::cpu();
    println!("  CPU backend: {}", cpu.backend().name());
    println!();

    validate_digits(&mut harness, &cpu);
    validate_reference_grid(&mut harness, &cpu);
    validate_reduction(&mut harness, &cpu);
    validate_boundaries(&mut harness, &cpu);
    validate_determinism(&mut harness, &cpu);
    validate_gpu_parity(&mut harness, &cpu);

    harness.finish();
}

// ══════════════════════════════════════════════════════════════
//  Phase 1: digits
// ══════════════════════════════════════════════════════════════
fn validate_digits(harness: &mut ValidationHarness, engine: &DigitEngine) {
    harness.phase("Digits");
    let mut prefix = String::new();
    for n in 0..provenance::PI_HEX_FRACTION.len() as u64 {
        match engine.digit(n) {
            Ok(d) => prefix.push(d.as_char()),
            Err(e) => {
                println!("  position {n}: {e}");
                prefix.push('?');
            }
        }
    }
    println!("  computed  0.{prefix}");
    println!("  expected  0.{}", provenance::PI_HEX_FRACTION);
    harness.check_digits("hex digits 0..32 of π", &prefix, provenance::PI_HEX_FRACTION);

    for (n, want) in provenance::KNOWN_DIGITS {
        let got = engine.digit(n).map(|d| d.as_char());
        println!("  position {n:>6}: {got:?} (expected {want})");
        harness.check_bool(&format!("digit at {n} = {want}"), got.ok() == Some(want));
    }
    println!();
}

// ══════════════════════════════════════════════════════════════
//  Phase 2: recorded term grid
// ══════════════════════════════════════════════════════════════
fn validate_reference_grid(harness: &mut ValidationHarness, engine: &DigitEngine) {
    harness.phase(&format!("Reference grid (n = {FIXTURE_POSITION})"));
    println!(
        "  source: {} ({})",
        provenance::FIXTURE_TERMS.script,
        provenance::FIXTURE_TERMS.command
    );
    let reference: Vec<f64> = match serde_json::from_str(FIXTURE_JSON) {
        Ok(v) => v,
        Err(e) => {
            println!("  cannot parse reference: {e}");
            harness.check_bool("reference array parses", false);
            return;
        }
    };
    harness.check_bool(
        "reference array has 6400 values",
        reference.len() == 6400,
    );

    let dims = GridDims::square(FIXTURE_SIDE);
    match engine.evaluate_grid(FIXTURE_POSITION, dims) {
        Ok(grid) => {
            let flat = grid.to_flat();
            let max_delta = flat
                .iter()
                .zip(&reference)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            println!("  max |Δ| over {} values: {max_delta:.3e}", flat.len());
            harness.check_upper(
                "term grid vs reference (max |Δ|)",
                max_delta,
                tolerances::REFERENCE_TERM_ABS,
            );
        }
        Err(e) => {
            println!("  grid evaluation failed: {e}");
            harness.check_bool("term grid evaluates", false);
        }
    }

    match engine.channel_sums(FIXTURE_POSITION, dims, ReductionPolicy::Direct) {
        Ok(sums) => {
            let diff = sums.max_abs_diff(&provenance::FIXTURE_SUMS);
            println!("  S = {:?}", sums.as_array());
            harness.check_abs(
                "fixture channel totals",
                diff,
                0.0,
                tolerances::REDUCTION_EQUIVALENCE_ABS,
            );
        }
        Err(e) => {
            println!("  reduction failed: {e}");
            harness.check_bool("fixture channel totals", false);
        }
    }
    println!();
}

/// Channel totals of the recorded fixture grid reduced at `scale`.
fn fixture_sums(engine: &DigitEngine, scale: u32) -> Result<ChannelSums, PiSpringError> {
    let policy = ReductionPolicy::from_scale(scale)?;
    engine.channel_sums(FIXTURE_POSITION, GridDims::square(FIXTURE_SIDE), policy)
}

// ══════════════════════════════════════════════════════════════
//  Phase 3: reduction equivalence
// ══════════════════════════════════════════════════════════════
fn validate_reduction(harness: &mut ValidationHarness, engine: &DigitEngine) {
    harness.phase("Direct vs decimated");
    let dims = GridDims::square(FIXTURE_SIDE);
    let Ok(direct) = engine.channel_sums(FIXTURE_POSITION, dims, ReductionPolicy::Direct) else {
        harness.check_bool("direct reduction", false);
        return;
    };
    for scale in EQUIVALENCE_SCALES {
        match fixture_sums(engine, scale) {
            Ok(sums) => {
                let diff = direct.max_abs_diff(&sums);
                println!("  scale {scale:>2}: max |Δ| = {diff:.3e}");
                harness.check_abs(
                    &format!("direct ≈ decimated (scale {scale})"),
                    diff,
                    0.0,
                    tolerances::REDUCTION_EQUIVALENCE_ABS,
                );
            }
            Err(e) => {
                println!("  scale {scale}: {e}");
                harness.check_bool(&format!("decimated scale {scale}"), false);
            }
        }
    }
    println!();
}

// ══════════════════════════════════════════════════════════════
//  Phase 4: boundaries
// ══════════════════════════════════════════════════════════════
fn validate_boundaries(harness: &mut ValidationHarness, engine: &DigitEngine) {
    harness.phase("Boundaries");
    let dims = GridDims::square(FIXTURE_SIDE);
    let direct = engine.channel_sums(FIXTURE_POSITION, dims, ReductionPolicy::Direct);

    // 40 is not a multiple of 3: the last block row/column is partial.
    let ceil_block = fixture_sums(engine, 3);
    let collapse = fixture_sums(engine, 40);
    if let Ok(direct) = &direct {
        for (label, result) in [("non-dividing scale 3", &ceil_block), ("collapse scale 40", &collapse)] {
            let diff = result.as_ref().map_or(f64::INFINITY, |s| direct.max_abs_diff(s));
            println!("  {label}: max |Δ| = {diff:.3e}");
            harness.check_abs(label, diff, 0.0, tolerances::REDUCTION_EQUIVALENCE_ABS);
        }
    } else {
        harness.check_bool("direct reduction", false);
    }

    for (label, scale) in [("oversize scale rejected", 41), ("zero scale rejected", 0)] {
        let result = fixture_sums(engine, scale);
        println!("  scale {scale} on 40×40: {:?}", result.as_ref().err().map(ToString::to_string));
        harness.check_bool(label, matches!(result, Err(PiSpringError::InvalidArgument(_))));
    }

    let small = engine.channel_sums(FIXTURE_POSITION, GridDims::square(41), ReductionPolicy::Direct);
    let large = engine.channel_sums(FIXTURE_POSITION, GridDims::square(64), ReductionPolicy::Direct);
    let padding = match (small, large) {
        (Ok(a), Ok(b)) => a.max_abs_diff(&b),
        _ => f64::INFINITY,
    };
    println!("  padding 41² vs 64²: max |Δ| = {padding:.3e}");
    harness.check_abs(
        "padding invariance",
        padding,
        0.0,
        tolerances::PADDING_INVARIANCE_ABS,
    );
    println!();
}

// ══════════════════════════════════════════════════════════════
//  Phase 5: determinism
// ══════════════════════════════════════════════════════════════
fn validate_determinism(harness: &mut ValidationHarness, engine: &DigitEngine) {
    harness.phase("Determinism");
    let config = DigitConfig::new(FIXTURE_POSITION);
    let runs: Vec<_> = (0..3).filter_map(|_| engine.compute(&config).ok()).collect();
    let identical = runs.len() == 3
        && runs.windows(2).all(|w| {
            w[0].digit == w[1].digit
                && w[0].sums.as_array().map(f64::to_bits) == w[1].sums.as_array().map(f64::to_bits)
        });
    println!("  3 runs at n = {FIXTURE_POSITION}: bitwise identical = {identical}");
    harness.check_bool("repeated runs bitwise identical", identical);
    println!();
}

// ══════════════════════════════════════════════════════════════
//  Phase 6: GPU parity
// ══════════════════════════════════════════════════════════════
fn validate_gpu_parity(harness: &mut ValidationHarness, cpu: &DigitEngine) {
    harness.phase("GPU parity");
    let gpu = match DigitEngine::open(BackendChoice::Gpu, KernelSet::builtin()) {
        Ok(engine) => engine,
        Err(e) => {
            println!("  skipped: {e}");
            println!();
            return;
        }
    };
    println!("  GPU backend: {}", gpu.backend().name());

    let config = DigitConfig::new(FIXTURE_POSITION);
    match (gpu.compute(&config), cpu.compute(&config)) {
        (Ok(g), Ok(c)) => {
            let diff = g.sums.max_abs_diff(&c.sums);
            println!("  n = {FIXTURE_POSITION}: GPU {} / CPU {}, max |ΔS| = {diff:.3e}", g.digit, c.digit);
            harness.check_bool("GPU digit = CPU digit", g.digit == c.digit);
            harness.check_abs(
                "GPU vs CPU channel totals",
                diff,
                0.0,
                tolerances::GPU_VS_CPU_SUM_ABS,
            );
        }
        (g, c) => {
            println!("  GPU: {:?}", g.err().map(|e| e.to_string()));
            println!("  CPU: {:?}", c.err().map(|e| e.to_string()));
            harness.check_bool("GPU and CPU both compute", false);
        }
    }

    let prefix: String = (0..12u64)
        .map(|n| gpu.digit(n).map_or('?', |d| d.as_char()))
        .collect();
    println!("  GPU digits 0..12: {prefix}");
    harness.check_digits("GPU digits 0..12 of π", &prefix, &provenance::PI_HEX_FRACTION[..12]);

    let past_limit = gpu.digit(tolerances::GPU_MAX_DIGIT_POSITION + 1);
    println!(
        "  n = {}: {:?}",
        tolerances::GPU_MAX_DIGIT_POSITION + 1,
        past_limit.as_ref().err().map(ToString::to_string)
    );
    harness.check_bool(
        "GPU refuses positions past the f32 limit",
        matches!(past_limit, Err(PiSpringError::BackendUnavailable(_))),
    );
    println!();
}
