// SPDX-License-Identifier: AGPL-3.0-only

//! Pass/fail bookkeeping for the validation binaries.
//!
//! A binary opens a phase, records checks against [`crate::tolerances`],
//! and ends with [`ValidationHarness::finish`], which prints a per-phase
//! summary and exits 0 only if every check passed.

use std::fmt::{self, Write};
use std::process;

/// What a check compared and how it came out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// `|observed − expected| < tolerance`.
    Within {
        observed: f64,
        expected: f64,
        tolerance: f64,
    },
    /// `observed < bound`.
    Below { observed: f64, bound: f64 },
    /// Hex digit strings; `first_mismatch` is the 0-indexed position of the
    /// first differing digit.
    Digits {
        length: usize,
        first_mismatch: Option<usize>,
    },
    /// A yes/no condition.
    Holds,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Within {
                observed,
                expected,
                tolerance,
            } => write!(
                f,
                "|{observed:.6e} − {expected:.6e}| vs {tolerance:.1e}"
            ),
            Self::Below { observed, bound } => write!(f, "{observed:.3e} < {bound:.1e}"),
            Self::Digits {
                length,
                first_mismatch: None,
            } => write!(f, "{length} digits"),
            Self::Digits {
                length,
                first_mismatch: Some(at),
            } => write!(f, "{length} digits, first mismatch at {at}"),
            Self::Holds => Ok(()),
        }
    }
}

/// One recorded check.
#[derive(Debug, Clone)]
pub struct Check {
    pub phase: usize,
    pub label: String,
    pub passed: bool,
    pub outcome: Outcome,
}

/// Checks grouped under named phases.
#[derive(Debug, Default)]
#[must_use]
pub struct ValidationHarness {
    pub name: String,
    pub phases: Vec<String>,
    pub checks: Vec<Check>,
}

impl ValidationHarness {
    #[must_use = "validation harness must be used to run checks"]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Start a phase and print its banner; later checks belong to it.
    pub fn phase(&mut self, title: &str) {
        self.phases.push(title.to_string());
        let banner = format!("═══ Phase {}: {title} ", self.phases.len());
        let pad = 64usize.saturating_sub(banner.chars().count());
        println!("{banner}{}", "═".repeat(pad));
    }

    pub fn check_abs(&mut self, label: &str, observed: f64, expected: f64, tolerance: f64) {
        let passed = (observed - expected).abs() < tolerance;
        self.record(
            label,
            passed,
            Outcome::Within {
                observed,
                expected,
                tolerance,
            },
        );
    }

    /// `observed < bound`; a NaN observation fails.
    pub fn check_upper(&mut self, label: &str, observed: f64, bound: f64) {
        self.record(label, observed < bound, Outcome::Below { observed, bound });
    }

    /// Compare a computed hex digit string with the expected one.
    pub fn check_digits(&mut self, label: &str, computed: &str, expected: &str) {
        let first_mismatch = computed
            .chars()
            .zip(expected.chars())
            .position(|(a, b)| a != b)
            .or_else(|| {
                (computed.len() != expected.len()).then(|| computed.len().min(expected.len()))
            });
        self.record(
            label,
            first_mismatch.is_none(),
            Outcome::Digits {
                length: expected.len(),
                first_mismatch,
            },
        );
    }

    pub fn check_bool(&mut self, label: &str, passed: bool) {
        self.record(label, passed, Outcome::Holds);
    }

    fn record(&mut self, label: &str, passed: bool, outcome: Outcome) {
        self.checks.push(Check {
            phase: self.phases.len(),
            label: label.to_string(),
            passed,
            outcome,
        });
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Summary grouped by phase, as printed by [`Self::finish`].
    #[must_use]
    pub fn format_summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(
            s,
            "═══ {} validation: {}/{} checks passed ═══",
            self.name,
            self.passed_count(),
            self.checks.len()
        );
        for phase in 0..=self.phases.len() {
            let checks: Vec<&Check> = self.checks.iter().filter(|c| c.phase == phase).collect();
            if checks.is_empty() {
                continue;
            }
            if phase > 0 {
                let _ = writeln!(s, "  {}", self.phases[phase - 1]);
            }
            for check in checks {
                let mark = if check.passed { "✓" } else { "✗" };
                match check.outcome {
                    Outcome::Holds => {
                        let _ = writeln!(s, "    {mark} {}", check.label);
                    }
                    outcome => {
                        let _ = writeln!(s, "    {mark} {}: {outcome}", check.label);
                    }
                }
            }
        }
        s
    }

    /// Print the summary; exit 0 if every check passed, 1 otherwise.
    pub fn finish(&self) -> ! {
        println!();
        print!("{}", self.format_summary());
        let failed = self.checks.len() - self.passed_count();
        if failed == 0 {
            println!("ALL CHECKS PASSED");
            process::exit(0);
        }
        println!("{failed} CHECK(S) FAILED");
        process::exit(1);
    }
}
