// SPDX-License-Identifier: AGPL-3.0-only

//! Reference values and where they come from.
//!
//! Every expected value in the validation binary and the integration tests
//! traces back to a record here.
//!
//! ```text
//! reference source → command → output → Rust constant / tests/data file
//! ```
//!
//! ## Data Sources
//!
//! | Dataset | Notes |
//! |---------|-------|
//! | Hex expansion of π | Bailey, Borwein, Plouffe, Math. Comp. 66 (1997) 903–913 |
//! | Isolated positions 100 … 10 000 | exact-integer BBP sum in Python, cross-checked against the prefix |
//! | `tests/data/bbp_terms_n1600.json` | f64 term array from the Python BBP reference `bpp.py` |

use crate::reducer::ChannelSums;

/// A provenance record tying a Rust reference value to its origin.
#[derive(Debug, Clone)]
pub struct BaselineProvenance {
    /// Human-readable label
    pub label: &'static str,
    /// Script or publication that produced the value
    pub script: &'static str,
    /// Date the value was recorded (ISO 8601)
    pub date: &'static str,
    /// Exact command used to produce the baseline
    pub command: &'static str,
    /// Environment of the control run
    pub environment: &'static str,
    /// The reference value itself
    pub value: f64,
    /// Unit or description of the value
    pub unit: &'static str,
}

// ═══════════════════════════════════════════════════════════════════
// π hexadecimal digits
// ═══════════════════════════════════════════════════════════════════

/// First 32 hexadecimal digits of π after the point (π = 3.243F6A88…).
pub const PI_HEX_FRACTION: &str = "243F6A8885A308D313198A2E03707344";

/// Isolated digit positions checked beyond [`PI_HEX_FRACTION`].
pub const KNOWN_DIGITS: [(u64, char); 4] = [(100, '2'), (1000, '4'), (1600, 'E'), (10_000, '8')];

/// Expected digit at `position`, from the prefix or [`KNOWN_DIGITS`].
#[must_use]
pub fn expected_digit(position: u64) -> Option<char> {
    usize::try_from(position)
        .ok()
        .and_then(|p| PI_HEX_FRACTION.chars().nth(p))
        .or_else(|| {
            KNOWN_DIGITS
                .iter()
                .find(|(p, _)| *p == position)
                .map(|(_, c)| *c)
        })
}

// ═══════════════════════════════════════════════════════════════════
// n = 1600 recorded term grid
// ═══════════════════════════════════════════════════════════════════

/// Digit position of the recorded term array.
pub const FIXTURE_POSITION: u64 = 1600;

/// Side of the recorded grid: 40 × 40 cells, terms k = 0..1600.
pub const FIXTURE_SIDE: u32 = 40;

/// The recorded array: 40 × 40 cells × (S1, S4, S5, S6), row-major.
pub const FIXTURE_TERMS: BaselineProvenance = BaselineProvenance {
    label: "BBP term grid, n = 1600, 40×40",
    script: "bpp.py",
    date: "2026-10-19",
    command: "python3 bpp.py 1600 1600 tests/data/bbp_terms_n1600.json",
    environment: "Python 3, float64 division of exact integer residues",
    value: 6400.0,
    unit: "channel values",
};

/// Channel totals of the 40×40 fixture grid (terms k < 1600 only).
pub const FIXTURE_SUMS: ChannelSums = ChannelSums {
    s1: 784.937_846_112_873_4,
    s4: 771.634_419_285_612_8,
    s5: 751.476_132_836_033_1,
    s6: 759.089_702_381_058_6,
};

/// Channel totals at position 1600 over k = 0..=1600 (41×41 grid).
pub const POSITION_1600_SUMS: ChannelSums = ChannelSums {
    s1: 784.937_924_231_770_4,
    s4: 771.634_497_386_206_4,
    s5: 751.476_210_930_527_5,
    s6: 759.089_780_469_454_7,
};
