// SPDX-License-Identifier: AGPL-3.0-only

//! Digit extractor: four channel totals → one hexadecimal digit.
//!
//! ```text
//!   raw   = 4·S1 − 2·S4 − S5 − S6
//!   frac  = raw − ⌊raw⌋
//!   digit = min(⌊frac · 16⌋, 15)
//! ```

use crate::error::PiSpringError;
use crate::grid::CHANNEL_OFFSETS;
use crate::kernels::term_eval;
use crate::reducer::ChannelSums;
use serde::{Serialize, Serializer};
use std::fmt;

/// A hexadecimal digit in `0..=15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexDigit(u8);

impl HexDigit {
    /// `None` when `value > 15`.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value < 16 {
            Some(Self(value))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Uppercase character `'0'..='9' | 'A'..='F'`.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self.0 {
            0..=9 => (b'0' + self.0) as char,
            _ => (b'A' + self.0 - 10) as char,
        }
    }
}

impl fmt::Display for HexDigit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl Serialize for HexDigit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// BBP combination `4·S1 − 2·S4 − S5 − S6`.
#[must_use]
pub fn combine(sums: &ChannelSums) -> f64 {
    4.0 * sums.s1 - 2.0 * sums.s4 - sums.s5 - sums.s6
}

/// Digit of the fractional part of `raw`.
///
/// `⌊frac · 16⌋` can reach 16 when `frac` rounds up to 1.0; it is clamped
/// to 15.
///
/// # Errors
///
/// Returns [`PiSpringError::NumericDivergence`] if `raw` is not finite.
pub fn digit_from_raw(raw: f64) -> Result<HexDigit, PiSpringError> {
    if !raw.is_finite() {
        return Err(PiSpringError::NumericDivergence {
            stage: "digit extraction",
            detail: format!("raw combination = {raw}"),
        });
    }
    let frac = raw - raw.floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let d = (frac * 16.0).floor().clamp(0.0, 15.0) as u8;
    Ok(HexDigit(d))
}

/// Extract the digit from the four channel totals.
///
/// # Errors
///
/// Returns [`PiSpringError::NumericDivergence`] if any total or the
/// combination is NaN or infinite.
pub fn extract_digit(sums: &ChannelSums) -> Result<HexDigit, PiSpringError> {
    if !sums.is_finite() {
        return Err(PiSpringError::NumericDivergence {
            stage: "digit extraction",
            detail: format!("channel totals {:?}", sums.as_array()),
        });
    }
    digit_from_raw(combine(sums))
}

/// Sum of the first `terms` tail terms `k = n+1 ..= n+terms` per channel.
#[must_use]
pub fn tail_sums(n: u64, terms: u32) -> ChannelSums {
    (1..=u64::from(terms))
        .map(|i| {
            let k = n.saturating_add(i);
            ChannelSums::from_array(CHANNEL_OFFSETS.map(|j| term_eval::term(n, k, j)))
        })
        .fold(ChannelSums::ZERO, |acc, t| acc + t)
}
