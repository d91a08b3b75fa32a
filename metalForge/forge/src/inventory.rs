// SPDX-License-Identifier: AGPL-3.0-only

//! Inventory — one list of every substrate on this machine.

use crate::probe;
use crate::substrate::Substrate;

/// Discover all substrates: GPUs first (enumeration order), then the CPU.
#[must_use]
pub fn discover() -> Vec<Substrate> {
    let mut substrates = probe::probe_gpus();
    substrates.push(probe::probe_cpu());
    tracing::debug!(count = substrates.len(), "substrate inventory complete");
    substrates
}

/// Format the inventory as a table (one substrate per line).
#[must_use]
pub fn format_inventory(substrates: &[Substrate]) -> String {
    use std::fmt::Write;
    let mut s = String::new();
    let _ = writeln!(s, "═══ Substrate Inventory ({}) ═══", substrates.len());
    for (i, sub) in substrates.iter().enumerate() {
        let _ = writeln!(s, "  [{i}] {sub}");
        let _ = writeln!(s, "      caps: {}", sub.capability_summary());
    }
    s
}

/// Print the inventory to stdout.
pub fn print_inventory(substrates: &[Substrate]) {
    print!("{}", format_inventory(substrates));
}
