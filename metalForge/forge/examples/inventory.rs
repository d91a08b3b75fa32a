// SPDX-License-Identifier: AGPL-3.0-only

//! Print the substrates on this machine and where each digit-pipeline
//! profile routes for a few positions.

use pispring_forge::dispatch::{self, profiles};

/// Positions spanning small, fixture-sized and GPU-limit-sized grids.
const POSITIONS: [u64; 4] = [0, 1_600, 1_000_000, 100_000_000];

fn grid_side(n: u64) -> u32 {
    let mut root = (n as f64).sqrt() as u64;
    while root * root < n {
        root += 1;
    }
    u32::try_from(root.max(1) + 1).unwrap_or(u32::MAX)
}

fn main() {
    let substrates = pispring_forge::inventory::discover();
    pispring_forge::inventory::print_inventory(&substrates);

    println!();
    println!("═══ Dispatch Routing ═══════════════════════════════════════");
    for work in [profiles::bbp_digit(), profiles::bbp_digit_gpu(), profiles::bbp_digit_cpu()] {
        println!("  {}", work.name);
        for n in POSITIONS {
            let side = grid_side(n);
            let sized = work.clone().with_grid_side(side);
            match dispatch::route(&sized, &substrates) {
                Some(d) => println!(
                    "    n = {n:>11} ({side}²) → {} ({:?})",
                    d.substrate.identity.name, d.reason
                ),
                None => println!("    n = {n:>11} ({side}²) → NO CAPABLE SUBSTRATE"),
            }
        }
    }

    println!();
    println!("═══ Largest position per substrate ═════════════════════════");
    for s in &substrates {
        let bound = s
            .limits
            .max_position()
            .map_or_else(|| "host memory".to_string(), |n| n.to_string());
        println!("  {:40} f64: {:5} max n: {bound}", s.identity.name, s.limits.has_f64);
    }
}
