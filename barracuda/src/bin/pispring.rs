// SPDX-License-Identifier: AGPL-3.0-only

//! piSpring CLI — the Nth hexadecimal digit of π.
//!
//! # Commands
//!
//! - `digit` - Compute one hex digit at a 0-indexed position
//! - `substrates` - List compute substrates and BBP routing

use clap::{Parser, Subcommand};
use pispring_barracuda::config::BackendChoice;
use pispring_barracuda::kernels::KernelSet;
use pispring_barracuda::{DigitConfig, DigitEngine, PiSpringError};
use pispring_forge::dispatch::{self, profiles};
use std::path::PathBuf;

/// piSpring - hexadecimal digits of π by parallel BBP term grids
#[derive(Parser)]
#[command(name = "pispring")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the hex digit at a position after the point
    ///
    /// Examples:
    ///   pispring digit 0            # 2  (π = 3.243F…)
    ///   pispring digit 1600 --sums
    ///   pispring digit 1000 --backend cpu --json
    Digit {
        /// 0-indexed digit position
        #[arg(value_name = "N")]
        position: u64,

        /// Block-mean downsample scale before read-back (default 16)
        #[arg(short, long)]
        scale: Option<u32>,

        /// Compute backend: auto, gpu or cpu (default: $PISPRING_BACKEND or auto)
        #[arg(short, long)]
        backend: Option<BackendChoice>,

        /// Directory holding term_eval_f32.wgsl and block_mean_f32.wgsl
        #[arg(long, value_name = "DIR")]
        kernel_dir: Option<PathBuf>,

        /// Host-side terms past N added before extraction
        #[arg(long, default_value = "0")]
        tail_terms: u32,

        /// Also print the four channel totals
        #[arg(long)]
        sums: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List discovered compute substrates and how the pipeline routes
    Substrates,
}

fn main() {
    pispring_barracuda::logging::init_tracing(pispring_barracuda::logging::DEFAULT_FILTER);
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Digit {
            position,
            scale,
            backend,
            kernel_dir,
            tail_terms,
            sums,
            json,
        } => {
            let config = DigitConfig {
                position,
                scale,
                grid_side: None,
                tail_terms,
            };
            run_digit(&config, backend, kernel_dir, sums, json)
        }
        Commands::Substrates => {
            list_substrates();
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run_digit(
    config: &DigitConfig,
    backend: Option<BackendChoice>,
    kernel_dir: Option<PathBuf>,
    sums: bool,
    json: bool,
) -> Result<(), PiSpringError> {
    let choice = match backend {
        Some(choice) => choice,
        None => BackendChoice::from_env()?,
    };
    let kernels = match kernel_dir {
        Some(dir) => KernelSet::from_dir(&dir)?,
        None => KernelSet::builtin(),
    };
    let engine = DigitEngine::open_for(config, choice, kernels)?;
    let result = engine.compute(config)?;

    if json {
        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| PiSpringError::invalid(format!("serialize result: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    println!("{}", result.digit);
    if sums {
        let [s1, s4, s5, s6] = result.sums.as_array();
        println!("  S1 = {s1:.10}");
        println!("  S4 = {s4:.10}");
        println!("  S5 = {s5:.10}");
        println!("  S6 = {s6:.10}");
        if let Some(tail) = result.tail {
            println!("  tail = {:?}", tail.as_array());
        }
        println!("  raw = {:.10}", result.raw);
        println!(
            "  grid {} scale {} on {}",
            result.grid, result.scale, result.backend
        );
    }
    Ok(())
}

fn list_substrates() {
    let substrates = pispring_forge::inventory::discover();
    pispring_forge::inventory::print_inventory(&substrates);
    println!();
    for work in [
        profiles::bbp_digit(),
        profiles::bbp_digit_gpu(),
        profiles::bbp_digit_cpu(),
    ] {
        match dispatch::route(&work, &substrates) {
            Some(d) => println!("  {:30} → {} ({:?})", work.name, d.substrate, d.reason),
            None => println!("  {:30} → NO CAPABLE SUBSTRATE", work.name),
        }
    }
    println!(
        "  positions above {} always run on the CPU (f32 GPU precision limit)",
        pispring_barracuda::tolerances::GPU_MAX_DIGIT_POSITION
    );
}
