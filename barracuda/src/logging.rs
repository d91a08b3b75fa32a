// SPDX-License-Identifier: AGPL-3.0-only

//! Process-wide tracing subscriber for the binaries.
//!
//! Log lines go to stderr so stdout carries only the digit (or JSON).
//! `RUST_LOG` overrides the default filter.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Build the filter: `RUST_LOG` if set and valid, else `default`.
#[must_use]
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the fmt subscriber once; later calls are no-ops.
///
/// Returns `true` if this call installed it.
pub fn init_tracing(default: &str) -> bool {
    if INITIALISED.set(()).is_err() {
        return false;
    }
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default()
        .with(env_filter(default))
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
