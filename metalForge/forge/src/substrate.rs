// SPDX-License-Identifier: AGPL-3.0-only

//! Substrates: compute devices found at runtime.
//!
//! Routing looks at two things. The capability list says which pipeline
//! stages a device can run. [`GridLimits`] says how large a term grid fits
//! in one buffer and one dispatch. A GPU is bounded by its adapter limits;
//! the CPU only by host memory, which routing does not check.

use std::fmt;

/// Bytes per device grid cell (`vec4<f32>`).
pub const GPU_CELL_BYTES: u64 = 16;

/// Invocations per workgroup edge assumed when turning a workgroup limit
/// into a grid side.
pub const DISPATCH_TILE: u32 = 8;

/// A compute substrate discovered at runtime.
#[derive(Debug, Clone)]
pub struct Substrate {
    pub kind: SubstrateKind,
    pub identity: Identity,
    pub limits: GridLimits,
    pub capabilities: Vec<Capability>,
}

/// What to call a device and how to reopen it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    /// Driver string, e.g. "NVIDIA (580.82.09)".
    pub driver: Option<String>,
    /// wgpu backend, e.g. "Vulkan".
    pub backend: Option<String>,
    /// Index into `enumerate_adapters(Backends::all())`.
    pub adapter_index: Option<usize>,
}

/// Size bounds on the grids a substrate can hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridLimits {
    /// Largest storage binding in bytes (GPU).
    pub max_binding_bytes: Option<u64>,
    /// Workgroups per dispatch dimension (GPU).
    pub max_workgroups: Option<u32>,
    /// Host memory in bytes (CPU).
    pub memory_bytes: Option<u64>,
    /// Parallel workers: logical threads on the CPU.
    pub workers: Option<u32>,
    /// IEEE 754 f64 in kernels.
    pub has_f64: bool,
}

/// The kind of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubstrateKind {
    Gpu,
    Cpu,
}

/// A pipeline capability discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// f64 arithmetic (GPU `SHADER_F64` or CPU native).
    F64Compute,
    /// f32 arithmetic.
    F32Compute,
    /// WGSL shader dispatch via wgpu.
    ShaderDispatch,
    /// 2D grid dispatch over independent cells.
    GridDispatch,
    /// Block-mean downsampling before read-back.
    BlockReduce,
    /// Blocking read-back of a device buffer into host memory.
    HostReadback,
}

impl Capability {
    /// Every capability, in display order.
    pub const ALL: [Self; 6] = [
        Self::F64Compute,
        Self::F32Compute,
        Self::ShaderDispatch,
        Self::GridDispatch,
        Self::BlockReduce,
        Self::HostReadback,
    ];

    /// Short label for tables and error messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::F64Compute => "f64",
            Self::F32Compute => "f32",
            Self::ShaderDispatch => "shader",
            Self::GridDispatch => "grid",
            Self::BlockReduce => "block-reduce",
            Self::HostReadback => "readback",
        }
    }
}

impl GridLimits {
    /// Largest square grid side that fits both the binding size and the
    /// dispatch extent. `None` when neither is bounded.
    #[must_use]
    pub fn max_square_side(&self) -> Option<u32> {
        let by_bytes = self
            .max_binding_bytes
            .map(|bytes| floor_sqrt(bytes / GPU_CELL_BYTES));
        let by_dispatch = self
            .max_workgroups
            .map(|w| u64::from(w) * u64::from(DISPATCH_TILE));
        let side = match (by_bytes, by_dispatch) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return None,
        };
        Some(u32::try_from(side).unwrap_or(u32::MAX))
    }

    /// Largest 0-indexed digit position whose grid (`side ≥ ⌈√n⌉ + 1`)
    /// still fits. `None` when unbounded.
    #[must_use]
    pub fn max_position(&self) -> Option<u64> {
        self.max_square_side()
            .map(|side| u64::from(side.saturating_sub(1)).pow(2))
    }
}

fn floor_sqrt(v: u64) -> u64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let mut r = (v as f64).sqrt() as u64;
    while r.checked_mul(r).map_or(true, |sq| sq > v) {
        r -= 1;
    }
    while (r + 1).checked_mul(r + 1).is_some_and(|sq| sq <= v) {
        r += 1;
    }
    r
}

impl fmt::Display for SubstrateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gpu => "GPU",
            Self::Cpu => "CPU",
        })
    }
}

impl fmt::Display for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.identity.name, self.kind)?;
        if let Some(ref backend) = self.identity.backend {
            write!(f, " via {backend}")?;
        }
        if let Some(workers) = self.limits.workers {
            write!(f, ", {workers} threads")?;
        }
        if let Some(mem) = self.limits.memory_bytes {
            write!(f, ", {} MiB", mem >> 20)?;
        }
        if let Some(side) = self.limits.max_square_side() {
            write!(f, ", grid ≤ {side}²")?;
        }
        Ok(())
    }
}

impl Substrate {
    #[must_use]
    pub fn has(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// Whether a `side × side` grid fits this substrate's limits.
    #[must_use]
    pub fn fits_side(&self, side: u32) -> bool {
        self.limits.max_square_side().map_or(true, |max| side <= max)
    }

    /// Capability labels joined in [`Capability::ALL`] order.
    #[must_use]
    pub fn capability_summary(&self) -> String {
        Capability::ALL
            .iter()
            .filter(|c| self.has(c))
            .map(Capability::label)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Identity {
    /// Identity with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: None,
            backend: None,
            adapter_index: None,
        }
    }
}
