// SPDX-License-Identifier: AGPL-3.0-only

//! Dispatch routing: pick the substrate that runs a workload.
//!
//! A substrate qualifies when it has every required capability and, if the
//! workload names a grid side, its limits hold that grid. Among qualifying
//! substrates the preferred kind wins, then the first GPU, then the CPU.

use crate::substrate::{Capability, Substrate, SubstrateKind};

/// What a pipeline variant needs from a substrate.
#[derive(Debug, Clone)]
pub struct Workload {
    pub name: String,
    pub required: Vec<Capability>,
    pub preferred: Option<SubstrateKind>,
    /// Side of the square term grid, when known up front.
    pub grid_side: Option<u32>,
}

/// The chosen substrate and why.
#[derive(Debug)]
pub struct Decision<'a> {
    pub substrate: &'a Substrate,
    pub reason: Reason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The workload's preferred kind qualified.
    Preferred,
    /// First qualifying GPU in enumeration order.
    Gpu,
    /// No GPU qualified.
    CpuFallback,
}

impl Workload {
    #[must_use]
    pub fn new(name: impl Into<String>, required: Vec<Capability>) -> Self {
        Self {
            name: name.into(),
            required,
            preferred: None,
            grid_side: None,
        }
    }

    #[must_use]
    pub const fn prefer(mut self, kind: SubstrateKind) -> Self {
        self.preferred = Some(kind);
        self
    }

    /// Require room for a `side × side` grid.
    #[must_use]
    pub const fn with_grid_side(mut self, side: u32) -> Self {
        self.grid_side = Some(side);
        self
    }

    /// Capabilities this workload needs that `substrate` lacks.
    #[must_use]
    pub fn missing_on(&self, substrate: &Substrate) -> Vec<Capability> {
        self.required
            .iter()
            .filter(|req| !substrate.has(req))
            .copied()
            .collect()
    }

    /// Why `substrate` cannot run this workload, or `None` if it can.
    #[must_use]
    pub fn rejection(&self, substrate: &Substrate) -> Option<String> {
        let missing = self.missing_on(substrate);
        if !missing.is_empty() {
            let labels: Vec<&str> = missing.iter().map(Capability::label).collect();
            return Some(format!("lacks [{}]", labels.join(", ")));
        }
        match self.grid_side {
            Some(side) if !substrate.fits_side(side) => Some(format!(
                "grid {side}×{side} exceeds limit {}²",
                substrate.limits.max_square_side().unwrap_or(0)
            )),
            _ => None,
        }
    }

    #[must_use]
    pub fn accepts(&self, substrate: &Substrate) -> bool {
        self.rejection(substrate).is_none()
    }
}

/// Route `workload` over `substrates`; `None` if nothing qualifies.
#[must_use]
pub fn route<'a>(workload: &Workload, substrates: &'a [Substrate]) -> Option<Decision<'a>> {
    let capable: Vec<&Substrate> = substrates.iter().filter(|s| workload.accepts(s)).collect();
    let first_of = |kind: SubstrateKind| capable.iter().copied().find(|s| s.kind == kind);

    if let Some(substrate) = workload.preferred.and_then(first_of) {
        return Some(Decision {
            substrate,
            reason: Reason::Preferred,
        });
    }
    if let Some(substrate) = first_of(SubstrateKind::Gpu) {
        return Some(Decision {
            substrate,
            reason: Reason::Gpu,
        });
    }
    first_of(SubstrateKind::Cpu).map(|substrate| Decision {
        substrate,
        reason: Reason::CpuFallback,
    })
}

/// Workload profiles for the BBP digit pipeline.
pub mod profiles {
    use super::Workload;
    use crate::substrate::{Capability, SubstrateKind};

    const PIPELINE: [Capability; 3] = [
        Capability::GridDispatch,
        Capability::BlockReduce,
        Capability::HostReadback,
    ];

    /// Term grid, block-mean reduction and read-back on any substrate.
    #[must_use]
    pub fn bbp_digit() -> Workload {
        Workload::new("BBP digit extraction", PIPELINE.to_vec())
    }

    /// The pipeline on WGSL compute shaders (f32 grid storage).
    #[must_use]
    pub fn bbp_digit_gpu() -> Workload {
        let mut required = vec![Capability::F32Compute, Capability::ShaderDispatch];
        required.extend(PIPELINE);
        Workload::new("BBP digit extraction (GPU)", required).prefer(SubstrateKind::Gpu)
    }

    /// The pipeline on native CPU threads (f64 grid storage).
    #[must_use]
    pub fn bbp_digit_cpu() -> Workload {
        let mut required = vec![Capability::F64Compute];
        required.extend(PIPELINE);
        Workload::new("BBP digit extraction (CPU)", required).prefer(SubstrateKind::Cpu)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::profiles;
    use super::*;
    use crate::substrate::{GridLimits, Identity};

    fn gpu(name: &str, caps: &[Capability], binding_bytes: u64) -> Substrate {
        Substrate {
            kind: SubstrateKind::Gpu,
            identity: Identity::named(name),
            limits: GridLimits {
                max_binding_bytes: Some(binding_bytes),
                max_workgroups: Some(65_535),
                ..GridLimits::default()
            },
            capabilities: caps.to_vec(),
        }
    }

    fn full_gpu() -> Substrate {
        gpu(
            "RTX 4070",
            &[
                Capability::F32Compute,
                Capability::ShaderDispatch,
                Capability::GridDispatch,
                Capability::BlockReduce,
                Capability::HostReadback,
            ],
            128 << 20,
        )
    }

    fn cpu() -> Substrate {
        Substrate {
            kind: SubstrateKind::Cpu,
            identity: Identity::named("CPU"),
            limits: GridLimits {
                has_f64: true,
                ..GridLimits::default()
            },
            capabilities: vec![
                Capability::F64Compute,
                Capability::F32Compute,
                Capability::GridDispatch,
                Capability::BlockReduce,
                Capability::HostReadback,
            ],
        }
    }

    #[test]
    fn any_profile_routes_to_gpu_first() {
        let subs = [cpu(), full_gpu()];
        let d = route(&profiles::bbp_digit(), &subs).expect("should route");
        assert_eq!(d.substrate.kind, SubstrateKind::Gpu);
        assert_eq!(d.reason, Reason::Gpu);
    }

    #[test]
    fn cpu_only_host_falls_back() {
        let subs = [cpu()];
        let d = route(&profiles::bbp_digit(), &subs).expect("should route to CPU");
        assert_eq!(d.reason, Reason::CpuFallback);
    }

    #[test]
    fn gpu_profile_has_no_route_on_cpu_only_host() {
        assert!(route(&profiles::bbp_digit_gpu(), &[cpu()]).is_none());
    }

    #[test]
    fn cpu_profile_prefers_cpu() {
        let subs = [full_gpu(), cpu()];
        let d = route(&profiles::bbp_digit_cpu(), &subs).expect("should route");
        assert_eq!(d.substrate.kind, SubstrateKind::Cpu);
        assert_eq!(d.reason, Reason::Preferred);
    }

    #[test]
    fn oversized_grid_skips_the_gpu() {
        let subs = [full_gpu(), cpu()];
        let work = profiles::bbp_digit().with_grid_side(4096);
        let d = route(&work, &subs).expect("CPU has no grid bound");
        assert_eq!(d.substrate.kind, SubstrateKind::Cpu);

        let reason = work.rejection(&subs[0]).expect("GPU rejected");
        assert!(reason.contains("4096×4096"), "{reason}");
        assert!(reason.contains("2896²"), "{reason}");
    }

    #[test]
    fn gpu_without_reduce_is_skipped() {
        let partial = gpu(
            "Partial",
            &[Capability::ShaderDispatch, Capability::GridDispatch],
            1 << 30,
        );
        let subs = [partial, cpu()];
        let d = route(&profiles::bbp_digit(), &subs).expect("CPU still capable");
        assert_eq!(d.substrate.kind, SubstrateKind::Cpu);
    }

    #[test]
    fn rejection_lists_missing_capabilities() {
        let partial = gpu("Partial", &[Capability::ShaderDispatch], 1 << 30);
        let missing = profiles::bbp_digit_gpu().missing_on(&partial);
        assert!(missing.contains(&Capability::BlockReduce));
        assert!(!missing.contains(&Capability::ShaderDispatch));
        let reason = profiles::bbp_digit_gpu()
            .rejection(&partial)
            .expect("rejected");
        assert!(reason.starts_with("lacks [f32, grid"), "{reason}");
    }

    #[test]
    fn no_route_without_substrates() {
        assert!(route(&profiles::bbp_digit(), &[]).is_none());
    }
}
