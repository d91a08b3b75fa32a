// SPDX-License-Identifier: AGPL-3.0-only

//! Hardware probing — GPUs via wgpu, the CPU via procfs.
//!
//! Adapters are enumerated over `Backends::all()` so that a substrate's
//! `adapter_index` can be handed straight back to the GPU backend.

use crate::substrate::{Capability, GridLimits, Identity, Substrate, SubstrateKind};
use std::fs;

/// Capabilities every compute-capable wgpu adapter offers.
const GPU_BASE: [Capability; 5] = [
    Capability::F32Compute,
    Capability::ShaderDispatch,
    Capability::GridDispatch,
    Capability::BlockReduce,
    Capability::HostReadback,
];

/// Capabilities of the native CPU path.
const CPU_BASE: [Capability; 5] = [
    Capability::F64Compute,
    Capability::F32Compute,
    Capability::GridDispatch,
    Capability::BlockReduce,
    Capability::HostReadback,
];

/// Every hardware GPU adapter wgpu can see.
///
/// Software rasterizers (`DeviceType::Cpu`) are skipped; the CPU substrate
/// covers that hardware natively.
#[must_use]
pub fn probe_gpus() -> Vec<Substrate> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .enumerate()
        .filter_map(|(idx, adapter)| {
            let info = adapter.get_info();
            if info.device_type == wgpu::DeviceType::Cpu {
                tracing::debug!(adapter = %info.name, "skipping software adapter");
                return None;
            }
            let gpu = gpu_substrate(idx, &info, adapter.features(), &adapter.limits());
            tracing::debug!(
                adapter = %info.name,
                backend = ?info.backend,
                max_side = ?gpu.limits.max_square_side(),
                "probed GPU adapter"
            );
            Some(gpu)
        })
        .collect()
}

/// Describe adapter `idx` from what wgpu reports about it.
#[must_use]
pub fn gpu_substrate(
    idx: usize,
    info: &wgpu::AdapterInfo,
    features: wgpu::Features,
    limits: &wgpu::Limits,
) -> Substrate {
    let has_f64 = features.contains(wgpu::Features::SHADER_F64);
    let mut capabilities = GPU_BASE.to_vec();
    if has_f64 {
        capabilities.push(Capability::F64Compute);
    }
    let driver = match (info.driver.is_empty(), info.driver_info.is_empty()) {
        (true, true) => None,
        (false, true) => Some(info.driver.clone()),
        (true, false) => Some(info.driver_info.clone()),
        (false, false) => Some(format!("{} ({})", info.driver, info.driver_info)),
    };

    Substrate {
        kind: SubstrateKind::Gpu,
        identity: Identity {
            name: info.name.clone(),
            driver,
            backend: Some(format!("{:?}", info.backend)),
            adapter_index: Some(idx),
        },
        limits: GridLimits {
            max_binding_bytes: Some(
                u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size),
            ),
            max_workgroups: Some(limits.max_compute_workgroups_per_dimension),
            has_f64,
            ..GridLimits::default()
        },
        capabilities,
    }
}

/// The host CPU, always present.
#[must_use]
pub fn probe_cpu() -> Substrate {
    let info = fs::read_to_string("/proc/cpuinfo")
        .map(|text| CpuInfo::parse(&text))
        .unwrap_or_default();
    let memory_bytes = fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|text| mem_total_bytes(&text));
    let workers = info.logical_threads.or_else(|| {
        std::thread::available_parallelism()
            .ok()
            .and_then(|n| u32::try_from(n.get()).ok())
    });

    Substrate {
        kind: SubstrateKind::Cpu,
        identity: Identity::named(info.model.unwrap_or_else(|| "Unknown CPU".to_string())),
        limits: GridLimits {
            memory_bytes,
            workers,
            has_f64: true,
            ..GridLimits::default()
        },
        capabilities: CPU_BASE.to_vec(),
    }
}

/// The fields of `/proc/cpuinfo` the CPU substrate reports.
#[derive(Debug, Default, PartialEq, Eq)]
struct CpuInfo {
    model: Option<String>,
    logical_threads: Option<u32>,
}

impl CpuInfo {
    /// First `model name`; logical threads from `siblings`, else a count of
    /// `processor` entries.
    fn parse(text: &str) -> Self {
        let mut info = Self::default();
        let mut processors = 0u32;
        for (key, val) in text
            .lines()
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim(), v.trim()))
        {
            match key {
                "processor" => processors += 1,
                "model name" if info.model.is_none() => info.model = Some(val.to_string()),
                "siblings" if info.logical_threads.is_none() => {
                    info.logical_threads = val.parse().ok();
                }
                _ => {}
            }
        }
        if info.logical_threads.is_none() && processors > 0 {
            info.logical_threads = Some(processors);
        }
        info
    }
}

/// `MemTotal` from `/proc/meminfo`, in bytes.
fn mem_total_bytes(text: &str) -> Option<u64> {
    let kb = text
        .lines()
        .find_map(|l| l.strip_prefix("MemTotal:"))?
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(kb * 1024)
}
