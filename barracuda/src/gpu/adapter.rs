// SPDX-License-Identifier: AGPL-3.0-only

//! GPU adapter discovery and selection.
//!
//! Runtime capability probing, no hardcoded GPU assumptions. The adapter is
//! picked by `PISPRING_GPU_ADAPTER` when set, otherwise by the substrate the
//! forge routed to, otherwise discrete hardware first.

use crate::error::PiSpringError;

/// Adapter selector: `auto`, an enumeration index, or a name substring.
pub const ADAPTER_ENV: &str = "PISPRING_GPU_ADAPTER";

/// wgpu backend restriction: `vulkan`, `metal`, `dx12` or `gl`.
pub const WGPU_BACKEND_ENV: &str = "PISPRING_WGPU_BACKEND";

/// Map a `PISPRING_WGPU_BACKEND` value to wgpu backends (unknown → all).
#[must_use]
pub fn parse_backends(value: Option<&str>) -> wgpu::Backends {
    match value.map(str::trim) {
        Some("vulkan") => wgpu::Backends::VULKAN,
        Some("metal") => wgpu::Backends::METAL,
        Some("dx12") => wgpu::Backends::DX12,
        Some("gl") => wgpu::Backends::GL,
        _ => wgpu::Backends::all(),
    }
}

fn backends_from_env() -> wgpu::Backends {
    parse_backends(std::env::var(WGPU_BACKEND_ENV).ok().as_deref())
}

/// Create a wgpu instance restricted by `PISPRING_WGPU_BACKEND`.
#[must_use]
pub fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: backends_from_env(),
        ..Default::default()
    })
}

/// Select an adapter.
///
/// `routed` is the forge's adapter index (enumerated over all backends); it
/// is honoured only when neither environment variable narrows the search.
///
/// # Errors
///
/// Returns [`PiSpringError::BackendUnavailable`] if no adapter matches.
pub fn select_adapter(routed: Option<usize>) -> Result<wgpu::Adapter, PiSpringError> {
    let selector = std::env::var(ADAPTER_ENV)
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let backends = backends_from_env();

    let instance = create_instance();
    let adapters: Vec<wgpu::Adapter> = instance.enumerate_adapters(backends);
    if adapters.is_empty() {
        return Err(PiSpringError::BackendUnavailable(
            "no GPU adapter found".into(),
        ));
    }

    if selector.is_empty() || selector == "auto" {
        match routed.filter(|_| backends == wgpu::Backends::all()) {
            Some(idx) if idx < adapters.len() => select_by_index_or_name(adapters, idx, ""),
            _ => auto_select(adapters),
        }
    } else if let Ok(idx) = selector.parse::<usize>() {
        select_by_index_or_name(adapters, idx, &selector)
    } else {
        select_by_name(adapters, &selector)
    }
}

/// Discrete hardware first, then any other non-software adapter.
fn auto_select(adapters: Vec<wgpu::Adapter>) -> Result<wgpu::Adapter, PiSpringError> {
    let mut chosen: Option<wgpu::Adapter> = None;
    let mut fallback: Option<wgpu::Adapter> = None;
    for a in adapters {
        match a.get_info().device_type {
            wgpu::DeviceType::DiscreteGpu if chosen.is_none() => chosen = Some(a),
            wgpu::DeviceType::Cpu => {}
            _ if fallback.is_none() => fallback = Some(a),
            _ => {}
        }
    }
    chosen.or(fallback).ok_or_else(|| {
        PiSpringError::BackendUnavailable("only software adapters found".into())
    })
}

fn select_by_index_or_name(
    adapters: Vec<wgpu::Adapter>,
    idx: usize,
    selector: &str,
) -> Result<wgpu::Adapter, PiSpringError> {
    if idx < adapters.len() {
        adapters.into_iter().nth(idx).ok_or_else(|| {
            PiSpringError::BackendUnavailable(format!("no adapter at index {idx}"))
        })
    } else {
        select_by_name(adapters, selector).map_err(|_| {
            PiSpringError::BackendUnavailable(format!(
                "no adapter matching '{selector}' (tried as index {idx} and name)"
            ))
        })
    }
}

fn select_by_name(
    adapters: Vec<wgpu::Adapter>,
    selector: &str,
) -> Result<wgpu::Adapter, PiSpringError> {
    adapters
        .into_iter()
        .find(|a| a.get_info().name.to_ascii_lowercase().contains(selector))
        .ok_or_else(|| {
            PiSpringError::BackendUnavailable(format!("no adapter matching '{selector}'"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_map_to_wgpu_backends() {
        assert_eq!(parse_backends(Some("vulkan")), wgpu::Backends::VULKAN);
        assert_eq!(parse_backends(Some("metal")), wgpu::Backends::METAL);
        assert_eq!(parse_backends(Some("dx12")), wgpu::Backends::DX12);
        assert_eq!(parse_backends(Some(" gl ")), wgpu::Backends::GL);
    }

    #[test]
    fn unknown_backend_means_all() {
        assert_eq!(parse_backends(None), wgpu::Backends::all());
        assert_eq!(parse_backends(Some("opencl")), wgpu::Backends::all());
    }
}
