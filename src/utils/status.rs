// src/utils/status.rs
//! Acceleration status and runtime reconfiguration

use crate::backend::{global_resolver, Backend, BackendResolver, CapabilityState, Component};
use crate::utils::config::ENV_PREFIX;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Snapshot of what every component would run on if built now
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub native_available: bool,
    pub enabled: bool,
    pub components: BTreeMap<Component, Backend>,
}

impl StatusReport {
    pub fn collect(resolver: &BackendResolver) -> Self {
        let state = resolver.state();
        Self {
            native_available: state.native_available,
            enabled: state.enabled,
            components: Component::ALL
                .iter()
                .map(|c| (*c, state.resolve(*c)))
                .collect(),
        }
    }

    /// `"disabled"` when the master switch is off, otherwise `"native"` if
    /// any component runs natively and `"fallback"` if none does
    pub fn summary(&self) -> &'static str {
        if !self.enabled {
            "disabled"
        } else if self.components.values().any(Backend::is_native) {
            "native"
        } else {
            "fallback"
        }
    }
}

/// True when the native backend probed fine and acceleration is enabled
pub fn is_acceleration_available() -> bool {
    let state = global_resolver().state();
    state.native_available && state.enabled
}

pub fn acceleration_status() -> String {
    StatusReport::collect(global_resolver()).summary().to_string()
}

pub fn component_status() -> BTreeMap<Component, Backend> {
    StatusReport::collect(global_resolver()).components
}

/// Every configuration variable mapped to its value, or `"not set"`
pub fn environment_info() -> BTreeMap<String, String> {
    environment_info_from(|name| std::env::var(name).ok())
}

fn environment_info_from(lookup: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
    std::iter::once(format!("{}_ENABLED", ENV_PREFIX))
        .chain(Component::ALL.iter().map(Component::env_var))
        .map(|name| {
            let value = lookup(&name).unwrap_or_else(|| "not set".to_string());
            (name, value)
        })
        .collect()
}

/// Replace per-component overrides on `resolver`; `None` clears one.
/// Components built afterwards see the new state, existing ones keep theirs.
pub fn configure_components_on(
    resolver: &BackendResolver,
    overrides: &[(Component, Option<bool>)],
) -> Arc<CapabilityState> {
    resolver.update_config(|config| {
        for (component, value) in overrides {
            config.set_override(*component, *value);
        }
    })
}

/// [`configure_components_on`] for the process-wide resolver
pub fn configure_components(overrides: &[(Component, Option<bool>)]) -> Arc<CapabilityState> {
    configure_components_on(global_resolver(), overrides)
}
