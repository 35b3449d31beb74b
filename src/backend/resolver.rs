// src/backend/resolver.rs
//! Process-wide capability state and backend resolution
//!
//! The state is read on every component construction and written only by an
//! explicit reconfiguration, so it lives behind a read-mostly lock holding an
//! `Arc<CapabilityState>`. Writers take one mutex, update the configuration,
//! build a complete new state and swap the `Arc` before releasing it, so the
//! stored configuration and state always describe each other. Readers clone
//! the `Arc` and never observe a half-updated state.

use crate::backend::{Backend, Component};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Probe deciding whether the native backend can run in this process
pub type NativeProbe = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Immutable snapshot of what the process can run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityState {
    /// Outcome of the native probe
    pub native_available: bool,

    /// Master switch from configuration
    pub enabled: bool,

    /// Per-component overrides (absent = unset)
    pub per_component_override: BTreeMap<Component, bool>,
}

impl CapabilityState {
    /// Apply the resolution order to one component
    pub fn resolve(&self, component: Component) -> Backend {
        if let Some(&forced) = self.per_component_override.get(&component) {
            return if forced { Backend::Native } else { Backend::Fallback };
        }
        if self.enabled && self.native_available {
            Backend::Native
        } else {
            Backend::Fallback
        }
    }
}

/// Backend resolver
pub struct BackendResolver {
    probe: NativeProbe,
    config: RwLock<EngineConfig>,
    state: RwLock<Option<Arc<CapabilityState>>>,
    /// Held for the whole of every configuration or state write
    writer: Mutex<()>,
    probe_runs: AtomicUsize,
}

impl BackendResolver {
    /// Create a resolver using the default native probe
    pub fn new(config: EngineConfig) -> Self {
        Self::with_probe(config, Arc::new(default_probe))
    }

    /// Create a resolver with a custom probe
    pub fn with_probe(config: EngineConfig, probe: NativeProbe) -> Self {
        Self {
            probe,
            config: RwLock::new(config),
            state: RwLock::new(None),
            writer: Mutex::new(()),
            probe_runs: AtomicUsize::new(0),
        }
    }

    /// Resolver whose native probe always fails
    pub fn fallback_only(config: EngineConfig) -> Self {
        Self::with_probe(
            config,
            Arc::new(|| -> Result<()> {
                Err(EngineError::BackendUnavailable(
                    "native backend disabled".to_string(),
                ))
            }),
        )
    }

    /// Resolve the backend for a component
    pub fn resolve(&self, component: Component) -> Backend {
        let backend = self.state().resolve(component);
        metrics::counter!(
            "accelerate_backend_resolutions_total",
            "component" => component.as_str(),
            "backend" => backend.as_str()
        )
        .increment(1);
        debug!("Resolved {} -> {}", component, backend);
        backend
    }

    /// Current capability snapshot, probing on first use
    pub fn state(&self) -> Arc<CapabilityState> {
        if let Some(state) = self.state.read().as_ref() {
            return Arc::clone(state);
        }

        let _writer = self.writer.lock();
        let mut slot = self.state.write();
        if let Some(state) = slot.as_ref() {
            return Arc::clone(state);
        }

        let native_available = self.run_probe();
        let state = Arc::new(self.build_state(native_available));
        *slot = Some(Arc::clone(&state));
        state
    }

    /// Re-run the probe and replace the whole state
    pub fn reconfigure(&self) -> Arc<CapabilityState> {
        let _writer = self.writer.lock();
        let native_available = self.run_probe();
        let state = Arc::new(self.build_state(native_available));
        *self.state.write() = Some(Arc::clone(&state));
        info!(
            "Backend state reconfigured (native available: {})",
            native_available
        );
        state
    }

    /// Replace the configuration (overrides, master switch) and rebuild the
    /// state. The probe result is kept when one exists.
    pub fn reconfigure_with(&self, config: EngineConfig) -> Arc<CapabilityState> {
        self.update_config(|current| *current = config)
    }

    /// Edit the configuration in place and rebuild the state, as one write.
    /// Concurrent edits are applied one after another, never lost.
    pub fn update_config(&self, edit: impl FnOnce(&mut EngineConfig)) -> Arc<CapabilityState> {
        let _writer = self.writer.lock();
        edit(&mut *self.config.write());

        let previous = self.state.read().as_ref().map(|s| s.native_available);
        let native_available = match previous {
            Some(available) => available,
            None => self.run_probe(),
        };

        let state = Arc::new(self.build_state(native_available));
        *self.state.write() = Some(Arc::clone(&state));
        state
    }

    /// Snapshot of the configuration in use
    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Number of times the probe has run
    pub fn probe_runs(&self) -> usize {
        self.probe_runs.load(Ordering::SeqCst)
    }

    fn build_state(&self, native_available: bool) -> CapabilityState {
        let config = self.config.read();
        let per_component_override = Component::ALL
            .iter()
            .filter_map(|c| config.override_for(*c).map(|v| (*c, v)))
            .collect();

        CapabilityState {
            native_available,
            enabled: config.enabled,
            per_component_override,
        }
    }

    /// Probe failures and panics both downgrade to fallback
    fn run_probe(&self) -> bool {
        self.probe_runs.fetch_add(1, Ordering::SeqCst);
        let probe = Arc::clone(&self.probe);

        match panic::catch_unwind(AssertUnwindSafe(|| probe())) {
            Ok(Ok(())) => {
                debug!("Native backend probe succeeded");
                true
            }
            Ok(Err(e)) => {
                warn!("Native backend unavailable, using fallback: {}", e);
                false
            }
            Err(_) => {
                warn!("Native backend probe panicked, using fallback");
                false
            }
        }
    }
}

/// Checks the facilities the native implementations rely on
pub fn default_probe() -> Result<()> {
    if !cfg!(feature = "native") {
        return Err(EngineError::BackendUnavailable(
            "crate built without the `native` feature".to_string(),
        ));
    }

    std::thread::available_parallelism()
        .map_err(|e| EngineError::BackendUnavailable(format!("parallelism unknown: {}", e)))?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .map_err(|e| EngineError::BackendUnavailable(format!("tokio runtime: {}", e)))?
        .shutdown_background();

    rusqlite::Connection::open_in_memory()
        .and_then(|conn| {
            conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
        })
        .map_err(|e| EngineError::BackendUnavailable(format!("sqlite: {}", e)))?;

    Ok(())
}

static GLOBAL_RESOLVER: Lazy<BackendResolver> = Lazy::new(|| {
    let config = EngineConfig::load().unwrap_or_else(|e| {
        warn!("Invalid configuration, using defaults: {}", e);
        EngineConfig::default()
    });
    BackendResolver::new(config)
});

/// Process-wide resolver used by the `new` constructors
pub fn global_resolver() -> &'static BackendResolver {
    &GLOBAL_RESOLVER
}
