// src/observability/mod.rs
//! Logging and metrics setup
//!
//! The library only emits `tracing` events and `metrics` measurements; the
//! embedding process decides whether to install a subscriber or recorder.
//!
//! # Metrics
//!
//! | name                                   | kind      | labels                 |
//! |----------------------------------------|-----------|------------------------|
//! | `accelerate_backend_resolutions_total` | counter   | `component`, `backend` |
//! | `accelerate_tasks_total`               | counter   | `outcome`              |
//! | `accelerate_tool_calls_total`          | counter   | `outcome`              |
//! | `accelerate_pool_wait_seconds`         | histogram |                        |
//! | `accelerate_pool_exhausted_total`      | counter   |                        |
//! | `accelerate_codec_failures_total`      | counter   |                        |

use crate::utils::config::{LogFormat, LoggingConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber. `RUST_LOG` wins over
/// `config.filter`. Returns `Ok(false)` when a subscriber was already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| EngineError::ConfigError(format!("logging.filter: {}", e)))?;

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
            .is_ok(),
    };

    Ok(installed)
}

/// Install a Prometheus recorder (no HTTP listener) and return the handle
/// used to render snapshots.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EngineError::ConfigError(format!("metrics recorder: {}", e)))
}
