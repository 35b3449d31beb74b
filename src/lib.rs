// src/lib.rs
//! CrewAI Accelerate Library
//!
//! Drop-in replacements for an agent framework's memory store, tool
//! executor, task executor, message codec and SQLite storage. Each
//! component runs on a native backend or a portable fallback with
//! identical observable behavior.
//!
//! # Architecture
//!
//! The library is structured into several key modules:
//!
//! - **backend**: native probe, per-component overrides, backend resolution
//! - **runtime**: worker pools, task executor, tool executor and tools
//! - **memory**: in-process memory store with relevance search
//! - **storage**: pooled SQLite wrapper and long-term memory table
//! - **serialization**: canonical message codec
//! - **interception**: host symbol substitution plan and table
//! - **observability**: tracing subscriber and Prometheus recorder setup
//! - **utils**: configuration, errors, status helpers
//!
//! # Example
//!
//! ```no_run
//! use crewai_accelerate::{AcceleratedTaskExecutor, TaskDescriptor};
//!
//! let executor = AcceleratedTaskExecutor::new()?;
//! let results = executor.execute_concurrent_tasks(vec![
//!     TaskDescriptor::new("research").with_field("description", "find sources"),
//!     TaskDescriptor::new("write"),
//! ]);
//! assert_eq!(results.len(), 2);
//! println!("running on {}", executor.implementation());
//! # Ok::<(), crewai_accelerate::EngineError>(())
//! ```

// Public module exports
pub mod backend;
pub mod interception;
pub mod memory;
pub mod observability;
pub mod runtime;
pub mod serialization;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use backend::{global_resolver, Backend, BackendResolver, CapabilityState, Component};
pub use memory::{AcceleratedMemoryStorage, MemoryRecord, Metadata};
pub use runtime::{
    AcceleratedTaskExecutor, AcceleratedToolExecutor, TaskDescriptor, TaskResult, ToolLimits,
};
pub use serialization::{Message, MessageCodec};
pub use storage::{AcceleratedSqliteWrapper, PoolConfig};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, ErrorKind, Result};
pub use utils::status::{
    acceleration_status, component_status, configure_components, environment_info,
    is_acceleration_available,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Library build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
    pub native_feature: bool,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
            native_feature: cfg!(feature = "native"),
        }
    }
}
