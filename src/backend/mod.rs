// src/backend/mod.rs
//! Backend selection
//!
//! Every component runs on one of two interchangeable implementations:
//!
//! - **Native**: the high-performance variant (tokio worker pool, indexed
//!   memory, WAL-mode pooled SQLite, typed serde codec)
//! - **Fallback**: the portable variant (std threads, linear scans, default
//!   SQLite pragmas, dynamic JSON codec)
//!
//! Both variants produce identical observable results. The choice is made
//! once, at component construction, by the [`BackendResolver`].
//!
//! # Resolution order
//!
//! ```text
//! per-component override ──set──▶ that backend
//!          │ unset
//!          ▼
//! master switch off ─────────────▶ Fallback
//!          │ on
//!          ▼
//! native probe ok ───────────────▶ Native
//!          │ failed / panicked
//!          ▼
//!       Fallback
//! ```

pub mod resolver;

use serde::{Deserialize, Serialize};

pub use resolver::{global_resolver, BackendResolver, CapabilityState, NativeProbe};

/// Implementation variant backing a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Native,
    Fallback,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Native => "native",
            Backend::Fallback => "fallback",
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Backend::Native)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component families that can be switched independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Memory,
    Tools,
    Tasks,
    Serialization,
    Database,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Memory,
        Component::Tools,
        Component::Tasks,
        Component::Serialization,
        Component::Database,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Memory => "memory",
            Component::Tools => "tools",
            Component::Tasks => "tasks",
            Component::Serialization => "serialization",
            Component::Database => "database",
        }
    }

    /// Environment variable holding this component's override
    pub fn env_var(&self) -> String {
        format!(
            "{}_{}",
            crate::utils::config::ENV_PREFIX,
            self.as_str().to_uppercase()
        )
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
