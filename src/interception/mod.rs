// src/interception/mod.rs
//! Host substitution support
//!
//! This module models installing accelerated components into the host
//! framework as a data transform. Components never depend on it.
//!
//! - **Library Shims**: the [`ShimPlan`] of host symbols per component family
//! - **Substitution Table**: applies a plan through a [`SymbolHost`] and
//!   restores the recorded originals
//!
//! # Architecture
//!
//! ```text
//! CapabilityState ─▶ ShimPlan::for_state ─▶ SubstitutionTable::install(host)
//!                                                   │
//!                                                   ▼
//!                                  originals kept until restore(host)
//! ```

pub mod library_shims;
pub mod substitution_table;

// Re-export commonly used types
pub use library_shims::{ShimPlan, ShimTarget, SymbolPath};
pub use substitution_table::{FamilyReport, InstallReport, SubstitutionTable, SymbolHost};
