// src/interception/substitution_table.rs
//! Install and restore host symbol substitutions
//!
//! The host itself is reached only through [`SymbolHost`], implemented by
//! whoever embeds this crate. Installing records each original value;
//! restoring writes every recorded original back, best-effort.
//!
//! ```text
//! install:  host[path] ──save──▶ originals[path]     host[path] ◀── replacement
//! restore:  host[path] ◀──────── originals[path]     (or removed if it was absent)
//! ```

use crate::backend::Component;
use crate::interception::library_shims::{ShimPlan, SymbolPath};
use crate::utils::errors::Result;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Symbol namespace of the host framework
pub trait SymbolHost {
    type Symbol: Clone;

    /// Current value at `path`, if the symbol exists
    fn lookup(&self, path: &SymbolPath) -> Result<Option<Self::Symbol>>;

    fn assign(&mut self, path: &SymbolPath, symbol: Self::Symbol) -> Result<()>;

    /// Delete a symbol that did not exist before installation
    fn remove(&mut self, path: &SymbolPath) -> Result<()>;
}

/// Applied/failed counts for one family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FamilyReport {
    pub applied: usize,
    pub failed: usize,
}

/// Outcome of an installation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub families: BTreeMap<Component, FamilyReport>,
}

impl InstallReport {
    pub fn applied(&self) -> usize {
        self.families.values().map(|r| r.applied).sum()
    }

    pub fn failed(&self) -> usize {
        self.families.values().map(|r| r.failed).sum()
    }

    /// True when at least one substitution went in
    pub fn any_applied(&self) -> bool {
        self.applied() > 0
    }
}

/// Recorded originals, in installation order
#[derive(Debug)]
pub struct SubstitutionTable<S> {
    originals: Vec<(SymbolPath, Option<S>)>,
}

impl<S: Clone> SubstitutionTable<S> {
    /// Apply `plan` to `host`. `replacement` supplies the accelerated symbol
    /// for each family; families it returns `None` for count as failed.
    pub fn install<H, F>(host: &mut H, plan: &ShimPlan, replacement: F) -> (Self, InstallReport)
    where
        H: SymbolHost<Symbol = S>,
        F: Fn(Component) -> Option<S>,
    {
        let mut table = Self {
            originals: Vec::new(),
        };
        let mut report = InstallReport::default();

        for target in plan.targets() {
            let entry = report.families.entry(target.component).or_default();

            let Some(symbol) = replacement(target.component) else {
                entry.failed += 1;
                continue;
            };

            let original = match host.lookup(&target.path) {
                Ok(original) => original,
                Err(e) => {
                    debug!("Cannot read {}: {}", target.path, e);
                    entry.failed += 1;
                    continue;
                }
            };

            match host.assign(&target.path, symbol) {
                Ok(()) => {
                    table.originals.push((target.path.clone(), original));
                    entry.applied += 1;
                }
                Err(e) => {
                    debug!("Cannot substitute {}: {}", target.path, e);
                    entry.failed += 1;
                }
            }
        }

        info!(
            "Installed {} substitutions ({} failed)",
            report.applied(),
            report.failed()
        );
        (table, report)
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    pub fn contains(&self, path: &SymbolPath) -> bool {
        self.originals.iter().any(|(p, _)| p == path)
    }

    /// Put every original back, newest first. Never fails; returns how many
    /// symbols were restored.
    pub fn restore<H>(self, host: &mut H) -> usize
    where
        H: SymbolHost<Symbol = S>,
    {
        let mut restored = 0;
        for (path, original) in self.originals.into_iter().rev() {
            let outcome = match original {
                Some(symbol) => host.assign(&path, symbol),
                None => host.remove(&path),
            };
            match outcome {
                Ok(()) => restored += 1,
                Err(e) => warn!("Could not restore {}: {}", path, e),
            }
        }
        info!("Restored {} original symbols", restored);
        restored
    }
}
