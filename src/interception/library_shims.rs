// src/interception/library_shims.rs
//! Host symbols each component family stands in for
//!
//! A [`ShimPlan`] is plain data: which `module.Symbol` locations in the host
//! framework should receive which accelerated component. It never touches
//! the host; [`SubstitutionTable`](super::SubstitutionTable) applies it.

use crate::backend::{CapabilityState, Component};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Fully qualified host symbol (`module.name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolPath {
    pub module: String,
    pub name: String,
}

impl SymbolPath {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Split `a.b.C` into module `a.b` and name `C`
    pub fn parse(full: &str) -> Option<Self> {
        let (module, name) = full.rsplit_once('.')?;
        if module.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(module, name))
    }
}

impl fmt::Display for SymbolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// One planned substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimTarget {
    pub path: SymbolPath,
    pub component: Component,
}

const DEFAULT_TARGETS: &[(&str, &str, Component)] = &[
    ("crewai.memory.storage.rag_storage", "RAGStorage", Component::Memory),
    ("crewai.memory.short_term.short_term_memory", "ShortTermMemory", Component::Memory),
    ("crewai.memory.memory", "Memory", Component::Memory),
    ("crewai.memory.long_term.long_term_memory", "LongTermMemory", Component::Memory),
    ("crewai.memory.entity.entity_memory", "EntityMemory", Component::Memory),
    ("crewai.tools.structured_tool", "CrewStructuredTool", Component::Tools),
    ("crewai.tools.base_tool", "BaseTool", Component::Tools),
    ("crewai.task", "Task", Component::Tasks),
    ("crewai.crews.crew", "Crew", Component::Tasks),
    ("crewai.memory.storage.ltm_sqlite_storage", "LTMSQLiteStorage", Component::Database),
    (
        "crewai.memory.storage.kickoff_task_outputs_storage",
        "KickoffTaskOutputsSQLiteStorage",
        Component::Database,
    ),
    ("crewai.events.types.memory_events", "MemoryQueryStartedEvent", Component::Serialization),
    ("crewai.events.types.agent_events", "AgentExecutionStartedEvent", Component::Serialization),
];

/// Ordered list of substitutions to install
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShimPlan {
    targets: Vec<ShimTarget>,
}

impl ShimPlan {
    /// Empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Every known host symbol, grouped by family in a fixed order
    pub fn standard() -> Self {
        let targets = DEFAULT_TARGETS
            .iter()
            .map(|(module, name, component)| ShimTarget {
                path: SymbolPath::new(*module, *name),
                component: *component,
            })
            .collect();
        Self { targets }
    }

    /// Standard plan restricted to the families that should be substituted
    /// under `state`: a family explicitly turned off is left alone, and
    /// nothing is planned when acceleration is disabled with no overrides.
    pub fn for_state(state: &CapabilityState) -> Self {
        let families: BTreeSet<Component> = Component::ALL
            .iter()
            .copied()
            .filter(|c| match state.per_component_override.get(c) {
                Some(&forced) => forced,
                None => state.enabled,
            })
            .collect();
        debug!("Shim plan covers {} component families", families.len());
        Self::standard().only(&families)
    }

    /// Keep only targets of the given families
    pub fn only(mut self, families: &BTreeSet<Component>) -> Self {
        self.targets.retain(|t| families.contains(&t.component));
        self
    }

    /// Add a custom target
    pub fn with_target(mut self, path: SymbolPath, component: Component) -> Self {
        self.targets.push(ShimTarget { path, component });
        self
    }

    pub fn targets(&self) -> &[ShimTarget] {
        &self.targets
    }

    pub fn targets_for(&self, component: Component) -> impl Iterator<Item = &ShimTarget> {
        self.targets.iter().filter(move |t| t.component == component)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
