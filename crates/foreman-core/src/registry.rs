//! Declarative action-type profiles.
//!
//! Every action type states its resource set up front; compatibility between
//! two types is derived from that data alone (disjoint sets run together).

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{Action, ResourceSet, ResourceTag, Task};

use ResourceTag::{Combat, Crafting, Inventory, Manipulation, Movement};

/// Built-in action types and the resources they hold while running.
const BUILTIN_PROFILES: &[(&str, &[ResourceTag])] = &[
    ("mine", &[Movement, Manipulation]),
    ("place", &[Movement, Manipulation, Inventory]),
    ("build", &[Movement, Manipulation, Inventory]),
    ("craft", &[Movement, Manipulation, Inventory, Crafting]),
    ("store", &[Movement, Manipulation, Inventory]),
    ("retrieve", &[Movement, Manipulation, Inventory]),
    ("farm", &[Movement, Manipulation, Inventory]),
    ("attack", &[Combat]),
    ("retreat", &[Movement, Combat]),
    ("navigate", &[Movement]),
    ("follow", &[Movement]),
    ("idle", &[]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionProfile {
    pub resources: ResourceSet,
}

impl ActionProfile {
    pub fn compatible_with(&self, other: &ActionProfile) -> bool {
        self.resources.is_disjoint(other.resources)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("unknown action type: {0}")]
    UnknownKind(String),

    #[error("invalid task {kind}: {reason}")]
    InvalidTask { kind: String, reason: String },
}

/// Lookup table from action-type label to [`ActionProfile`].
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    profiles: BTreeMap<String, ActionProfile>,
}

impl ActionRegistry {
    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        for (kind, tags) in BUILTIN_PROFILES {
            registry.register(*kind, ResourceSet::of(tags));
        }
        registry
    }

    /// Add or replace a profile.
    pub fn register(&mut self, kind: impl Into<String>, resources: ResourceSet) {
        self.profiles
            .insert(kind.into(), ActionProfile { resources });
    }

    pub fn profile(&self, kind: &str) -> Result<&ActionProfile, BuildError> {
        self.profiles
            .get(kind)
            .ok_or_else(|| BuildError::UnknownKind(kind.to_string()))
    }

    pub fn resources_for(&self, kind: &str) -> Result<ResourceSet, BuildError> {
        self.profile(kind).map(|p| p.resources)
    }

    /// Whether two known action types may run concurrently.
    pub fn compatible(&self, a: &str, b: &str) -> Result<bool, BuildError> {
        Ok(self.profile(a)?.compatible_with(self.profile(b)?))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.profiles.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Turns planner tasks into runtime actions.
///
/// This is the construction boundary: unknown action types and malformed
/// parameters are rejected here, never by the scheduler.
pub trait ActionFactory<W>: 'static
where
    W: 'static,
{
    fn build(&self, task: &Task) -> Result<Box<dyn Action<W>>, BuildError>;
}
