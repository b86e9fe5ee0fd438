//! Resource tags and the all-or-nothing lock table.

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ActionId;

/// A contention domain. Two actions conflict iff they share a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ResourceTag {
    /// Pathfinding and body movement.
    Movement,
    /// Breaking, placing and using blocks or containers.
    Manipulation,
    /// Adding and removing inventory items.
    Inventory,
    /// Attacking and defending.
    Combat,
    /// Crafting table operations.
    Crafting,
}

impl ResourceTag {
    pub const ALL: [ResourceTag; 5] = [
        ResourceTag::Movement,
        ResourceTag::Manipulation,
        ResourceTag::Inventory,
        ResourceTag::Combat,
        ResourceTag::Crafting,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Movement => "movement",
            Self::Manipulation => "manipulation",
            Self::Inventory => "inventory",
            Self::Combat => "combat",
            Self::Crafting => "crafting",
        }
    }
}

impl fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Small copyable set of [`ResourceTag`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResourceSet(u8);

impl ResourceSet {
    pub const EMPTY: ResourceSet = ResourceSet(0);

    pub fn of(tags: &[ResourceTag]) -> Self {
        tags.iter().fold(Self::EMPTY, |set, &tag| set.with(tag))
    }

    pub fn with(mut self, tag: ResourceTag) -> Self {
        self.insert(tag);
        self
    }

    pub fn insert(&mut self, tag: ResourceTag) {
        self.0 |= tag.bit();
    }

    pub fn contains(self, tag: ResourceTag) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_disjoint(self, other: ResourceSet) -> bool {
        self.0 & other.0 == 0
    }

    pub fn intersection(self, other: ResourceSet) -> ResourceSet {
        ResourceSet(self.0 & other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = ResourceTag> {
        ResourceTag::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

impl FromIterator<ResourceTag> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = ResourceTag>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, |set, tag| set.with(tag))
    }
}

impl fmt::Display for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, tag) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(tag.name())?;
        }
        f.write_str("}")
    }
}

#[cfg(feature = "serde")]
impl Serialize for ResourceSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for ResourceSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tags = Vec::<ResourceTag>::deserialize(deserializer)?;
        Ok(tags.into_iter().collect())
    }
}

/// Returned by [`ResourceLock::try_acquire`] when a tag is held by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("resource {tag} is held by action {holder}")]
pub struct LockConflict {
    pub tag: ResourceTag,
    pub holder: ActionId,
}

/// Exclusive-holder table from tag to action.
///
/// Acquisition is all-or-nothing: a failed `try_acquire` leaves the table
/// untouched, so two actions can never each hold a subset of what the other
/// needs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceLock {
    locks: BTreeMap<ResourceTag, ActionId>,
    held: BTreeMap<ActionId, ResourceSet>,
}

impl ResourceLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&mut self, action: ActionId, tags: ResourceSet) -> Result<(), LockConflict> {
        for tag in tags.iter() {
            if let Some(&holder) = self.locks.get(&tag) {
                if holder != action {
                    return Err(LockConflict { tag, holder });
                }
            }
        }

        for tag in tags.iter() {
            self.locks.insert(tag, action);
        }
        let entry = self.held.entry(action).or_default();
        for tag in tags.iter() {
            entry.insert(tag);
        }

        Ok(())
    }

    /// Release everything `action` holds according to its bookkeeping.
    pub fn release(&mut self, action: ActionId) {
        let Some(tags) = self.held.remove(&action) else {
            return;
        };
        for tag in tags.iter() {
            if self.locks.get(&tag) == Some(&action) {
                self.locks.remove(&tag);
            }
        }
    }

    /// Release used on preemption and cancellation.
    ///
    /// Also sweeps the table for entries naming `action` that the per-action
    /// bookkeeping lost track of.
    pub fn force_release(&mut self, action: ActionId) {
        self.release(action);
        self.locks.retain(|_, holder| *holder != action);
    }

    pub fn is_locked(&self, tag: ResourceTag) -> bool {
        self.locks.contains_key(&tag)
    }

    pub fn holder_of(&self, tag: ResourceTag) -> Option<ActionId> {
        self.locks.get(&tag).copied()
    }

    pub fn holds_locks(&self, action: ActionId) -> bool {
        self.locks.values().any(|holder| *holder == action)
    }

    pub fn locked_by(&self, action: ActionId) -> ResourceSet {
        self.locks
            .iter()
            .filter(|(_, holder)| **holder == action)
            .map(|(tag, _)| *tag)
            .collect()
    }

    pub fn locked_resources(&self) -> ResourceSet {
        self.locks.keys().copied().collect()
    }

    /// Every `(tag, holder)` pair, in tag order.
    pub fn holders(&self) -> impl Iterator<Item = (ResourceTag, ActionId)> + '_ {
        self.locks.iter().map(|(tag, holder)| (*tag, *holder))
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn clear(&mut self) {
        self.locks.clear();
        self.held.clear();
    }
}
