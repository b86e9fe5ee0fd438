#![allow(dead_code)]

use std::collections::BTreeMap;

use foreman_core::{
    Action, ActionFactory, ActionFault, ActionRegistry, ActionResult, ActionStatus, BuildError,
    ResourceSet, Task, TickContext,
};
use foreman_kernel::{FailureRecord, FailureTracker};

/// World whose only state is how many more times each kind should fail.
#[derive(Debug, Default)]
pub struct FlakyWorld {
    pub failures_left: BTreeMap<String, u32>,
    pub ticks: u32,
}

impl FlakyWorld {
    pub fn failing(kind: &str, times: u32) -> Self {
        let mut world = Self::default();
        world.failures_left.insert(kind.to_string(), times);
        world
    }
}

/// `craft` needs an `item` param; `follow` never finishes; everything else
/// fails while the world says so and then succeeds.
pub struct FlakyAction {
    kind: String,
    resources: ResourceSet,
    item: Option<String>,
}

impl Action<FlakyWorld> for FlakyAction {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn resources(&self) -> ResourceSet {
        self.resources
    }

    fn start(&mut self, _ctx: &TickContext, _world: &mut FlakyWorld) -> ActionStatus {
        if self.kind == "craft" && self.item.is_none() {
            return ActionResult::invalid("missing item").into();
        }
        ActionStatus::Running
    }

    fn tick(
        &mut self,
        _ctx: &TickContext,
        world: &mut FlakyWorld,
    ) -> Result<ActionStatus, ActionFault> {
        world.ticks += 1;
        if self.kind == "follow" {
            return Ok(ActionStatus::Running);
        }
        match world.failures_left.get_mut(&self.kind) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Ok(ActionResult::failure("no tool").into())
            }
            _ => Ok(ActionResult::success(format!("{} done", self.kind)).into()),
        }
    }
}

pub struct FlakyFactory {
    registry: ActionRegistry,
}

impl Default for FlakyFactory {
    fn default() -> Self {
        Self {
            registry: ActionRegistry::with_builtin(),
        }
    }
}

impl ActionFactory<FlakyWorld> for FlakyFactory {
    fn build(&self, task: &Task) -> Result<Box<dyn Action<FlakyWorld>>, BuildError> {
        let resources = self.registry.resources_for(&task.kind)?;
        Ok(Box::new(FlakyAction {
            kind: task.kind.clone(),
            resources,
            item: task.param("item").map(str::to_string),
        }))
    }
}

pub fn ctx(tick: u64) -> TickContext {
    TickContext::at_rate(tick, 20)
}

/// In-memory tracker holding one record per entry of `actions`, all with `error`.
pub fn tracker_with(actions: &[&str], error: &str) -> FailureTracker {
    let mut tracker = FailureTracker::new("test", 500);
    for action in actions {
        tracker.record(FailureRecord::new(*action, error));
    }
    tracker
}

pub fn repeat<'a>(action: &'a str, times: usize) -> Vec<&'a str> {
    vec![action; times]
}
