#![allow(dead_code)]

use foreman_core::{
    Action, ActionFault, ActionResult, ActionScheduler, ActionStatus, FinishedAction, ResourceSet,
    ResourceTag, TickContext,
};

#[derive(Debug, Default)]
pub struct RecordingWorld {
    pub started: Vec<&'static str>,
    pub ticked: Vec<&'static str>,
    pub canceled: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Complete successfully on the nth tick.
    SucceedAfter(u32),
    /// Fail with a retryable error on the nth tick.
    FailAfter(u32),
    /// Never complete on its own.
    Forever,
    /// Return an error from the nth tick.
    FaultAfter(u32),
    /// Panic on the nth tick.
    PanicAfter(u32),
    /// Reject in `start`.
    RejectOnStart,
    /// Finish successfully in `start`.
    SucceedOnStart,
}

pub struct ScriptedAction {
    pub name: &'static str,
    pub kind: &'static str,
    pub resources: ResourceSet,
    pub script: Script,
    ticks: u32,
}

impl ScriptedAction {
    pub fn new(name: &'static str, resources: &[ResourceTag], script: Script) -> Self {
        Self {
            name,
            kind: name,
            resources: ResourceSet::of(resources),
            script,
            ticks: 0,
        }
    }

    pub fn boxed(
        name: &'static str,
        resources: &[ResourceTag],
        script: Script,
    ) -> Box<dyn Action<RecordingWorld>> {
        Box::new(Self::new(name, resources, script))
    }
}

impl Action<RecordingWorld> for ScriptedAction {
    fn kind(&self) -> &str {
        self.kind
    }

    fn resources(&self) -> ResourceSet {
        self.resources
    }

    fn describe(&self) -> String {
        format!("{} action", self.name)
    }

    fn start(&mut self, _ctx: &TickContext, world: &mut RecordingWorld) -> ActionStatus {
        world.started.push(self.name);
        match self.script {
            Script::RejectOnStart => ActionResult::invalid("missing parameter").into(),
            Script::SucceedOnStart => {
                ActionResult::success(format!("{} done at start", self.name)).into()
            }
            _ => ActionStatus::Running,
        }
    }

    fn tick(
        &mut self,
        _ctx: &TickContext,
        world: &mut RecordingWorld,
    ) -> Result<ActionStatus, ActionFault> {
        world.ticked.push(self.name);
        self.ticks += 1;
        match self.script {
            Script::SucceedAfter(n) if self.ticks >= n => {
                Ok(ActionResult::success(format!("{} done", self.name)).into())
            }
            Script::FailAfter(n) if self.ticks >= n => {
                Ok(ActionResult::failure(format!("{} failed", self.name)).into())
            }
            Script::FaultAfter(n) if self.ticks >= n => {
                Err(ActionFault::new(format!("{} blew up", self.name)))
            }
            Script::PanicAfter(n) if self.ticks >= n => panic!("{} panicked", self.name),
            _ => Ok(ActionStatus::Running),
        }
    }

    fn cancel(&mut self, world: &mut RecordingWorld) {
        world.canceled.push(self.name);
    }
}

pub fn ctx(tick: u64) -> TickContext {
    TickContext::at_rate(tick, 20)
}

/// Run `rounds` ticks starting at `*tick`, collecting everything that finished.
pub fn run(
    scheduler: &mut ActionScheduler<RecordingWorld>,
    world: &mut RecordingWorld,
    tick: &mut u64,
    rounds: u64,
) -> Vec<FinishedAction> {
    let mut finished = Vec::new();
    for _ in 0..rounds {
        finished.extend(scheduler.tick(&ctx(*tick), world));
        assert_lock_invariant(scheduler);
        *tick += 1;
    }
    finished
}

/// Every lock holder is in the running set and no tag is held twice.
pub fn assert_lock_invariant(scheduler: &ActionScheduler<RecordingWorld>) {
    let running = scheduler.running_ids();
    let mut seen = ResourceSet::EMPTY;
    for (tag, holder) in scheduler.locks().holders() {
        assert!(!seen.contains(tag), "tag {tag} held twice");
        seen.insert(tag);
        assert!(
            running.contains(&holder),
            "lock holder {holder} for {tag} is not running"
        );
    }
}
