//! A toy block world and actions for `foreman run`.

use std::collections::BTreeMap;
use std::str::FromStr;

use foreman_core::{
    Action, ActionFactory, ActionFault, ActionPriority, ActionRegistry, ActionResult,
    ActionStatus, BuildError, ResourceSet, Task, TickBudget, TickContext,
};

/// Recipes: item -> (ingredients, output count).
const RECIPES: &[(&str, &[(&str, u32)], u32)] = &[
    ("planks", &[("log", 1)], 4),
    ("stick", &[("planks", 2)], 4),
    ("wooden_pickaxe", &[("planks", 3), ("stick", 2)], 1),
    ("stone_pickaxe", &[("stone", 3), ("stick", 2)], 1),
];

/// Tool needed to mine a block, if any.
fn required_tool(block: &str) -> Option<&'static str> {
    match block {
        "stone" => Some("wooden_pickaxe"),
        "iron_ore" => Some("stone_pickaxe"),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct DemoWorld {
    pub position: (i32, i32),
    pub inventory: BTreeMap<String, u32>,
    pub hostiles: u32,
}

impl DemoWorld {
    pub fn has(&self, item: &str, count: u32) -> bool {
        self.inventory.get(item).copied().unwrap_or(0) >= count
    }

    pub fn add(&mut self, item: &str, count: u32) {
        *self.inventory.entry(item.to_string()).or_default() += count;
    }

    fn take(&mut self, item: &str, count: u32) {
        if let Some(have) = self.inventory.get_mut(item) {
            *have = have.saturating_sub(count);
            if *have == 0 {
                self.inventory.remove(item);
            }
        }
    }
}

struct MineAction {
    resources: ResourceSet,
    block: String,
    remaining: u32,
    progress: u32,
    budget: TickBudget,
}

impl Action<DemoWorld> for MineAction {
    fn kind(&self) -> &str {
        "mine"
    }

    fn resources(&self) -> ResourceSet {
        self.resources
    }

    fn describe(&self) -> String {
        format!("mine {} x{}", self.block, self.remaining)
    }

    fn start(&mut self, _ctx: &TickContext, world: &mut DemoWorld) -> ActionStatus {
        match required_tool(&self.block) {
            Some(tool) if !world.has(tool, 1) => {
                ActionResult::failure(format!("no tool: {tool} required")).into()
            }
            _ => ActionStatus::Running,
        }
    }

    fn tick(&mut self, _ctx: &TickContext, world: &mut DemoWorld) -> Result<ActionStatus, ActionFault> {
        if self.budget.advance() {
            return Ok(ActionResult::timeout(format!("mining {} took too long", self.block)).into());
        }

        self.progress += 1;
        if self.progress % 4 == 0 {
            world.add(&self.block_drop(), 1);
            self.remaining = self.remaining.saturating_sub(1);
        }

        if self.remaining == 0 {
            return Ok(ActionResult::success(format!("mined {}", self.block)).into());
        }
        Ok(ActionStatus::Running)
    }
}

impl MineAction {
    fn block_drop(&self) -> String {
        match self.block.as_str() {
            "wood" => "log".to_string(),
            other => other.to_string(),
        }
    }
}

struct CraftAction {
    resources: ResourceSet,
    item: Option<String>,
    ticks: u32,
}

impl Action<DemoWorld> for CraftAction {
    fn kind(&self) -> &str {
        "craft"
    }

    fn resources(&self) -> ResourceSet {
        self.resources
    }

    fn describe(&self) -> String {
        match &self.item {
            Some(item) => format!("craft {item}"),
            None => "craft ?".to_string(),
        }
    }

    fn start(&mut self, _ctx: &TickContext, world: &mut DemoWorld) -> ActionStatus {
        let Some(item) = &self.item else {
            return ActionResult::invalid("missing item").into();
        };
        let Some((_, ingredients, _)) = RECIPES.iter().find(|(name, _, _)| name == item) else {
            return ActionResult::invalid(format!("unknown recipe: {item}")).into();
        };

        if let Some((missing, _)) = ingredients.iter().find(|(i, n)| !world.has(i, *n)) {
            return ActionResult::failure(format!("missing ingredient: {missing}")).into();
        }
        for (ingredient, count) in ingredients.iter() {
            world.take(ingredient, *count);
        }
        ActionStatus::Running
    }

    fn tick(&mut self, _ctx: &TickContext, world: &mut DemoWorld) -> Result<ActionStatus, ActionFault> {
        self.ticks += 1;
        if self.ticks < 5 {
            return Ok(ActionStatus::Running);
        }

        let item = self
            .item
            .as_deref()
            .ok_or_else(|| ActionFault::new("craft ticked without an item"))?;
        let output = RECIPES
            .iter()
            .find(|(name, _, _)| *name == item)
            .map(|(_, _, n)| *n)
            .unwrap_or(1);
        world.add(item, output);
        Ok(ActionResult::success(format!("crafted {output} {item}")).into())
    }

    fn cancel(&mut self, _world: &mut DemoWorld) {
        tracing::debug!(item = ?self.item, "Crafting abandoned, ingredients lost");
    }
}

struct AttackAction {
    resources: ResourceSet,
    target: String,
    hits_left: u32,
}

impl Action<DemoWorld> for AttackAction {
    fn kind(&self) -> &str {
        "attack"
    }

    fn resources(&self) -> ResourceSet {
        self.resources
    }

    fn describe(&self) -> String {
        format!("attack {}", self.target)
    }

    fn tick(&mut self, _ctx: &TickContext, world: &mut DemoWorld) -> Result<ActionStatus, ActionFault> {
        self.hits_left = self.hits_left.saturating_sub(1);
        if self.hits_left > 0 {
            return Ok(ActionStatus::Running);
        }
        world.hostiles = world.hostiles.saturating_sub(1);
        Ok(ActionResult::success(format!("defeated {}", self.target)).into())
    }
}

struct NavigateAction {
    resources: ResourceSet,
    target: (i32, i32),
    budget: TickBudget,
}

impl Action<DemoWorld> for NavigateAction {
    fn kind(&self) -> &str {
        "navigate"
    }

    fn resources(&self) -> ResourceSet {
        self.resources
    }

    fn describe(&self) -> String {
        format!("navigate to {:?}", self.target)
    }

    fn tick(&mut self, _ctx: &TickContext, world: &mut DemoWorld) -> Result<ActionStatus, ActionFault> {
        if world.position == self.target {
            return Ok(ActionResult::success(format!("arrived at {:?}", self.target)).into());
        }
        if self.budget.advance() {
            return Ok(ActionResult::timeout("navigation timed out").into());
        }

        let (x, z) = world.position;
        world.position = (
            x + (self.target.0 - x).signum(),
            z + (self.target.1 - z).signum(),
        );
        Ok(ActionStatus::Running)
    }
}

struct IdleAction {
    budget: TickBudget,
}

impl Action<DemoWorld> for IdleAction {
    fn kind(&self) -> &str {
        "idle"
    }

    fn resources(&self) -> ResourceSet {
        ResourceSet::EMPTY
    }

    fn tick(&mut self, _ctx: &TickContext, _world: &mut DemoWorld) -> Result<ActionStatus, ActionFault> {
        if self.budget.advance() {
            return Ok(ActionResult::success("finished idling").into());
        }
        Ok(ActionStatus::Running)
    }
}

fn param<T: FromStr>(task: &Task, key: &str, default: Option<T>) -> Result<T, BuildError> {
    match task.param(key) {
        Some(raw) => raw.parse().map_err(|_| BuildError::InvalidTask {
            kind: task.kind.clone(),
            reason: format!("{key}={raw} is not valid"),
        }),
        None => default.ok_or_else(|| BuildError::InvalidTask {
            kind: task.kind.clone(),
            reason: format!("missing {key}"),
        }),
    }
}

/// Builds demo actions, taking resource sets from the registry.
pub struct DemoFactory {
    registry: ActionRegistry,
}

impl DemoFactory {
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry }
    }
}

impl ActionFactory<DemoWorld> for DemoFactory {
    fn build(&self, task: &Task) -> Result<Box<dyn Action<DemoWorld>>, BuildError> {
        let resources = self.registry.resources_for(&task.kind)?;

        let action: Box<dyn Action<DemoWorld>> = match task.kind.as_str() {
            "mine" => Box::new(MineAction {
                resources,
                block: param(task, "block", Some("stone".to_string()))?,
                remaining: param(task, "count", Some(1))?,
                progress: 0,
                budget: TickBudget::new(param(task, "max_ticks", Some(200))?),
            }),
            "craft" => Box::new(CraftAction {
                resources,
                item: task.param("item").map(str::to_string),
                ticks: 0,
            }),
            "attack" => Box::new(AttackAction {
                resources,
                target: param(task, "target", Some("hostile".to_string()))?,
                hits_left: param(task, "hits", Some(3))?,
            }),
            "navigate" => Box::new(NavigateAction {
                resources,
                target: (param(task, "x", None)?, param(task, "z", None)?),
                budget: TickBudget::new(param(task, "max_ticks", Some(100))?),
            }),
            "idle" => Box::new(IdleAction {
                budget: TickBudget::new(param(task, "ticks", Some(100))?),
            }),
            other => {
                return Err(BuildError::InvalidTask {
                    kind: other.to_string(),
                    reason: "not available in the demo world".to_string(),
                })
            }
        };
        Ok(action)
    }
}

/// A task submitted at a fixed tick.
pub struct ScriptedTask {
    pub at_tick: u64,
    pub task: Task,
    pub priority: ActionPriority,
}

fn at(at_tick: u64, priority: ActionPriority, kind: &str, params: &[(&str, &str)]) -> ScriptedTask {
    let task = params
        .iter()
        .fold(Task::new(kind), |task, (k, v)| task.with_param(*k, *v));
    ScriptedTask {
        at_tick,
        task,
        priority,
    }
}

/// The default demo: gather wood, craft tools, get interrupted by a zombie.
pub fn script() -> Vec<ScriptedTask> {
    use ActionPriority::*;

    vec![
        at(0, Normal, "mine", &[("block", "iron_ore")]),
        at(0, Normal, "mine", &[("block", "wood"), ("count", "3")]),
        at(0, Background, "idle", &[("ticks", "400")]),
        at(20, Normal, "craft", &[("item", "planks")]),
        at(30, Normal, "craft", &[("item", "planks")]),
        at(45, Normal, "craft", &[("item", "stick")]),
        at(60, Normal, "craft", &[("item", "wooden_pickaxe")]),
        at(80, Normal, "mine", &[("block", "stone"), ("count", "3")]),
        at(90, Critical, "attack", &[("target", "zombie")]),
        at(140, Normal, "craft", &[("item", "stone_pickaxe")]),
        at(150, Low, "craft", &[]),
        at(160, High, "navigate", &[("x", "10"), ("z", "-4")]),
        at(170, Normal, "mine", &[("block", "iron_ore")]),
        at(180, Normal, "teleport", &[]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(tick: u64) -> TickContext {
        TickContext::at_rate(tick, 20)
    }

    #[test]
    fn mining_stone_needs_a_pickaxe() {
        let factory = DemoFactory::new(ActionRegistry::with_builtin());
        let task = Task::new("mine").with_param("block", "stone");
        let mut world = DemoWorld::default();

        let mut action = factory.build(&task).unwrap();
        let status = action.start(&ctx(0), &mut world);
        assert_eq!(
            status.into_result().and_then(|r| r.failure_kind()),
            Some(foreman_core::FailureKind::Execution)
        );

        world.add("wooden_pickaxe", 1);
        let mut action = factory.build(&task).unwrap();
        assert_eq!(action.start(&ctx(0), &mut world), ActionStatus::Running);
        for tick in 0..3 {
            assert_eq!(action.tick(&ctx(tick), &mut world).unwrap(), ActionStatus::Running);
        }
        assert!(matches!(
            action.tick(&ctx(3), &mut world).unwrap(),
            ActionStatus::Complete(ActionResult::Success { .. })
        ));
        assert!(world.has("stone", 1));
    }

    #[test]
    fn crafting_consumes_ingredients() {
        let factory = DemoFactory::new(ActionRegistry::with_builtin());
        let mut world = DemoWorld::default();
        world.add("log", 1);

        let mut action = factory
            .build(&Task::new("craft").with_param("item", "planks"))
            .unwrap();
        assert_eq!(action.start(&ctx(0), &mut world), ActionStatus::Running);
        assert!(!world.has("log", 1));
        for tick in 0..5 {
            action.tick(&ctx(tick), &mut world).unwrap();
        }
        assert!(world.has("planks", 4));
    }

    #[test]
    fn bad_params_are_rejected_at_build() {
        let factory = DemoFactory::new(ActionRegistry::with_builtin());
        assert!(matches!(
            factory.build(&Task::new("navigate").with_param("x", "1")),
            Err(BuildError::InvalidTask { .. })
        ));
        assert!(matches!(
            factory.build(&Task::new("mine").with_param("count", "lots")),
            Err(BuildError::InvalidTask { .. })
        ));
        assert!(matches!(
            factory.build(&Task::new("teleport")),
            Err(BuildError::UnknownKind(_))
        ));
    }

    #[test]
    fn navigation_times_out() {
        let factory = DemoFactory::new(ActionRegistry::with_builtin());
        let task = Task::new("navigate")
            .with_param("x", "50")
            .with_param("z", "0")
            .with_param("max_ticks", "3");
        let mut world = DemoWorld::default();
        let mut action = factory.build(&task).unwrap();

        let mut last = ActionStatus::Running;
        for tick in 0..3 {
            last = action.tick(&ctx(tick), &mut world).unwrap();
        }
        assert_eq!(
            last.into_result().and_then(|r| r.failure_kind()),
            Some(foreman_core::FailureKind::Timeout)
        );
    }
}
