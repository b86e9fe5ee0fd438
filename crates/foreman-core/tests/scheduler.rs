mod common;

use common::{run, RecordingWorld, Script, ScriptedAction};
use foreman_core::{
    ActionPriority, ActionScheduler, ActionState, FailureKind, HistoryEvent, ResourceTag,
};

use ResourceTag::{Combat, Crafting, Inventory, Manipulation, Movement};

const MINE: &[ResourceTag] = &[Movement, Manipulation];
const ATTACK: &[ResourceTag] = &[Combat];
const CRAFT: &[ResourceTag] = &[Movement, Manipulation, Inventory, Crafting];

#[test]
fn disjoint_actions_run_concurrently() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let mine = scheduler.schedule(
        ScriptedAction::boxed("mine", MINE, Script::Forever),
        ActionPriority::Normal,
    );
    let attack = scheduler.schedule(
        ScriptedAction::boxed("attack", ATTACK, Script::Forever),
        ActionPriority::Normal,
    );

    run(&mut scheduler, &mut world, &mut tick, 1);

    assert_eq!(scheduler.state_of(mine), Some(ActionState::Running));
    assert_eq!(scheduler.state_of(attack), Some(ActionState::Running));
    assert_eq!(world.ticked, vec!["mine", "attack"]);
    assert_eq!(scheduler.locks().holder_of(Combat), Some(attack));
    assert_eq!(scheduler.locks().holder_of(Movement), Some(mine));
}

#[test]
fn overlapping_action_waits_until_holder_completes() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let mine = scheduler.schedule(
        ScriptedAction::boxed("mine", MINE, Script::SucceedAfter(3)),
        ActionPriority::Normal,
    );
    let craft = scheduler.schedule(
        ScriptedAction::boxed("craft", CRAFT, Script::SucceedAfter(1)),
        ActionPriority::Normal,
    );

    run(&mut scheduler, &mut world, &mut tick, 3);
    assert_eq!(scheduler.state_of(mine), Some(ActionState::Completed));
    assert_eq!(scheduler.state_of(craft), Some(ActionState::Queued));
    assert!(!world.started.contains(&"craft"));

    // Next round reaps mine and only then promotes craft.
    let finished = run(&mut scheduler, &mut world, &mut tick, 1);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].id, mine);
    assert!(finished[0].result.is_success());
    assert_eq!(scheduler.state_of(craft), Some(ActionState::Completed));
    assert_eq!(world.started, vec!["mine", "craft"]);
}

#[test]
fn fifo_order_is_preserved_within_a_level() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let a = scheduler.schedule(
        ScriptedAction::boxed("a", &[Movement], Script::SucceedAfter(2)),
        ActionPriority::Normal,
    );
    let b = scheduler.schedule(
        ScriptedAction::boxed("b", &[Movement], Script::SucceedAfter(2)),
        ActionPriority::Normal,
    );
    let c = scheduler.schedule(
        ScriptedAction::boxed("c", &[Movement], Script::SucceedAfter(2)),
        ActionPriority::Normal,
    );

    run(&mut scheduler, &mut world, &mut tick, 1);
    assert_eq!(scheduler.state_of(a), Some(ActionState::Running));
    assert_eq!(scheduler.queued_ids(ActionPriority::Normal), vec![b, c]);

    run(&mut scheduler, &mut world, &mut tick, 2);
    assert_eq!(scheduler.state_of(a), None);
    assert_eq!(scheduler.state_of(b), Some(ActionState::Running));
    assert_eq!(scheduler.state_of(c), Some(ActionState::Queued));

    let finished = run(&mut scheduler, &mut world, &mut tick, 4);
    let order: Vec<_> = finished.iter().map(|f| f.id).collect();
    assert_eq!(order, vec![b, c]);
    assert_eq!(world.started, vec!["a", "b", "c"]);
    assert!(scheduler.is_idle());
}

#[test]
fn blocked_head_does_not_stop_less_urgent_levels() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let holder = scheduler.schedule(
        ScriptedAction::boxed("holder", &[Movement], Script::Forever),
        ActionPriority::Normal,
    );
    run(&mut scheduler, &mut world, &mut tick, 1);

    let blocked = scheduler.schedule(
        ScriptedAction::boxed("blocked", &[Movement], Script::Forever),
        ActionPriority::Normal,
    );
    let behind = scheduler.schedule(
        ScriptedAction::boxed("behind", &[Combat], Script::Forever),
        ActionPriority::Normal,
    );
    let low = scheduler.schedule(
        ScriptedAction::boxed("low", &[Inventory], Script::Forever),
        ActionPriority::Low,
    );
    run(&mut scheduler, &mut world, &mut tick, 1);

    assert_eq!(scheduler.state_of(holder), Some(ActionState::Running));
    assert_eq!(scheduler.state_of(blocked), Some(ActionState::Queued));
    // No skipping ahead within a level, even though `behind` could run.
    assert_eq!(scheduler.state_of(behind), Some(ActionState::Queued));
    assert_eq!(scheduler.state_of(low), Some(ActionState::Running));
}

#[test]
fn completed_action_is_never_ticked_again() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let id = scheduler.schedule(
        ScriptedAction::boxed("once", &[Movement], Script::SucceedAfter(1)),
        ActionPriority::Normal,
    );

    let finished = run(&mut scheduler, &mut world, &mut tick, 1);
    assert!(finished.is_empty());
    assert_eq!(scheduler.state_of(id), Some(ActionState::Completed));

    let finished = run(&mut scheduler, &mut world, &mut tick, 3);
    assert_eq!(finished.len(), 1);
    assert_eq!(world.ticked, vec!["once"]);
    assert_eq!(world.started, vec!["once"]);
    assert!(scheduler.locks().is_empty());
}

#[test]
fn failures_are_reported_with_their_result() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    scheduler.schedule(
        ScriptedAction::boxed("mine", MINE, Script::FailAfter(1)),
        ActionPriority::Normal,
    );

    let finished = run(&mut scheduler, &mut world, &mut tick, 2);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].kind, "mine");
    assert_eq!(finished[0].state, ActionState::Completed);
    assert_eq!(finished[0].result.failure_kind(), Some(FailureKind::Execution));
    assert!(finished[0].result.requires_replanning());
    assert_eq!(finished[0].ticks_run, 1);
}

#[test]
fn rejected_start_releases_resources_in_the_same_round() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let bad = scheduler.schedule(
        ScriptedAction::boxed("bad", MINE, Script::RejectOnStart),
        ActionPriority::Normal,
    );
    let good = scheduler.schedule(
        ScriptedAction::boxed("good", MINE, Script::Forever),
        ActionPriority::Normal,
    );

    let finished = run(&mut scheduler, &mut world, &mut tick, 1);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].id, bad);
    assert_eq!(finished[0].result.failure_kind(), Some(FailureKind::Validation));
    assert!(!finished[0].result.requires_replanning());
    assert_eq!(scheduler.state_of(good), Some(ActionState::Running));
    assert!(!world.ticked.contains(&"bad"));
}

#[test]
fn success_in_start_is_recorded_as_completed() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let quick = scheduler.schedule(
        ScriptedAction::boxed("quick", MINE, Script::SucceedOnStart),
        ActionPriority::Normal,
    );
    let next = scheduler.schedule(
        ScriptedAction::boxed("next", MINE, Script::Forever),
        ActionPriority::Normal,
    );

    let finished = run(&mut scheduler, &mut world, &mut tick, 1);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].id, quick);
    assert_eq!(finished[0].state, ActionState::Completed);
    assert_eq!(finished[0].result.message(), "quick done at start");
    assert_eq!(
        scheduler.history().events_for(quick),
        vec![
            HistoryEvent::Scheduled,
            HistoryEvent::Started,
            HistoryEvent::Completed
        ]
    );
    assert_eq!(scheduler.state_of(next), Some(ActionState::Running));
}

#[test]
fn tick_fault_cancels_action_and_frees_resources() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let faulty = scheduler.schedule(
        ScriptedAction::boxed("faulty", MINE, Script::FaultAfter(2)),
        ActionPriority::Normal,
    );
    let waiting = scheduler.schedule(
        ScriptedAction::boxed("waiting", MINE, Script::Forever),
        ActionPriority::Normal,
    );

    let finished = run(&mut scheduler, &mut world, &mut tick, 2);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].id, faulty);
    assert_eq!(finished[0].state, ActionState::Cancelled);
    assert_eq!(finished[0].result.failure_kind(), Some(FailureKind::Fault));
    assert_eq!(world.canceled, vec!["faulty"]);
    assert!(scheduler.locks().is_empty());

    run(&mut scheduler, &mut world, &mut tick, 1);
    assert_eq!(scheduler.state_of(waiting), Some(ActionState::Running));
    assert_eq!(
        scheduler.history().events_for(faulty),
        vec![
            HistoryEvent::Scheduled,
            HistoryEvent::Started,
            HistoryEvent::Faulted
        ]
    );
}

#[test]
fn panicking_tick_is_contained() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    scheduler.schedule(
        ScriptedAction::boxed("wild", ATTACK, Script::PanicAfter(1)),
        ActionPriority::Normal,
    );
    let calm = scheduler.schedule(
        ScriptedAction::boxed("calm", MINE, Script::Forever),
        ActionPriority::Normal,
    );

    let finished = run(&mut scheduler, &mut world, &mut tick, 1);
    assert_eq!(finished.len(), 1);
    assert!(finished[0].result.message().contains("wild panicked"));
    assert_eq!(scheduler.state_of(calm), Some(ActionState::Running));
    assert_eq!(scheduler.locks().holder_of(Combat), None);
}

#[test]
fn interrupt_handles_running_and_queued_actions() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let running = scheduler.schedule(
        ScriptedAction::boxed("running", MINE, Script::Forever),
        ActionPriority::Normal,
    );
    let queued = scheduler.schedule(
        ScriptedAction::boxed("queued", MINE, Script::Forever),
        ActionPriority::Normal,
    );
    run(&mut scheduler, &mut world, &mut tick, 1);

    assert!(scheduler.interrupt(queued, &mut world));
    assert!(scheduler.interrupt(running, &mut world));
    assert!(!scheduler.interrupt(running, &mut world));
    assert!(scheduler.locks().is_empty());
    assert!(scheduler.is_idle());
    assert_eq!(world.canceled, vec!["queued", "running"]);

    let finished = run(&mut scheduler, &mut world, &mut tick, 1);
    assert_eq!(finished.len(), 2);
    assert!(finished.iter().all(|f| f.state == ActionState::Cancelled));
}

#[test]
fn clear_cancels_everything() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    scheduler.schedule(
        ScriptedAction::boxed("a", MINE, Script::Forever),
        ActionPriority::Normal,
    );
    scheduler.schedule(
        ScriptedAction::boxed("b", MINE, Script::Forever),
        ActionPriority::Low,
    );
    run(&mut scheduler, &mut world, &mut tick, 1);

    scheduler.clear(&mut world);
    assert!(scheduler.is_idle());
    assert!(scheduler.locks().is_empty());
    assert_eq!(world.canceled.len(), 2);
    assert_eq!(run(&mut scheduler, &mut world, &mut tick, 1).len(), 2);
}

#[test]
fn set_priority_moves_queued_action() {
    let mut scheduler = ActionScheduler::<RecordingWorld>::new();

    let id = scheduler.schedule(
        ScriptedAction::boxed("late", MINE, Script::Forever),
        ActionPriority::Background,
    );
    assert!(scheduler.set_priority(id, ActionPriority::Low));
    assert_eq!(scheduler.queue_depth(ActionPriority::Background), 0);
    assert_eq!(scheduler.queue_depth(ActionPriority::Low), 1);
    assert_eq!(scheduler.priority_of(id), Some(ActionPriority::Low));
}

#[test]
fn status_lists_running_queues_and_lock_holders() {
    let mut scheduler = ActionScheduler::new();
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    let mine = scheduler.schedule(
        ScriptedAction::boxed("mine", MINE, Script::Forever),
        ActionPriority::Normal,
    );
    scheduler.schedule(
        ScriptedAction::boxed("craft", CRAFT, Script::Forever),
        ActionPriority::Low,
    );
    run(&mut scheduler, &mut world, &mut tick, 1);

    let status = scheduler.status();
    assert_eq!(status.running.len(), 1);
    assert_eq!(status.running[0].id, mine);
    assert_eq!(status.queued_total(), 1);
    assert_eq!(status.locks.len(), 2);

    let text = status.to_string();
    assert!(text.contains("Running actions: 1"));
    assert!(text.contains("LOW(level=3): 1"));
    assert!(text.contains("movement -> #1 mine action"));
}

#[test]
fn history_is_bounded() {
    let mut scheduler = ActionScheduler::with_history_capacity(4);
    let mut world = RecordingWorld::default();
    let mut tick = 0;

    for _ in 0..5 {
        scheduler.schedule(
            ScriptedAction::boxed("short", &[], Script::SucceedAfter(1)),
            ActionPriority::Low,
        );
    }
    run(&mut scheduler, &mut world, &mut tick, 3);

    assert_eq!(scheduler.history().len(), 4);
    assert!(scheduler.history_summary().starts_with("Action history:"));
}
