//! Priority scheduler with resource locking and preemption.
//!
//! Each [`ActionScheduler::tick`] runs four phases in a fixed order:
//! reap, preempt, promote, tick. An action cancelled in a round is therefore
//! never ticked in that same round.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use crate::history::{ActionHistory, HistoryEntry, HistoryEvent};
use crate::status::{LockSummary, RunningSummary, SchedulerStatus};
use crate::{
    Action, ActionFault, ActionId, ActionPriority, ActionResult, ActionState, ActionStatus,
    FailureKind, ResourceLock, ResourceSet, TickContext,
};

struct ScheduledAction<W>
where
    W: 'static,
{
    id: ActionId,
    kind: String,
    description: String,
    priority: ActionPriority,
    resources: ResourceSet,
    state: ActionState,
    result: Option<ActionResult>,
    ticks: u64,
    /// Entered a CRITICAL/HIGH queue since the last preempt phase.
    awaiting_preemption: bool,
    action: Box<dyn Action<W>>,
}

impl<W> ScheduledAction<W>
where
    W: 'static,
{
    fn complete(&mut self, result: ActionResult) {
        self.state = if result.failure_kind() == Some(FailureKind::Cancelled) {
            ActionState::Cancelled
        } else {
            ActionState::Completed
        };
        self.result = Some(result);
    }

    /// History event for an action that completed on its own.
    fn completion_event(&self) -> HistoryEvent {
        match &self.result {
            Some(result) if result.is_success() => HistoryEvent::Completed,
            _ => HistoryEvent::Failed,
        }
    }

    fn cancel(&mut self, world: &mut W, result: ActionResult) {
        let action = &mut self.action;
        if panic::catch_unwind(AssertUnwindSafe(|| action.cancel(world))).is_err() {
            tracing::error!(action = %self.id, kind = %self.kind, "Action panicked during cancel");
        }
        self.state = ActionState::Cancelled;
        self.result = Some(result);
    }

    fn finish(self) -> FinishedAction {
        FinishedAction {
            id: self.id,
            kind: self.kind,
            description: self.description,
            priority: self.priority,
            state: self.state,
            result: self
                .result
                .unwrap_or_else(|| ActionResult::cancelled("Action cancelled")),
            ticks_run: self.ticks,
        }
    }

    fn summary(&self) -> RunningSummary {
        RunningSummary {
            id: self.id,
            kind: self.kind.clone(),
            description: self.description.clone(),
            priority: self.priority,
            state: self.state,
            resources: self.resources,
            ticks: self.ticks,
        }
    }
}

/// An action that left the scheduler, with its terminal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedAction {
    pub id: ActionId,
    pub kind: String,
    pub description: String,
    pub priority: ActionPriority,
    /// `Completed` or `Cancelled`.
    pub state: ActionState,
    pub result: ActionResult,
    pub ticks_run: u64,
}

pub struct ActionScheduler<W>
where
    W: 'static,
{
    queues: [VecDeque<ScheduledAction<W>>; 5],
    running: Vec<ScheduledAction<W>>,
    locks: ResourceLock,
    /// Actions that left outside of `tick` (interrupt, clear), reported next tick.
    finished_elsewhere: Vec<FinishedAction>,
    history: ActionHistory,
    next_id: u64,
    current_tick: u64,
}

impl<W> ActionScheduler<W>
where
    W: 'static,
{
    pub fn new() -> Self {
        Self::with_history_capacity(crate::history::DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            queues: std::array::from_fn(|_| VecDeque::new()),
            running: Vec::new(),
            locks: ResourceLock::new(),
            finished_elsewhere: Vec::new(),
            history: ActionHistory::with_capacity(capacity),
            next_id: 1,
            current_tick: 0,
        }
    }

    /// Enqueue `action` at the back of its priority level.
    ///
    /// CRITICAL and HIGH arrivals cancel strictly less urgent running actions
    /// at the start of the next tick, before promotion.
    pub fn schedule(&mut self, action: Box<dyn Action<W>>, priority: ActionPriority) -> ActionId {
        let id = ActionId(self.next_id);
        self.next_id += 1;

        let entry = ScheduledAction {
            id,
            kind: action.kind().to_string(),
            description: action.describe(),
            priority,
            resources: action.resources(),
            state: ActionState::Queued,
            result: None,
            ticks: 0,
            awaiting_preemption: priority.is_preemptive(),
            action,
        };

        tracing::debug!(
            action = %id,
            kind = %entry.kind,
            priority = %priority,
            resources = %entry.resources,
            "Scheduled action"
        );
        self.record(&entry, HistoryEvent::Scheduled);
        self.queues[priority.level() as usize].push_back(entry);
        id
    }

    /// Advance the scheduler by one round and return every action that left it.
    pub fn tick(&mut self, ctx: &TickContext, world: &mut W) -> Vec<FinishedAction> {
        self.current_tick = ctx.tick;
        let mut finished = std::mem::take(&mut self.finished_elsewhere);

        self.reap(&mut finished);
        if let Some(priority) = self.take_preemptor() {
            self.preempt_below(priority, world, &mut finished);
        }
        self.promote(ctx, world, &mut finished);
        self.tick_running(ctx, world, &mut finished);

        finished
    }

    fn reap(&mut self, finished: &mut Vec<FinishedAction>) {
        let (done, still_running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.running)
            .into_iter()
            .partition(|entry| entry.state.is_terminal());
        self.running = still_running;

        for entry in done {
            self.locks.release(entry.id);
            self.record(&entry, entry.completion_event());
            tracing::debug!(action = %entry.id, kind = %entry.kind, "Reaped action");
            finished.push(entry.finish());
        }
    }

    /// Most urgent level holding an action that arrived since the last call.
    ///
    /// Clears every arrival mark, so each arrival preempts at most once. Actions
    /// interrupted or demoted before this runs no longer count.
    fn take_preemptor(&mut self) -> Option<ActionPriority> {
        let mut preemptor = None;
        for priority in ActionPriority::ALL.into_iter().filter(|p| p.is_preemptive()) {
            for entry in self.queues[priority.level() as usize].iter_mut() {
                if std::mem::take(&mut entry.awaiting_preemption) {
                    preemptor.get_or_insert(priority);
                }
            }
        }
        preemptor
    }

    fn preempt_below(
        &mut self,
        priority: ActionPriority,
        world: &mut W,
        finished: &mut Vec<FinishedAction>,
    ) {
        let (victims, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.running)
            .into_iter()
            .partition(|entry| priority.can_preempt(entry.priority));
        self.running = kept;

        for mut entry in victims {
            entry.cancel(
                world,
                ActionResult::cancelled(format!("Preempted by {} priority action", priority.name())),
            );
            self.locks.force_release(entry.id);
            self.record(&entry, HistoryEvent::Preempted);
            tracing::info!(
                action = %entry.id,
                kind = %entry.kind,
                victim_priority = %entry.priority,
                preemptor_priority = %priority,
                "Preempted action"
            );
            finished.push(entry.finish());
        }
    }

    fn promote(&mut self, ctx: &TickContext, world: &mut W, finished: &mut Vec<FinishedAction>) {
        for priority in ActionPriority::ALL {
            let level = priority.level() as usize;
            while let Some(head) = self.queues[level].front() {
                if let Err(conflict) = self.locks.try_acquire(head.id, head.resources) {
                    tracing::trace!(
                        action = %head.id,
                        kind = %head.kind,
                        %conflict,
                        "Head of queue blocked on resources"
                    );
                    break;
                }

                let Some(mut entry) = self.queues[level].pop_front() else {
                    break;
                };
                entry.state = ActionState::Running;
                self.record(&entry, HistoryEvent::Started);
                tracing::debug!(
                    action = %entry.id,
                    kind = %entry.kind,
                    priority = %priority,
                    "Started action"
                );

                let action = &mut entry.action;
                match panic::catch_unwind(AssertUnwindSafe(|| action.start(ctx, world))) {
                    Ok(ActionStatus::Running) => self.running.push(entry),
                    Ok(ActionStatus::Complete(result)) => {
                        // Finished without ever running; free its locks now so the
                        // next head at this level can use them this round.
                        entry.complete(result);
                        self.locks.release(entry.id);
                        self.record(&entry, entry.completion_event());
                        finished.push(entry.finish());
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        self.fault(entry, world, ActionFault(message), finished);
                    }
                }
            }
        }
    }

    fn tick_running(
        &mut self,
        ctx: &TickContext,
        world: &mut W,
        finished: &mut Vec<FinishedAction>,
    ) {
        let mut faulted = Vec::new();

        for (index, entry) in self.running.iter_mut().enumerate() {
            if entry.state != ActionState::Running {
                continue;
            }
            entry.ticks += 1;

            let action = &mut entry.action;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| action.tick(ctx, world)))
                .unwrap_or_else(|payload| Err(ActionFault(panic_message(payload.as_ref()))));

            match outcome {
                Ok(ActionStatus::Running) => {}
                Ok(ActionStatus::Complete(result)) => entry.complete(result),
                Err(fault) => faulted.push((index, fault)),
            }
        }

        for (index, fault) in faulted.into_iter().rev() {
            let entry = self.running.remove(index);
            self.fault(entry, world, fault, finished);
        }
    }

    fn fault(
        &mut self,
        mut entry: ScheduledAction<W>,
        world: &mut W,
        fault: ActionFault,
        finished: &mut Vec<FinishedAction>,
    ) {
        tracing::error!(action = %entry.id, kind = %entry.kind, error = %fault, "Error ticking action");
        entry.cancel(world, ActionResult::fault(fault.0));
        self.locks.force_release(entry.id);
        self.record(&entry, HistoryEvent::Faulted);
        finished.push(entry.finish());
    }

    /// Cancel a running action or drop a queued one, synchronously.
    ///
    /// The action is reported as finished on the next tick. Returns `false` if
    /// the id is unknown or the action already reached a terminal state.
    pub fn interrupt(&mut self, id: ActionId, world: &mut W) -> bool {
        if let Some(index) = self
            .running
            .iter()
            .position(|e| e.id == id && !e.state.is_terminal())
        {
            let mut entry = self.running.remove(index);
            entry.cancel(world, ActionResult::cancelled("Action interrupted"));
            self.locks.force_release(id);
            self.record(&entry, HistoryEvent::Interrupted);
            tracing::debug!(action = %id, kind = %entry.kind, "Interrupted action");
            self.finished_elsewhere.push(entry.finish());
            return true;
        }

        for level in 0..self.queues.len() {
            if let Some(index) = self.queues[level].iter().position(|e| e.id == id) {
                if let Some(mut entry) = self.queues[level].remove(index) {
                    entry.cancel(world, ActionResult::cancelled("Action interrupted"));
                    self.record(&entry, HistoryEvent::Interrupted);
                    self.finished_elsewhere.push(entry.finish());
                    return true;
                }
            }
        }

        false
    }

    /// Change an action's priority. Queued actions move to the back of the new level.
    pub fn set_priority(&mut self, id: ActionId, priority: ActionPriority) -> bool {
        if let Some(entry) = self.running.iter_mut().find(|e| e.id == id) {
            entry.priority = priority;
            return true;
        }

        for level in 0..self.queues.len() {
            if let Some(index) = self.queues[level].iter().position(|e| e.id == id) {
                if let Some(mut entry) = self.queues[level].remove(index) {
                    entry.priority = priority;
                    entry.awaiting_preemption = priority.is_preemptive();
                    self.queues[priority.level() as usize].push_back(entry);
                    return true;
                }
            }
        }

        false
    }

    /// Cancel everything, empty every queue and drop all locks.
    pub fn clear(&mut self, world: &mut W) {
        let running = std::mem::take(&mut self.running);
        let queued = self.queues.iter_mut().flat_map(|q| q.drain(..)).collect::<Vec<_>>();

        for mut entry in running.into_iter().chain(queued) {
            if !entry.state.is_terminal() {
                entry.cancel(world, ActionResult::cancelled("Scheduler cleared"));
                self.record(&entry, HistoryEvent::Interrupted);
            }
            self.finished_elsewhere.push(entry.finish());
        }

        self.locks.clear();
    }

    pub fn state_of(&self, id: ActionId) -> Option<ActionState> {
        self.running
            .iter()
            .chain(self.queues.iter().flatten())
            .find(|e| e.id == id)
            .map(|e| e.state)
    }

    pub fn priority_of(&self, id: ActionId) -> Option<ActionPriority> {
        self.running
            .iter()
            .chain(self.queues.iter().flatten())
            .find(|e| e.id == id)
            .map(|e| e.priority)
    }

    pub fn running_ids(&self) -> Vec<ActionId> {
        self.running.iter().map(|e| e.id).collect()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn queue_depth(&self, priority: ActionPriority) -> usize {
        self.queues[priority.level() as usize].len()
    }

    /// Queued ids at one level, head first.
    pub fn queued_ids(&self, priority: ActionPriority) -> Vec<ActionId> {
        self.queues[priority.level() as usize]
            .iter()
            .map(|e| e.id)
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_empty() && self.queued_count() == 0
    }

    pub fn locks(&self) -> &ResourceLock {
        &self.locks
    }

    pub fn history(&self) -> &ActionHistory {
        &self.history
    }

    pub fn history_summary(&self) -> String {
        self.history.summary()
    }

    pub fn status(&self) -> SchedulerStatus {
        let locks = self
            .locks
            .holders()
            .map(|(tag, holder)| LockSummary {
                tag,
                holder,
                description: self
                    .running
                    .iter()
                    .find(|e| e.id == holder)
                    .map(|e| e.description.clone())
                    .unwrap_or_default(),
            })
            .collect();

        SchedulerStatus {
            tick: self.current_tick,
            running: self.running.iter().map(ScheduledAction::summary).collect(),
            queued: ActionPriority::ALL
                .into_iter()
                .map(|p| (p, self.queue_depth(p)))
                .collect(),
            locks,
        }
    }

    fn record(&mut self, entry: &ScheduledAction<W>, event: HistoryEvent) {
        self.history.push(HistoryEntry {
            tick: self.current_tick,
            action: entry.id,
            priority: entry.priority,
            description: entry.description.clone(),
            event,
        });
    }
}

impl<W> Default for ActionScheduler<W>
where
    W: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}
