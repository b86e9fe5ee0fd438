//! Agent executor: the scheduler plus the learning loop around it.

use std::collections::BTreeMap;
use std::fmt;

use foreman_core::{
    ActionFactory, ActionId, ActionPriority, ActionResult, ActionScheduler, BuildError,
    FailureKind, FinishedAction, SchedulerStatus, Task, TickContext,
};
use serde_json::json;

use crate::config::ForemanConfig;
use crate::error::StoreResult;
use crate::learning::{FailureTracker, Insight, KnowledgeBase, LearningSystem};
use crate::observability::{EventEmitter, SchedulerEvent};
use crate::retry::{AdaptiveRetryStrategy, Clock, RetryVerdict, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Succeeded,
    /// Failed without retry: validation errors, faults, or an unbuildable retry.
    Failed,
    /// Retryable failure the retry strategy refused.
    GaveUp,
    Cancelled,
}

/// Final word on a submitted task.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub task: Task,
    pub kind: OutcomeKind,
    pub result: ActionResult,
    /// Retries made before this outcome.
    pub retries: u32,
}

#[derive(Debug, Clone)]
struct PendingRetry {
    task: Task,
    priority: ActionPriority,
    error: String,
}

/// Operator snapshot of the executor.
#[derive(Debug, Clone)]
pub struct ExecutorStatus {
    pub agent: String,
    pub scheduler: SchedulerStatus,
    pub pending_retries: usize,
    pub failures: usize,
    pub insights: usize,
}

impl fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheduler)?;
        writeln!(f, "Pending retries: {}", self.pending_retries)?;
        writeln!(
            f,
            "Learning ({}): {} failures tracked, {} insights",
            self.agent, self.failures, self.insights
        )
    }
}

/// Owns the scheduler, failure tracker, knowledge base, learning system and
/// retry strategy for one agent. Driven by [`AgentExecutor::tick`].
pub struct AgentExecutor<W>
where
    W: 'static,
{
    agent: String,
    scheduler: ActionScheduler<W>,
    tracker: FailureTracker,
    knowledge: KnowledgeBase,
    learning: LearningSystem,
    retry: AdaptiveRetryStrategy,
    factory: Box<dyn ActionFactory<W>>,
    clock: Box<dyn Clock>,
    events: Option<EventEmitter>,
    inflight: BTreeMap<ActionId, (Task, ActionPriority)>,
    pending_retries: Vec<PendingRetry>,
    outcomes: Vec<Outcome>,
    analysis_interval: u64,
    ticks_since_analysis: u64,
}

impl<W> AgentExecutor<W>
where
    W: 'static,
{
    /// Executor with nothing persisted.
    pub fn in_memory(config: &ForemanConfig, factory: impl ActionFactory<W>) -> Self {
        let tracker = FailureTracker::new(&config.agent, config.learning.max_failures);
        let knowledge = KnowledgeBase::with_limits(
            &config.agent,
            config.learning.max_insights,
            config.learning.max_tips_per_action,
        );
        Self::assemble(config, Box::new(factory), tracker, knowledge, None)
    }

    /// Executor persisting failures, knowledge and events under the config's data dir.
    pub fn open(config: &ForemanConfig, factory: impl ActionFactory<W>) -> StoreResult<Self> {
        let tracker = FailureTracker::open(
            &config.agent,
            &config.failure_log_path(),
            config.learning.max_failures,
        )?;
        let knowledge = KnowledgeBase::open(
            &config.agent,
            &config.knowledge_path(),
            config.learning.max_insights,
            config.learning.max_tips_per_action,
        )?;
        let events = EventEmitter::new(config.events_path());
        Ok(Self::assemble(
            config,
            Box::new(factory),
            tracker,
            knowledge,
            Some(events),
        ))
    }

    fn assemble(
        config: &ForemanConfig,
        factory: Box<dyn ActionFactory<W>>,
        tracker: FailureTracker,
        knowledge: KnowledgeBase,
        events: Option<EventEmitter>,
    ) -> Self {
        Self {
            agent: config.agent.clone(),
            scheduler: ActionScheduler::with_history_capacity(config.scheduler.history_capacity),
            tracker,
            knowledge,
            learning: LearningSystem::new(config.learning.clone()),
            retry: AdaptiveRetryStrategy::new(config.retry.clone()),
            factory,
            clock: Box::new(SystemClock),
            events,
            inflight: BTreeMap::new(),
            pending_retries: Vec::new(),
            outcomes: Vec::new(),
            analysis_interval: config.learning.analysis_interval_ticks.max(1),
            ticks_since_analysis: 0,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Build `task` and enqueue it. Unknown kinds are rejected here.
    pub fn submit(&mut self, task: Task, priority: ActionPriority) -> Result<ActionId, BuildError> {
        let action = self.factory.build(&task)?;
        let id = self.scheduler.schedule(action, priority);
        self.emit(
            SchedulerEvent::new(&self.agent, "action_submitted", task.to_string())
                .for_task(task.id.0, &task.kind)
                .with_metadata(json!({ "priority": priority.name(), "action_id": id.0 })),
        );
        self.inflight.insert(id, (task, priority));
        Ok(id)
    }

    /// One executor round: periodic learning, due retries, then the scheduler.
    pub fn tick(&mut self, ctx: &TickContext, world: &mut W) {
        self.ticks_since_analysis += 1;
        if self.ticks_since_analysis >= self.analysis_interval {
            self.ticks_since_analysis = 0;
            self.analyze();
        }

        self.process_pending_retries();

        for finished in self.scheduler.tick(ctx, world) {
            self.handle_finished(finished);
        }
    }

    /// Run insight generation now.
    pub fn analyze(&mut self) -> Vec<Insight> {
        let insights = self
            .learning
            .generate_insights(&self.tracker, &mut self.knowledge);
        self.emit(
            SchedulerEvent::new(&self.agent, "learning_analysis", "Performed learning analysis")
                .with_metadata(json!({
                    "produced": insights.len(),
                    "total_insights": self.knowledge.insight_count(),
                })),
        );
        insights
    }

    fn process_pending_retries(&mut self) {
        if self.pending_retries.is_empty() {
            return;
        }
        for pending in std::mem::take(&mut self.pending_retries) {
            self.consider_retry(pending);
        }
    }

    fn handle_finished(&mut self, finished: FinishedAction) {
        let Some((task, priority)) = self.inflight.remove(&finished.id) else {
            tracing::debug!(action = %finished.id, "Finished action was not submitted through the executor");
            return;
        };

        self.emit(
            SchedulerEvent::new(&self.agent, "action_finished", finished.result.to_string())
                .for_task(task.id.0, &task.kind)
                .with_metadata(json!({
                    "action_id": finished.id.0,
                    "ticks": finished.ticks_run,
                    "success": finished.result.is_success(),
                })),
        );

        match finished.result.failure_kind() {
            None => {
                self.knowledge.record_success(&task.kind);
                let retries = self.retry.retry_count(task.id);
                self.retry.reset_retries(task.id);
                self.push_outcome(task, OutcomeKind::Succeeded, finished.result, retries);
            }
            Some(FailureKind::Cancelled) => {
                let retries = self.retry.retry_count(task.id);
                self.retry.reset_retries(task.id);
                self.push_outcome(task, OutcomeKind::Cancelled, finished.result, retries);
            }
            Some(kind) => {
                let error = finished.result.message().to_string();
                self.tracker.record_failure(
                    &task.kind,
                    task.params.clone(),
                    &error,
                    &format!("{} ({:?}) after {} ticks", finished.description, kind, finished.ticks_run),
                );

                if kind.is_retryable() {
                    self.consider_retry(PendingRetry {
                        task,
                        priority,
                        error,
                    });
                } else {
                    let retries = self.retry.retry_count(task.id);
                    self.retry.reset_retries(task.id);
                    self.push_outcome(task, OutcomeKind::Failed, finished.result, retries);
                }
            }
        }
    }

    fn consider_retry(&mut self, pending: PendingRetry) {
        let now = self.clock.now_ms();
        let decision = self.retry.decide(
            &pending.task,
            &pending.error,
            &self.tracker,
            &self.learning,
            now,
        );
        tracing::debug!(task = %pending.task.id, kind = %pending.task.kind, %decision, "Retry decision");

        match decision.verdict {
            RetryVerdict::Retry => {
                self.emit(
                    SchedulerEvent::new(&self.agent, "action_retried", decision.to_string())
                        .for_task(pending.task.id.0, &pending.task.kind),
                );
                let PendingRetry { task, priority, .. } = pending;
                if let Err(error) = self.submit(task.clone(), priority) {
                    tracing::error!(task = %task.id, kind = %task.kind, %error, "Failed to rebuild task for retry");
                    let retries = self.retry.retry_count(task.id);
                    self.retry.reset_retries(task.id);
                    self.push_outcome(
                        task,
                        OutcomeKind::Failed,
                        ActionResult::invalid(error.to_string()),
                        retries,
                    );
                }
            }
            RetryVerdict::Defer { .. } => self.pending_retries.push(pending),
            RetryVerdict::GiveUp => {
                self.emit(
                    SchedulerEvent::new(&self.agent, "action_gave_up", decision.to_string())
                        .for_task(pending.task.id.0, &pending.task.kind),
                );
                self.push_outcome(
                    pending.task,
                    OutcomeKind::GaveUp,
                    ActionResult::failure(pending.error),
                    decision.attempt,
                );
            }
        }
    }

    fn push_outcome(&mut self, task: Task, kind: OutcomeKind, result: ActionResult, retries: u32) {
        tracing::info!(
            agent = %self.agent,
            task = %task.id,
            kind = %task.kind,
            outcome = ?kind,
            retries,
            "Task finished"
        );
        self.outcomes.push(Outcome {
            task,
            kind,
            result,
            retries,
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(events) = &self.events {
            if let Err(error) = events.emit(&event) {
                tracing::warn!(%error, "Failed to write event");
            }
        }
    }

    /// Drain outcomes produced since the last call.
    pub fn take_outcomes(&mut self) -> Vec<Outcome> {
        std::mem::take(&mut self.outcomes)
    }

    /// Cancel everything in flight, drop pending retries and flush knowledge.
    pub fn stop(&mut self, world: &mut W) {
        self.scheduler.clear(world);

        let inflight = std::mem::take(&mut self.inflight);
        let pending = std::mem::take(&mut self.pending_retries);
        let tasks = inflight
            .into_values()
            .map(|(task, _)| task)
            .chain(pending.into_iter().map(|p| p.task));
        for task in tasks {
            let retries = self.retry.retry_count(task.id);
            self.retry.reset_retries(task.id);
            self.push_outcome(
                task,
                OutcomeKind::Cancelled,
                ActionResult::cancelled("Executor stopped"),
                retries,
            );
        }

        if let Err(error) = self.knowledge.save() {
            tracing::warn!(%error, "Failed to save knowledge base on stop");
        }
        tracing::info!(agent = %self.agent, "Executor stopped");
    }

    pub fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            agent: self.agent.clone(),
            scheduler: self.scheduler.status(),
            pending_retries: self.pending_retries.len(),
            failures: self.tracker.total_failures(),
            insights: self.knowledge.insight_count(),
        }
    }

    pub fn recommendations(&self) -> Vec<String> {
        self.learning.recommendations(&self.knowledge)
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle() && self.pending_retries.is_empty()
    }

    pub fn pending_retry_count(&self) -> usize {
        self.pending_retries.len()
    }

    pub fn scheduler(&self) -> &ActionScheduler<W> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut ActionScheduler<W> {
        &mut self.scheduler
    }

    pub fn failure_tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn knowledge_mut(&mut self) -> &mut KnowledgeBase {
        &mut self.knowledge
    }

    pub fn learning(&self) -> &LearningSystem {
        &self.learning
    }

    pub fn retry_strategy(&self) -> &AdaptiveRetryStrategy {
        &self.retry
    }
}
