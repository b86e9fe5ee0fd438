/// Per-tick context handed to every scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    pub tick: u64,
    pub dt_seconds: f32,
}

impl TickContext {
    /// Context for a host clock running at `hz` ticks per second.
    pub fn at_rate(tick: u64, hz: u32) -> Self {
        Self {
            tick,
            dt_seconds: 1.0 / (hz.max(1) as f32),
        }
    }
}

/// Per-action tick budget.
///
/// The scheduler has no notion of timeouts; long-running actions own one of
/// these and turn exhaustion into [`ActionResult::timeout`](crate::ActionResult::timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickBudget {
    elapsed: u32,
    max_ticks: u32,
}

impl TickBudget {
    pub fn new(max_ticks: u32) -> Self {
        Self {
            elapsed: 0,
            max_ticks,
        }
    }

    /// Count one tick. Returns `true` once the budget is exhausted.
    pub fn advance(&mut self) -> bool {
        self.elapsed = self.elapsed.saturating_add(1);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.elapsed >= self.max_ticks
    }

    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    pub fn remaining(&self) -> u32 {
        self.max_ticks.saturating_sub(self.elapsed)
    }
}
