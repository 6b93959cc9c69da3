use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-step dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub(crate) session: AtomicU64,
    pub(crate) action: AtomicU64,
    pub(crate) command: AtomicU64,
    pub(crate) pipeline: AtomicU64,
    pub(crate) condition: AtomicU64,
    pub(crate) input: AtomicU64,
    pub(crate) group: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) duplicate: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    pub bot_run_session_total: u64,
    pub bot_run_action_total: u64,
    pub bot_run_command_total: u64,
    pub bot_trigger_pipeline_total: u64,
    pub bot_run_condition_total: u64,
    pub bot_run_input_total: u64,
    pub bot_run_group_total: u64,
    pub dropped_total: u64,
    pub duplicate_total: u64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DispatchSnapshot {
            bot_run_session_total: get(&self.session),
            bot_run_action_total: get(&self.action),
            bot_run_command_total: get(&self.command),
            bot_trigger_pipeline_total: get(&self.pipeline),
            bot_run_condition_total: get(&self.condition),
            bot_run_input_total: get(&self.input),
            bot_run_group_total: get(&self.group),
            dropped_total: get(&self.dropped),
            duplicate_total: get(&self.duplicate),
        }
    }
}
