// src/metrics.rs

//! Metric events emitted by the scheduler.
//!
//! Sinks are fire-and-forget: the runtime logs a failing sink and carries
//! on, so a broken sink can never change a scheduling decision.

use std::collections::VecDeque;

use tracing::debug;

use crate::dag::{TaskGroupId, TaskGroupState};
use crate::errors::Result;
use crate::types::{Attempt, ExecutorId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    TaskGroupTransition {
        job_id: String,
        task_group: TaskGroupId,
        from: TaskGroupState,
        to: TaskGroupState,
        attempt: Attempt,
    },
    Launched {
        job_id: String,
        task_group: TaskGroupId,
        attempt: Attempt,
        executor: ExecutorId,
    },
    StaleEventDropped {
        task_group: TaskGroupId,
        attempt: Attempt,
        reason: String,
    },
    Escalated {
        job_id: String,
        task_group: TaskGroupId,
        reason: String,
    },
    JobCompleted {
        job_id: String,
    },
}

pub trait MetricSink: Send {
    fn record(&mut self, event: MetricEvent) -> Result<()>;
}

/// Writes every metric event to the `tracing` pipeline at debug level.
#[derive(Debug, Default)]
pub struct TracingMetricSink;

impl MetricSink for TracingMetricSink {
    fn record(&mut self, event: MetricEvent) -> Result<()> {
        debug!(target: "stagedag::metrics", ?event, "metric");
        Ok(())
    }
}

/// Bounded in-memory sink, handy for diagnostics and tests.
#[derive(Debug)]
pub struct InMemoryMetricSink {
    events: VecDeque<MetricEvent>,
    max_events: usize,
}

impl InMemoryMetricSink {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events: max_events.max(1),
        }
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.iter().cloned().collect()
    }
}

impl MetricSink for InMemoryMetricSink {
    fn record(&mut self, event: MetricEvent) -> Result<()> {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
        Ok(())
    }
}
