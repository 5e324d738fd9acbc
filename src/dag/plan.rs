// src/dag/plan.rs

//! Immutable physical plan handed to the scheduler.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::dag::graph::DagGraph;
use crate::dag::task_group::TaskGroupId;
use crate::errors::{Result, StagedagError};
use crate::types::StageId;

/// Placement preference declared by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalityHint {
    /// No preference; any executor with a free slot will do.
    #[default]
    None,
    /// Prefer executors that hold output produced by upstream task groups.
    UpstreamOutput,
}

/// One DAG node: `parallelism` structurally identical task groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub id: StageId,
    pub parallelism: usize,
    pub upstream: Vec<StageId>,
    pub locality: LocalityHint,
}

impl StageSpec {
    pub fn new(id: impl Into<StageId>, parallelism: usize) -> Self {
        Self {
            id: id.into(),
            parallelism,
            upstream: Vec::new(),
            locality: LocalityHint::None,
        }
    }

    /// Add an upstream dependency (duplicates are ignored).
    pub fn after(mut self, upstream: impl Into<StageId>) -> Self {
        let upstream = upstream.into();
        if !self.upstream.contains(&upstream) {
            self.upstream.push(upstream);
        }
        self
    }

    pub fn with_locality(mut self, locality: LocalityHint) -> Self {
        self.locality = locality;
        self
    }

    /// Ids of every task group in this stage, by index.
    pub fn task_group_ids(&self) -> impl Iterator<Item = TaskGroupId> + '_ {
        (0..self.parallelism).map(move |index| TaskGroupId::new(self.id.clone(), index))
    }

    /// Whether `other` has the same DAG shape: partitioning and upstream set.
    pub fn same_shape(&self, other: &StageSpec) -> bool {
        let ours: BTreeSet<&StageId> = self.upstream.iter().collect();
        let theirs: BTreeSet<&StageId> = other.upstream.iter().collect();
        self.parallelism == other.parallelism && ours == theirs
    }
}

/// A validated DAG of stages.
#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    id: String,
    stages: BTreeMap<StageId, StageSpec>,
    graph: DagGraph,
}

impl PhysicalPlan {
    /// Validate the stages and build the plan.
    ///
    /// Rejects empty plans, duplicate ids, zero parallelism, unknown or
    /// self-referencing upstreams. Cycles are found while sorting the graph.
    pub fn new(id: impl Into<String>, stages: impl IntoIterator<Item = StageSpec>) -> Result<Self> {
        let id = id.into();
        let mut by_id = BTreeMap::new();
        for stage in stages {
            if by_id.contains_key(&stage.id) {
                return Err(StagedagError::InvalidPlan(format!(
                    "plan '{}' declares stage '{}' twice",
                    id, stage.id
                )));
            }
            by_id.insert(stage.id.clone(), stage);
        }

        validate_stages(&id, &by_id)?;

        let graph = DagGraph::from_stages(by_id.values())?;
        Ok(Self {
            id,
            stages: by_id,
            graph,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.stages.values()
    }

    pub fn stage(&self, id: &str) -> Option<&StageSpec> {
        self.stages.get(id)
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn task_group_count(&self) -> usize {
        self.stages.values().map(|s| s.parallelism).sum()
    }
}

fn validate_stages(plan_id: &str, stages: &BTreeMap<StageId, StageSpec>) -> Result<()> {
    if stages.is_empty() {
        return Err(StagedagError::InvalidPlan(format!(
            "plan '{plan_id}' must contain at least one stage"
        )));
    }

    for (id, stage) in stages.iter() {
        if stage.parallelism == 0 {
            return Err(StagedagError::InvalidPlan(format!(
                "stage '{id}' must have parallelism >= 1"
            )));
        }
        for up in stage.upstream.iter() {
            if up == id {
                return Err(StagedagError::InvalidPlan(format!(
                    "stage '{id}' cannot depend on itself"
                )));
            }
            if !stages.contains_key(up) {
                return Err(StagedagError::InvalidPlan(format!(
                    "stage '{id}' has unknown upstream stage '{up}'"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_cycles_with_structured_error() {
        let result = PhysicalPlan::new(
            "p",
            vec![StageSpec::new("a", 1).after("b"), StageSpec::new("b", 1).after("a")],
        );
        match result {
            Err(StagedagError::DagCycle(msg)) => assert!(msg.contains("cycle detected")),
            other => panic!("expected DagCycle, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_upstream_and_zero_parallelism() {
        let unknown = PhysicalPlan::new("p", vec![StageSpec::new("a", 1).after("ghost")]);
        assert!(matches!(unknown, Err(StagedagError::InvalidPlan(msg)) if msg.contains("ghost")));

        let zero = PhysicalPlan::new("p", vec![StageSpec::new("a", 0)]);
        assert!(matches!(zero, Err(StagedagError::InvalidPlan(_))));

        let empty = PhysicalPlan::new("p", Vec::new());
        assert!(matches!(empty, Err(StagedagError::InvalidPlan(_))));
    }

    #[test]
    fn shape_ignores_upstream_order_and_locality() {
        let a = StageSpec::new("s", 2).after("x").after("y");
        let b = StageSpec::new("s", 2)
            .after("y")
            .after("x")
            .with_locality(LocalityHint::UpstreamOutput);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&StageSpec::new("s", 3).after("x").after("y")));
    }
}
