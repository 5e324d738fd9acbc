// src/dag/graph.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::plan::StageSpec;
use crate::errors::{Result, StagedagError};
use crate::types::StageId;

/// Internal node structure: stores immediate upstreams and dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StageNode {
    /// Stages whose output this stage consumes.
    upstream: Vec<StageId>,
    /// Stages that consume this stage's output.
    dependents: Vec<StageId>,
}

/// In-memory stage DAG keyed by stage id, with its topological order.
///
/// Upstream ids must already be known stages; [`PhysicalPlan`] checks that
/// before building the graph.
///
/// [`PhysicalPlan`]: crate::dag::PhysicalPlan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagGraph {
    nodes: BTreeMap<StageId, StageNode>,
    order: Vec<StageId>,
}

impl DagGraph {
    /// Build the adjacency lists and sort the stages.
    ///
    /// Nodes and edges are inserted in stage-id order, so the resulting
    /// topological order is the same for every build of the same plan.
    pub fn from_stages<'a>(stages: impl IntoIterator<Item = &'a StageSpec>) -> Result<Self> {
        let mut nodes: BTreeMap<StageId, StageNode> = BTreeMap::new();

        for stage in stages {
            nodes.insert(
                stage.id.clone(),
                StageNode {
                    upstream: stage.upstream.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        let stage_ids: Vec<StageId> = nodes.keys().cloned().collect();
        for stage_id in stage_ids {
            let upstream = nodes
                .get(&stage_id)
                .map(|n| n.upstream.clone())
                .unwrap_or_default();

            for up in upstream {
                if let Some(up_node) = nodes.get_mut(&up) {
                    up_node.dependents.push(stage_id.clone());
                }
            }
        }

        let order = sort_stages(&nodes)?;
        Ok(Self { nodes, order })
    }

    /// Immediate upstream stages.
    pub fn upstream_of(&self, stage: &str) -> &[StageId] {
        self.nodes
            .get(stage)
            .map(|n| n.upstream.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents.
    pub fn dependents_of(&self, stage: &str) -> &[StageId] {
        self.nodes
            .get(stage)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Stages without upstream dependencies.
    pub fn sources(&self) -> Vec<StageId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.upstream.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every stage after all of its upstream stages.
    pub fn topological_order(&self) -> Vec<StageId> {
        self.order.clone()
    }
}

/// Edge direction: upstream -> stage.
fn sort_stages(nodes: &BTreeMap<StageId, StageNode>) -> Result<Vec<StageId>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for id in nodes.keys() {
        graph.add_node(id.as_str());
    }
    for (id, node) in nodes.iter() {
        for up in node.upstream.iter() {
            graph.add_edge(up.as_str(), id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(StagedagError::DagCycle(format!(
            "cycle detected in stage DAG involving stage '{}'",
            cycle.node_id()
        ))),
    }
}
