//! Critical-cluster analysis (spec §4.4, C6).
//!
//! A node is *critical* exactly when spec §4.4 defines it: cancelling any of
//! its outputs forces the request's output endpoint to be cancelled — i.e.
//! every path from the input boundary to the output boundary passes through
//! it. That is precisely graph dominance of the output boundary node, so
//! this is computed with `petgraph`'s dominator-tree algorithm rather than a
//! hand-rolled reachability walk.
//!
//! The retrieved original source shows only the *consumption* side of this
//! analysis (`task.c`'s use of a precomputed `sched_cnode_info_t`), not the
//! analysis itself, so the dominance formulation here is this crate's own
//! reading of spec §4.4's definition — recorded as a design decision in
//! DESIGN.md rather than a line-for-line port.

use std::collections::{HashMap, HashSet};

use petgraph::algo::dominators::{self, Dominators};

use crate::graph::{NodeId, PipeDescriptor, Service};

/// Precomputed cancellation info for one node.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    /// Edges that must be cancelled, atomically, if this node cancels.
    pub boundary: Vec<PipeDescriptor>,
    /// Whether the request's output boundary endpoint is cancelled too.
    pub output_cancelled: bool,
}

/// Per-node critical-cluster info for one service, computed once after type
/// inference and shared read-only across every request against that service.
pub struct ClusterAnalysis {
    info: HashMap<NodeId, ClusterInfo>,
}

impl ClusterAnalysis {
    pub fn analyze(service: &Service) -> Self {
        let doms: Dominators<NodeId> = dominators::simple_fast(service.graph(), service.input_node());
        let output_node = service.output_boundary.0;

        let critical: HashSet<NodeId> = doms
            .dominators(output_node)
            .map(|iter| iter.collect())
            .unwrap_or_default();

        let mut info = HashMap::new();
        for node in service.node_indices() {
            let is_critical = critical.contains(&node);
            let boundary = if is_critical {
                service.outgoing(node)
            } else {
                Vec::new()
            };
            info.insert(node, ClusterInfo { boundary, output_cancelled: is_critical });
        }

        tracing::debug!(
            nodes = info.len(),
            critical = info.values().filter(|i| i.output_cancelled).count(),
            "critical-cluster analysis complete"
        );
        ClusterAnalysis { info }
    }

    pub fn get(&self, node: NodeId) -> &ClusterInfo {
        &self.info[&node]
    }

    pub fn is_critical(&self, node: NodeId) -> bool {
        !self.info[&node].boundary.is_empty() || self.info[&node].output_cancelled
    }
}
