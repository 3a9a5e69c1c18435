//! Service graph (spec §3, §4.3, C4): an immutable DAG of servlet instances
//! connected by typed pipe edges, plus boundary endpoints.
//!
//! Grounded on the teacher's `compiler::ir` module, which represents a
//! compiled process as a `petgraph::DiGraph` of its own IR node/edge types;
//! here the node payload is a servlet instance and the edge payload is a
//! typed pipe descriptor instead of a BPMN instruction sequence.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::DiGraph;
pub use petgraph::graph::NodeIndex as NodeId;

use crate::error::{Error, Result};
use crate::flags::PipeFlags;
use crate::servlet::{LocalPipeId, Servlet};

/// One node in the service graph: a servlet instance plus its per-node argv.
pub struct ServiceNode {
    pub servlet: Arc<dyn Servlet>,
    pub argv: Vec<String>,
}

/// A typed pipe edge: which local pipe on the source node feeds which local
/// pipe on the destination node, the input-side flag set declared on the
/// edge, and the type expression that the type inferrer resolves (spec §4.3).
#[derive(Debug, Clone)]
pub struct ServiceEdge {
    pub source_pipe: LocalPipeId,
    pub dest_pipe: LocalPipeId,
    pub input_flags: PipeFlags,
    pub type_expr: String,
    /// Filled in by the type inferrer (C5); `None` before inference runs.
    pub resolved_type: Option<String>,
    pub header_size: Option<usize>,
}

type Graph = DiGraph<ServiceNode, ServiceEdge>;

/// An immutable, read-only-after-construction DAG of servlet instances. Once
/// built and type-checked, a `Service` is shared across every request that
/// flows through it.
pub struct Service {
    graph: Graph,
    pub input_boundary: (NodeId, LocalPipeId),
    pub output_boundary: (NodeId, LocalPipeId),
}

/// Descriptor of one outgoing or incoming edge, as returned by the lookup
/// helpers the type inferrer and step engine both need.
#[derive(Debug, Clone, Copy)]
pub struct PipeDescriptor {
    pub source_node: NodeId,
    pub source_pipe: LocalPipeId,
    pub destination_node: NodeId,
    pub destination_pipe: LocalPipeId,
}

/// Builder for a [`Service`]; the scripting language that would normally
/// produce these graphs from a textual DSL is out of scope (spec §1) — here
/// graphs are built directly through this in-Rust API.
pub struct ServiceBuilder {
    graph: Graph,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        ServiceBuilder { graph: DiGraph::new() }
    }

    pub fn add_node(&mut self, servlet: Arc<dyn Servlet>, argv: Vec<String>) -> NodeId {
        self.graph.add_node(ServiceNode { servlet, argv })
    }

    pub fn add_edge(
        &mut self,
        source_node: NodeId,
        source_pipe: LocalPipeId,
        dest_node: NodeId,
        dest_pipe: LocalPipeId,
        input_flags: PipeFlags,
        type_expr: impl Into<String>,
    ) {
        self.graph.add_edge(
            source_node,
            dest_node,
            ServiceEdge {
                source_pipe,
                dest_pipe,
                input_flags,
                type_expr: type_expr.into(),
                resolved_type: None,
                header_size: None,
            },
        );
    }

    pub fn build(
        self,
        input_boundary: (NodeId, LocalPipeId),
        output_boundary: (NodeId, LocalPipeId),
    ) -> Result<Service> {
        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(Error::InvalidArg("service graph must be acyclic".into()));
        }
        // Spec §3: a servlet instance is "immutable after init" — run every
        // node's init hook once, here, before the service is ever handed a
        // request (spec §6's init(ctx, argc, argv) for the servlet record).
        for node in self.graph.node_indices() {
            let weight = &self.graph[node];
            weight.servlet.init(&weight.argv)?;
        }
        tracing::debug!(
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "service graph built"
        );
        Ok(Service { graph: self.graph, input_boundary, output_boundary })
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Service {
    pub fn node(&self, id: NodeId) -> &ServiceNode {
        &self.graph[id]
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices()
    }

    pub fn input_node(&self) -> NodeId {
        self.input_boundary.0
    }

    /// Incoming edges to `node`, in declaration order.
    pub fn incoming(&self, node: NodeId) -> Vec<PipeDescriptor> {
        use petgraph::Direction;
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| PipeDescriptor {
                source_node: e.source(),
                source_pipe: e.weight().source_pipe,
                destination_node: e.target(),
                destination_pipe: e.weight().dest_pipe,
            })
            .collect();
        edges.sort_by_key(|d| d.destination_pipe);
        edges
    }

    /// Outgoing edges from `node`, in declaration order.
    pub fn outgoing(&self, node: NodeId) -> Vec<PipeDescriptor> {
        use petgraph::Direction;
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| PipeDescriptor {
                source_node: e.source(),
                source_pipe: e.weight().source_pipe,
                destination_node: e.target(),
                destination_pipe: e.weight().dest_pipe,
            })
            .collect();
        edges.sort_by_key(|d| d.source_pipe);
        edges
    }

    pub fn edge_flags(&self, node: NodeId, pipe: LocalPipeId, outgoing: bool) -> Result<PipeFlags> {
        use petgraph::Direction;
        let dir = if outgoing { Direction::Outgoing } else { Direction::Incoming };
        for e in self.graph.edges_directed(node, dir) {
            let local = if outgoing { e.weight().source_pipe } else { e.weight().dest_pipe };
            if local == pipe {
                return Ok(e.weight().input_flags);
            }
        }
        Err(Error::InvalidArg(format!("no edge for pipe {pipe} on node {node:?}")))
    }

    pub fn edge_type_expr(&self, node: NodeId, pipe: LocalPipeId, outgoing: bool) -> Option<String> {
        use petgraph::Direction;
        let dir = if outgoing { Direction::Outgoing } else { Direction::Incoming };
        self.graph.edges_directed(node, dir).find_map(|e| {
            let local = if outgoing { e.weight().source_pipe } else { e.weight().dest_pipe };
            (local == pipe).then(|| e.weight().type_expr.clone())
        })
    }

    pub fn set_resolved_type(
        &mut self,
        node: NodeId,
        pipe: LocalPipeId,
        outgoing: bool,
        resolved: String,
        header_size: usize,
    ) -> Result<()> {
        use petgraph::Direction;
        let dir = if outgoing { Direction::Outgoing } else { Direction::Incoming };
        let edge = self
            .graph
            .edges_directed(node, dir)
            .find(|e| {
                let local = if outgoing { e.weight().source_pipe } else { e.weight().dest_pipe };
                local == pipe
            })
            .map(|e| e.id())
            .ok_or_else(|| Error::InvalidArg(format!("no edge for pipe {pipe} on node {node:?}")))?;
        let weight = &mut self.graph[edge];
        weight.resolved_type = Some(resolved);
        weight.header_size = Some(header_size);
        Ok(())
    }

    pub fn resolved_type(&self, node: NodeId, pipe: LocalPipeId, outgoing: bool) -> Option<(&str, usize)> {
        use petgraph::Direction;
        let dir = if outgoing { Direction::Outgoing } else { Direction::Incoming };
        self.graph.edges_directed(node, dir).find_map(|e| {
            let local = if outgoing { e.weight().source_pipe } else { e.weight().dest_pipe };
            if local != pipe {
                return None;
            }
            let w = e.weight();
            Some((w.resolved_type.as_deref()?, w.header_size?))
        })
    }

    /// Topological order of node ids, used by the type inferrer (spec §4.3:
    /// "runs once at graph-build time, in topological order from the input node").
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        petgraph::algo::toposort(&self.graph, None)
            .map_err(|_| Error::InvalidArg("service graph contains a cycle".into()))
    }

    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }

    /// All pipe-descriptor maps keyed by destination node, used by the
    /// critical cluster analysis (C6) to walk reachability.
    pub fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.neighbors_directed(node, petgraph::Direction::Outgoing)
    }
}

impl Drop for Service {
    /// Mirror image of `build()`'s init pass: every node's servlet gets one
    /// `unload()` call once the service itself is dropped, i.e. once every
    /// request against it has finished (spec §3, §6).
    fn drop(&mut self) {
        for node in self.graph.node_indices() {
            self.graph[node].servlet.unload();
        }
    }
}

/// A lookup table from `(NodeId, LocalPipeId)` to the global arena
/// [`crate::pipe::PipeId`] currently bound there for one task, used by
/// several components that need "what handle backs this node's pipe".
pub type PipeBindings = HashMap<(NodeId, LocalPipeId), crate::pipe::PipeId>;
