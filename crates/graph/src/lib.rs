//! World graph: incremental DAG of worlds and portal edges, distance-bounded
//! traversal planning.
//!
//! # Invariants
//! - A node exists for every URL referenced by any edge or used as a root.
//! - At most one edge per (source, destination) pair; first write wins.
//! - Plans are pure functions of (graph, root, radius); nothing is cached
//!   between syncs.

mod plan;
mod world_graph;

pub use plan::{PlannedPortal, PlannedWorld, TraversalPlan};
pub use world_graph::{PortalEdge, WorldGraph, WorldNode};

pub fn crate_info() -> &'static str {
    "roam-graph v0.1.0"
}
