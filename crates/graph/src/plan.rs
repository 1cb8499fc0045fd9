use crate::world_graph::WorldGraph;
use roam_common::WorldUrl;

/// One world selected for loading, with its BFS distance from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWorld {
    pub url: WorldUrl,
    pub distance: u32,
}

/// One portal edge selected for wiring; both endpoints are in the load set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPortal {
    pub source: WorldUrl,
    pub destination: WorldUrl,
}

/// The load/flush/wire partition for one (root, radius) pair.
///
/// Recomputed on every sync; never persisted.
#[derive(Debug, Clone, Default)]
pub struct TraversalPlan {
    /// Worlds within the hop radius, ascending by (distance, url).
    pub worlds_to_load: Vec<PlannedWorld>,
    /// Edges where the source is strictly inside the radius and the
    /// destination is within it.
    pub portals_to_setup: Vec<PlannedPortal>,
    /// Every known world outside the load set, including unreachable ones.
    pub worlds_to_flush: Vec<WorldUrl>,
}

impl TraversalPlan {
    pub fn is_planned_for_load(&self, url: &WorldUrl) -> bool {
        self.worlds_to_load.iter().any(|w| &w.url == url)
    }
}

impl WorldGraph {
    /// Partition the graph around `root` at the given hop radius.
    ///
    /// An edge joins `portals_to_setup` only if its source distance is
    /// *strictly less than* the radius: a portal whose source world sits on
    /// the boundary would lead out of the loaded set, so it stays unwired.
    pub fn traversal_plan(&self, root: &WorldUrl, hop_radius: u32) -> TraversalPlan {
        let distances = self.calculate_distances(root);

        let mut worlds_to_load: Vec<PlannedWorld> = distances
            .iter()
            .filter(|(_, d)| **d <= hop_radius)
            .map(|(url, d)| PlannedWorld {
                url: url.clone(),
                distance: *d,
            })
            .collect();
        worlds_to_load.sort_by(|a, b| a.distance.cmp(&b.distance).then(a.url.cmp(&b.url)));

        let worlds_to_flush: Vec<WorldUrl> = self
            .worlds()
            .filter(|url| distances.get(url).is_none_or(|d| *d > hop_radius))
            .cloned()
            .collect();

        let portals_to_setup: Vec<PlannedPortal> = self
            .edges()
            .values()
            .filter(|edge| {
                let src = distances.get(&edge.source);
                let dst = distances.get(&edge.destination);
                matches!((src, dst), (Some(s), Some(d)) if *s < hop_radius && *d <= hop_radius)
            })
            .map(|edge| PlannedPortal {
                source: edge.source.clone(),
                destination: edge.destination.clone(),
            })
            .collect();

        tracing::trace!(
            root = %root,
            hop_radius,
            load = worlds_to_load.len(),
            flush = worlds_to_flush.len(),
            portals = portals_to_setup.len(),
            "traversal plan computed"
        );

        TraversalPlan {
            worlds_to_load,
            portals_to_setup,
            worlds_to_flush,
        }
    }
}
