use roam_common::{PortalSpec, WorldDescriptor, WorldUrl};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One world in the graph.
///
/// Created when its URL is first referenced, either as a traversal root or
/// as a portal endpoint. The descriptor is attached later, once fetched.
#[derive(Debug, Clone, Default)]
pub struct WorldNode {
    pub descriptor: Option<WorldDescriptor>,
    pub outgoing: BTreeSet<WorldUrl>,
    pub incoming: BTreeSet<WorldUrl>,
}

/// A directed portal edge between two worlds.
#[derive(Debug, Clone)]
pub struct PortalEdge {
    pub source: WorldUrl,
    pub destination: WorldUrl,
    pub portal: PortalSpec,
}

/// The in-memory graph of discovered worlds and portals.
///
/// Built incrementally as descriptors arrive; never shrinks. Distance
/// queries treat edges as undirected (a portal pair is crossable both
/// ways), while edge lookups stay directed because the placement data lives
/// on the authoring side.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration order, so plans are
/// reproducible for a given discovery history.
#[derive(Debug, Clone, Default)]
pub struct WorldGraph {
    nodes: BTreeMap<WorldUrl, WorldNode>,
    edges: BTreeMap<(WorldUrl, WorldUrl), PortalEdge>,
}

impl WorldGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a node exists for `url`; attach `descriptor` if the node has
    /// none yet. Idempotent; an already-attached descriptor is kept.
    pub fn add_world(&mut self, url: &WorldUrl, descriptor: Option<WorldDescriptor>) {
        let node = self.nodes.entry(url.clone()).or_default();
        if node.descriptor.is_none() {
            node.descriptor = descriptor;
        }
    }

    /// Add a directed edge. Idempotent per (source, destination): the first
    /// portal spec written wins and a duplicate add is a no-op.
    /// Returns whether the edge was newly inserted.
    pub fn add_portal(
        &mut self,
        source: &WorldUrl,
        destination: &WorldUrl,
        portal: PortalSpec,
    ) -> bool {
        let key = (source.clone(), destination.clone());
        if self.edges.contains_key(&key) {
            return false;
        }
        self.add_world(source, None);
        self.add_world(destination, None);
        if let Some(node) = self.nodes.get_mut(source) {
            node.outgoing.insert(destination.clone());
        }
        if let Some(node) = self.nodes.get_mut(destination) {
            node.incoming.insert(source.clone());
        }
        self.edges.insert(
            key,
            PortalEdge {
                source: source.clone(),
                destination: destination.clone(),
                portal,
            },
        );
        true
    }

    /// Attach a fetched descriptor and feed its portal list into the graph.
    pub fn ingest_descriptor(&mut self, url: &WorldUrl, descriptor: WorldDescriptor) {
        let portals = descriptor.portals.clone();
        self.add_world(url, Some(descriptor));
        for portal in portals {
            let destination = portal.destination.url.clone();
            self.add_portal(url, &destination, portal);
        }
    }

    pub fn node(&self, url: &WorldUrl) -> Option<&WorldNode> {
        self.nodes.get(url)
    }

    pub fn descriptor(&self, url: &WorldUrl) -> Option<&WorldDescriptor> {
        self.nodes.get(url).and_then(|n| n.descriptor.as_ref())
    }

    pub fn has_descriptor(&self, url: &WorldUrl) -> bool {
        self.descriptor(url).is_some()
    }

    pub fn edge(&self, source: &WorldUrl, destination: &WorldUrl) -> Option<&PortalEdge> {
        self.edges.get(&(source.clone(), destination.clone()))
    }

    pub fn worlds(&self) -> impl Iterator<Item = &WorldUrl> {
        self.nodes.keys()
    }

    pub fn world_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn portal_count(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn edges(&self) -> &BTreeMap<(WorldUrl, WorldUrl), PortalEdge> {
        &self.edges
    }

    /// Breadth-first distances from `root` over the union of outgoing and
    /// incoming neighbors. The root is always present at distance 0, even
    /// before it has been added to the graph; unreachable nodes are absent.
    pub fn calculate_distances(&self, root: &WorldUrl) -> BTreeMap<WorldUrl, u32> {
        let mut distances = BTreeMap::new();
        distances.insert(root.clone(), 0u32);
        let mut queue = VecDeque::new();
        queue.push_back(root.clone());

        while let Some(url) = queue.pop_front() {
            let next = distances[&url] + 1;
            let Some(node) = self.nodes.get(&url) else {
                continue;
            };
            for neighbor in node.outgoing.iter().chain(node.incoming.iter()) {
                if !distances.contains_key(neighbor) {
                    distances.insert(neighbor.clone(), next);
                    queue.push_back(neighbor.clone());
                }
            }
        }
        distances
    }
}
