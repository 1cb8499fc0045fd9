use crate::backend::{
    AudioBackend, CharacterBackend, CrossingDirection, DescriptorSource, PhysicsBackend,
    PortalCrossing, PortalPairId, PortalPairSpec, SceneBackend,
};
use crate::discovery::run_discovery;
use crate::error::SyncError;
use crate::preload::CollisionBacklog;
use crate::state::{PortalPairInstance, WorldRuntimeState};
use roam_common::{WorldDescriptor, WorldUrl};
use roam_graph::WorldGraph;
use roam_universe::{SlotAllocator, placement_to_universe};
use std::collections::{BTreeMap, BTreeSet};

/// Orchestration configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum graph distance, in portal hops, kept loaded around the root.
    pub hop_radius: u32,
    /// Load collision geometry for every in-range world during the sync
    /// itself instead of deferring non-root worlds to the backlog.
    pub eager_collision: bool,
    /// Position tolerance for portal de-duplication. Heuristic: two portals
    /// authored closer than this with the same destination are treated as
    /// one.
    pub portal_epsilon: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hop_radius: 2,
            eager_collision: false,
            portal_epsilon: 0.01,
        }
    }
}

/// Counters from the most recent sync, for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub descriptors_fetched: usize,
    pub worlds_loaded: usize,
    pub worlds_flushed: usize,
    pub portals_wired: usize,
    pub warnings: usize,
}

/// The two worlds a wired portal pair connects.
#[derive(Debug, Clone)]
struct PortalRoute {
    source: WorldUrl,
    destination: WorldUrl,
}

type WorldChangeFn = Box<dyn FnMut(&WorldUrl, &WorldDescriptor)>;

/// Collaborator bundle handed to the orchestrator at construction.
pub struct Collaborators {
    pub source: Box<dyn DescriptorSource>,
    pub scene: Box<dyn SceneBackend>,
    pub physics: Box<dyn PhysicsBackend>,
    pub characters: Box<dyn CharacterBackend>,
    pub audio: Box<dyn AudioBackend>,
}

/// Top-level sequencer: turns portal crossings into discovery, flush, load,
/// and portal-wiring phases.
///
/// Owns all mutable streaming state explicitly (the graph, the slot
/// allocator, per-world runtime state) and serializes syncs: a sync
/// requested while one is in flight is coalesced into a single re-sync to
/// the latest root once the current pass completes. The flush phase always
/// completes before the load phase, so a world number is never doubly
/// resident.
pub struct Orchestrator {
    config: SyncConfig,
    graph: WorldGraph,
    slots: SlotAllocator,
    loaded: BTreeMap<WorldUrl, WorldRuntimeState>,
    routes: BTreeMap<PortalPairId, PortalRoute>,
    backlog: CollisionBacklog,
    current_root: Option<WorldUrl>,
    collaborators: Collaborators,
    on_world_change: Option<WorldChangeFn>,
    in_sync: bool,
    pending: Option<(WorldUrl, Option<WorldUrl>)>,
    stats: SyncStats,
}

impl Orchestrator {
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            graph: WorldGraph::new(),
            slots: SlotAllocator::new(),
            loaded: BTreeMap::new(),
            routes: BTreeMap::new(),
            backlog: CollisionBacklog::new(),
            current_root: None,
            collaborators,
            on_world_change: None,
            in_sync: false,
            pending: None,
            stats: SyncStats::default(),
        }
    }

    /// Register the observer fired once per completed sync with the new
    /// root's descriptor.
    pub fn set_on_world_change(&mut self, callback: WorldChangeFn) {
        self.on_world_change = Some(callback);
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn graph(&self) -> &WorldGraph {
        &self.graph
    }

    pub fn current_root(&self) -> Option<&WorldUrl> {
        self.current_root.as_ref()
    }

    pub fn is_resident(&self, url: &WorldUrl) -> bool {
        self.loaded.contains_key(url)
    }

    pub fn resident(&self, url: &WorldUrl) -> Option<&WorldRuntimeState> {
        self.loaded.get(url)
    }

    pub fn resident_worlds(&self) -> impl Iterator<Item = &WorldUrl> {
        self.loaded.keys()
    }

    /// Statistics from the most recent completed sync.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// The wired pair leading from `source` to `destination`, if any.
    pub fn portal_between(
        &self,
        source: &WorldUrl,
        destination: &WorldUrl,
    ) -> Option<PortalPairId> {
        self.routes.iter().find_map(|(id, route)| {
            (&route.source == source && &route.destination == destination).then_some(*id)
        })
    }

    /// React to a portal crossing: sync to the far side with the near side
    /// protected as previous root, then let physics rebase.
    pub fn handle_crossing(&mut self, crossing: PortalCrossing) -> Result<(), SyncError> {
        let Some(route) = self.routes.get(&crossing.pair).cloned() else {
            tracing::warn!(pair = ?crossing.pair, "crossing on unknown portal pair ignored");
            return Ok(());
        };
        let (to, from) = match crossing.direction {
            CrossingDirection::Forward => (route.destination, route.source),
            CrossingDirection::Reverse => (route.source, route.destination),
        };
        tracing::info!(from = %from, to = %to, "portal crossed");
        self.sync(to, Some(from))?;
        self.collaborators.physics.resync();
        Ok(())
    }

    /// Re-center the streamed set on `new_root`.
    ///
    /// `previous_root` is exempt from this cycle's flush so its return
    /// portal stays usable. Requests arriving while a sync is in flight are
    /// coalesced: only the latest is re-run afterwards.
    pub fn sync(
        &mut self,
        new_root: WorldUrl,
        previous_root: Option<WorldUrl>,
    ) -> Result<(), SyncError> {
        if self.in_sync {
            tracing::debug!(root = %new_root, "sync already in flight, coalescing");
            self.pending = Some((new_root, previous_root));
            return Ok(());
        }

        self.in_sync = true;
        let mut next = Some((new_root, previous_root));
        let mut result = Ok(());
        while let Some((root, previous)) = next {
            result = self.run_sync(root, previous);
            if result.is_err() {
                self.pending = None;
                break;
            }
            next = self.pending.take();
        }
        self.in_sync = false;
        result
    }

    fn run_sync(&mut self, root: WorldUrl, previous: Option<WorldUrl>) -> Result<(), SyncError> {
        let _span = tracing::info_span!("sync", root = %root).entered();
        let mut stats = SyncStats::default();

        // Phase 1: the root's descriptor is mandatory.
        self.graph.add_world(&root, None);
        if !self.graph.has_descriptor(&root) {
            let descriptor =
                self.collaborators
                    .source
                    .fetch(&root)
                    .map_err(|source| SyncError::RootDiscovery {
                        url: root.clone(),
                        source,
                    })?;
            self.graph.ingest_descriptor(&root, descriptor);
            stats.descriptors_fetched += 1;
        }

        // Phase 2: discovery to fixpoint.
        let outcome = run_discovery(
            &mut self.graph,
            self.collaborators.source.as_mut(),
            &root,
            self.config.hop_radius,
        );
        stats.descriptors_fetched += outcome.descriptors_fetched;
        stats.warnings += outcome.fetch_failures;

        // Phase 3: plan.
        let plan = self.graph.traversal_plan(&root, self.config.hop_radius);

        // Phase 4: flush everything out of range, except the previous root.
        let mut flushed: BTreeSet<WorldUrl> = BTreeSet::new();
        for url in &plan.worlds_to_flush {
            if previous.as_ref() == Some(url) {
                tracing::debug!(world = %url, "previous root held for one cycle");
                // Held, not loaded: it skips the load phase, so its
                // characters must be hidden here.
                if self.loaded.get(url).is_some_and(|s| s.characters_spawned) {
                    self.collaborators.characters.set_visible(url, false);
                }
                continue;
            }
            if let Some(state) = self.loaded.remove(url) {
                self.release_world(url, state);
                flushed.insert(url.clone());
                stats.worlds_flushed += 1;
            }
        }
        self.dispose_dangling_pairs(&flushed);

        // Phase 5: load in ascending-distance order.
        for planned in &plan.worlds_to_load {
            let url = planned.url.clone();
            let Some(descriptor) = self.graph.descriptor(&url).cloned() else {
                tracing::warn!(world = %url, "no descriptor after discovery, world skipped");
                stats.warnings += 1;
                continue;
            };
            let is_root = url == root;
            self.load_world(&url, &descriptor, is_root, &mut stats);
        }

        // Phase 6: wire portals whose endpoints are both resident.
        for planned in &plan.portals_to_setup {
            self.wire_portal(&planned.source, &planned.destination, &mut stats);
        }

        // Phase 7: commit the new root and reschedule background work.
        self.current_root = Some(root.clone());
        self.rebuild_backlog(&root);

        tracing::info!(
            loaded = stats.worlds_loaded,
            flushed = stats.worlds_flushed,
            portals = stats.portals_wired,
            fetched = stats.descriptors_fetched,
            warnings = stats.warnings,
            "sync complete"
        );
        self.stats = stats;

        if let Some(callback) = self.on_world_change.as_mut() {
            if let Some(descriptor) = self.graph.descriptor(&root) {
                callback(&root, descriptor);
            }
        }
        Ok(())
    }

    /// Release every handle a flushed world holds and recycle its number.
    fn release_world(&mut self, url: &WorldUrl, state: WorldRuntimeState) {
        tracing::debug!(world = %url, number = ?state.number, "flushing world");
        for pair in &state.portal_pairs {
            self.collaborators.scene.destroy_portal_pair(pair.handle);
            self.collaborators.physics.unregister_portal(pair.handle);
            self.routes.remove(&pair.handle);
        }
        if let Some(collision) = state.collision {
            self.collaborators.physics.unregister_collision_body(collision);
            self.collaborators.scene.release_collision(collision);
        }
        if let Some(mesh) = state.mesh {
            self.collaborators.scene.release_mesh(mesh);
        }
        if state.characters_spawned {
            self.collaborators.characters.remove(url);
        }
        if !state.audio.is_empty() {
            self.collaborators.audio.remove_sources(url);
        }
        self.slots.release(state.number);
    }

    /// Drop pairs on surviving worlds whose destination just flushed, so no
    /// portal ever references a non-resident endpoint.
    fn dispose_dangling_pairs(&mut self, flushed: &BTreeSet<WorldUrl>) {
        if flushed.is_empty() {
            return;
        }
        let mut dangling: Vec<(WorldUrl, PortalPairId)> = Vec::new();
        for (url, state) in &self.loaded {
            for pair in &state.portal_pairs {
                if flushed.contains(&pair.destination) {
                    dangling.push((url.clone(), pair.handle));
                }
            }
        }
        for (url, handle) in dangling {
            tracing::debug!(world = %url, pair = ?handle, "disposing pair into flushed world");
            self.collaborators.scene.destroy_portal_pair(handle);
            self.collaborators.physics.unregister_portal(handle);
            self.routes.remove(&handle);
            if let Some(state) = self.loaded.get_mut(&url) {
                state.portal_pairs.retain(|p| p.handle != handle);
            }
        }
    }

    fn load_world(
        &mut self,
        url: &WorldUrl,
        descriptor: &WorldDescriptor,
        is_root: bool,
        stats: &mut SyncStats,
    ) {
        if !self.loaded.contains_key(url) {
            let number = self.slots.allocate();
            tracing::debug!(world = %url, number = ?number, "world entering residency");
            self.loaded.insert(url.clone(), WorldRuntimeState::new(number));
            stats.worlds_loaded += 1;
        }
        let Some(number) = self.loaded.get(url).map(|s| s.number) else {
            return;
        };

        // Mesh.
        let needs_mesh = self.loaded.get(url).is_some_and(|s| s.mesh.is_none());
        if needs_mesh {
            match descriptor.mesh_url.as_deref() {
                Some(mesh_url) => match self.collaborators.scene.load_mesh(mesh_url, number) {
                    Ok(handle) => {
                        if let Some(state) = self.loaded.get_mut(url) {
                            state.mesh = Some(handle);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(world = %url, error = %err, "mesh load failed, world stays meshless");
                        stats.warnings += 1;
                    }
                },
                None => {
                    tracing::warn!(world = %url, "descriptor has no mesh url");
                    stats.warnings += 1;
                }
            }
        }

        // Collision: the root eagerly, others only when configured; the
        // rest is picked up by the background backlog.
        let needs_collision = self.loaded.get(url).is_some_and(|s| s.collision.is_none());
        if needs_collision && (is_root || self.config.eager_collision) {
            if descriptor.collision_url.is_none() {
                tracing::debug!(world = %url, "descriptor has no collision url");
            }
            if let Some(collision_url) = descriptor.collision_url.clone() {
                match self
                    .collaborators
                    .scene
                    .load_collision(&collision_url, number, is_root)
                {
                    Ok(handle) => {
                        self.collaborators.physics.register_collision_body(handle, number);
                        if let Some(state) = self.loaded.get_mut(url) {
                            state.collision = Some(handle);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(world = %url, error = %err, "collision load failed");
                        stats.warnings += 1;
                    }
                }
            }
        }

        // Characters: spawned once, visible only on the current root.
        if !descriptor.characters.is_empty() {
            let spawned = self
                .loaded
                .get(url)
                .is_some_and(|s| s.characters_spawned);
            if !spawned {
                let origin = roam_universe::world_to_universe(descriptor.position, number);
                self.collaborators
                    .characters
                    .spawn(&descriptor.characters, origin, number, url);
                if let Some(state) = self.loaded.get_mut(url) {
                    state.characters_spawned = true;
                }
            }
            self.collaborators.characters.set_visible(url, is_root);
        }

        // Audio sources: spawned once per residency.
        let needs_audio = self.loaded.get(url).is_some_and(|s| s.audio.is_empty());
        if needs_audio && !descriptor.audio_sources.is_empty() {
            let handles =
                self.collaborators
                    .audio
                    .spawn_sources(&descriptor.audio_sources, number, url);
            if let Some(state) = self.loaded.get_mut(url) {
                state.audio = handles;
            }
        }
    }

    fn wire_portal(&mut self, source: &WorldUrl, destination: &WorldUrl, stats: &mut SyncStats) {
        let Some(edge) = self.graph.edge(source, destination) else {
            tracing::warn!(source = %source, destination = %destination, "planned edge missing from graph");
            stats.warnings += 1;
            return;
        };
        let portal = edge.portal.clone();

        let (Some(start), Some(end)) = (portal.start, portal.destination.placement()) else {
            tracing::warn!(
                source = %source,
                destination = %destination,
                "portal missing placement data, left unwired"
            );
            stats.warnings += 1;
            return;
        };

        let numbers = match (self.loaded.get(source), self.loaded.get(destination)) {
            (Some(src), Some(dst)) => (src.number, dst.number),
            _ => {
                tracing::warn!(
                    source = %source,
                    destination = %destination,
                    "portal endpoint not resident, left unwired"
                );
                stats.warnings += 1;
                return;
            }
        };

        let already_wired = self
            .loaded
            .get(source)
            .is_some_and(|s| {
                s.has_equivalent_pair(destination, start.position, self.config.portal_epsilon)
            });
        if already_wired {
            return;
        }

        let spec = PortalPairSpec {
            name: portal.name.clone(),
            source_world: source.clone(),
            destination_world: destination.clone(),
            start: placement_to_universe(&start, numbers.0),
            end: placement_to_universe(&end, numbers.1),
        };
        let id = self.collaborators.scene.create_portal_pair(&spec);
        self.collaborators.physics.register_portal(id);
        self.routes.insert(
            id,
            PortalRoute {
                source: source.clone(),
                destination: destination.clone(),
            },
        );
        if let Some(state) = self.loaded.get_mut(source) {
            state.portal_pairs.push(PortalPairInstance {
                handle: id,
                destination: destination.clone(),
                start_position: start.position,
            });
        }
        stats.portals_wired += 1;
    }

    fn rebuild_backlog(&mut self, root: &WorldUrl) {
        let candidates: Vec<WorldUrl> = self
            .loaded
            .iter()
            .filter(|(url, state)| {
                *url != root
                    && state.collision.is_none()
                    && self
                        .graph
                        .descriptor(url)
                        .is_some_and(|d| d.collision_url.is_some())
            })
            .map(|(url, _)| url.clone())
            .collect();
        self.backlog.rebuild(candidates);
    }

    /// Load collision geometry for one backlog entry, if any remain valid.
    ///
    /// Cooperative: does at most one load per call; the caller yields
    /// between calls. Stale entries (world flushed, or collision already
    /// present) are dropped without work. Returns whether a load happened.
    pub fn preload_next_collision(&mut self) -> bool {
        while let Some(url) = self.backlog.pop() {
            let Some(number) = self
                .loaded
                .get(&url)
                .filter(|s| s.collision.is_none())
                .map(|s| s.number)
            else {
                continue;
            };
            let Some(collision_url) = self
                .graph
                .descriptor(&url)
                .and_then(|d| d.collision_url.clone())
            else {
                continue;
            };
            match self
                .collaborators
                .scene
                .load_collision(&collision_url, number, false)
            {
                Ok(handle) => {
                    self.collaborators.physics.register_collision_body(handle, number);
                    if let Some(state) = self.loaded.get_mut(&url) {
                        state.collision = Some(handle);
                    }
                    tracing::debug!(world = %url, "background collision loaded");
                }
                Err(err) => {
                    tracing::warn!(world = %url, error = %err, "background collision load failed");
                }
            }
            return true;
        }
        false
    }

    /// Remaining backlog entries, for instrumentation.
    pub fn collision_backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioHandle, CollisionHandle, MeshHandle};
    use crate::error::{AssetError, DiscoveryError};
    use glam::{DVec3, Quat, Vec3};
    use roam_common::{Placement, PortalSpec, PortalTarget};
    use roam_universe::{SLOT_STRIDE, WorldNumber, slot_offset};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use uuid::Uuid;

    /// Shared record of every backend call, inspected by the tests.
    #[derive(Default)]
    struct BackendLog {
        live_meshes: BTreeMap<MeshHandle, String>,
        live_collision: BTreeMap<CollisionHandle, String>,
        registered_bodies: BTreeSet<CollisionHandle>,
        live_pairs: BTreeMap<PortalPairId, (WorldUrl, WorldUrl)>,
        registered_portals: BTreeSet<PortalPairId>,
        character_worlds: BTreeSet<WorldUrl>,
        character_origins: BTreeMap<WorldUrl, DVec3>,
        character_visibility: BTreeMap<WorldUrl, bool>,
        audio_worlds: BTreeSet<WorldUrl>,
        resyncs: usize,
        failing_meshes: BTreeSet<String>,
    }

    struct MapSource {
        descriptors: BTreeMap<WorldUrl, WorldDescriptor>,
    }

    impl DescriptorSource for MapSource {
        fn fetch(&mut self, url: &WorldUrl) -> Result<WorldDescriptor, DiscoveryError> {
            self.descriptors
                .get(url)
                .cloned()
                .ok_or_else(|| DiscoveryError::NotFound(url.clone()))
        }
    }

    struct FakeScene {
        log: Rc<RefCell<BackendLog>>,
    }

    impl SceneBackend for FakeScene {
        fn load_mesh(
            &mut self,
            url: &str,
            _number: roam_universe::WorldNumber,
        ) -> Result<MeshHandle, AssetError> {
            let mut log = self.log.borrow_mut();
            if log.failing_meshes.contains(url) {
                return Err(AssetError::NotFound(url.to_owned()));
            }
            let handle = MeshHandle(Uuid::new_v4());
            log.live_meshes.insert(handle, url.to_owned());
            Ok(handle)
        }

        fn release_mesh(&mut self, handle: MeshHandle) {
            self.log.borrow_mut().live_meshes.remove(&handle);
        }

        fn load_collision(
            &mut self,
            url: &str,
            _number: roam_universe::WorldNumber,
            _visible: bool,
        ) -> Result<CollisionHandle, AssetError> {
            let handle = CollisionHandle(Uuid::new_v4());
            self.log
                .borrow_mut()
                .live_collision
                .insert(handle, url.to_owned());
            Ok(handle)
        }

        fn release_collision(&mut self, handle: CollisionHandle) {
            self.log.borrow_mut().live_collision.remove(&handle);
        }

        fn create_portal_pair(&mut self, spec: &PortalPairSpec) -> PortalPairId {
            let id = PortalPairId(Uuid::new_v4());
            self.log.borrow_mut().live_pairs.insert(
                id,
                (spec.source_world.clone(), spec.destination_world.clone()),
            );
            id
        }

        fn destroy_portal_pair(&mut self, id: PortalPairId) {
            self.log.borrow_mut().live_pairs.remove(&id);
        }
    }

    struct FakePhysics {
        log: Rc<RefCell<BackendLog>>,
    }

    impl PhysicsBackend for FakePhysics {
        fn register_collision_body(
            &mut self,
            handle: CollisionHandle,
            _number: roam_universe::WorldNumber,
        ) {
            self.log.borrow_mut().registered_bodies.insert(handle);
        }

        fn unregister_collision_body(&mut self, handle: CollisionHandle) {
            self.log.borrow_mut().registered_bodies.remove(&handle);
        }

        fn register_portal(&mut self, id: PortalPairId) {
            self.log.borrow_mut().registered_portals.insert(id);
        }

        fn unregister_portal(&mut self, id: PortalPairId) {
            self.log.borrow_mut().registered_portals.remove(&id);
        }

        fn resync(&mut self) {
            self.log.borrow_mut().resyncs += 1;
        }
    }

    struct FakeCharacters {
        log: Rc<RefCell<BackendLog>>,
    }

    impl CharacterBackend for FakeCharacters {
        fn spawn(
            &mut self,
            _descriptors: &[serde_json::Value],
            origin: DVec3,
            _number: roam_universe::WorldNumber,
            world: &WorldUrl,
        ) {
            let mut log = self.log.borrow_mut();
            log.character_worlds.insert(world.clone());
            log.character_origins.insert(world.clone(), origin);
        }

        fn set_visible(&mut self, world: &WorldUrl, visible: bool) {
            self.log
                .borrow_mut()
                .character_visibility
                .insert(world.clone(), visible);
        }

        fn remove(&mut self, world: &WorldUrl) {
            let mut log = self.log.borrow_mut();
            log.character_worlds.remove(world);
            log.character_visibility.remove(world);
        }
    }

    struct FakeAudio {
        log: Rc<RefCell<BackendLog>>,
    }

    impl AudioBackend for FakeAudio {
        fn spawn_sources(
            &mut self,
            sources: &[serde_json::Value],
            _number: roam_universe::WorldNumber,
            world: &WorldUrl,
        ) -> Vec<AudioHandle> {
            self.log.borrow_mut().audio_worlds.insert(world.clone());
            sources.iter().map(|_| AudioHandle(Uuid::new_v4())).collect()
        }

        fn remove_sources(&mut self, world: &WorldUrl) {
            self.log.borrow_mut().audio_worlds.remove(world);
        }
    }

    struct Harness {
        log: Rc<RefCell<BackendLog>>,
        orch: Orchestrator,
    }

    fn harness(
        config: SyncConfig,
        descriptors: BTreeMap<WorldUrl, WorldDescriptor>,
    ) -> Harness {
        let log = Rc::new(RefCell::new(BackendLog::default()));
        let orch = Orchestrator::new(
            config,
            Collaborators {
                source: Box::new(MapSource { descriptors }),
                scene: Box::new(FakeScene { log: log.clone() }),
                physics: Box::new(FakePhysics { log: log.clone() }),
                characters: Box::new(FakeCharacters { log: log.clone() }),
                audio: Box::new(FakeAudio { log: log.clone() }),
            },
        );
        Harness { log, orch }
    }

    fn radius(hop_radius: u32) -> SyncConfig {
        SyncConfig {
            hop_radius,
            ..SyncConfig::default()
        }
    }

    fn world(name: &str, portal_dests: &[&str]) -> WorldDescriptor {
        WorldDescriptor {
            name: name.into(),
            mesh_url: Some(format!("{name}.glb")),
            collision_url: None,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            portals: portal_dests
                .iter()
                .enumerate()
                .map(|(i, dest)| PortalSpec {
                    name: None,
                    start: Some(Placement::at(Vec3::new(4.0 + i as f32, 0.0, 0.0))),
                    destination: PortalTarget {
                        url: WorldUrl::from(*dest),
                        position: Some(Vec3::new(-4.0, 0.0, 0.0)),
                        rotation: Quat::IDENTITY,
                    },
                })
                .collect(),
            characters: Vec::new(),
            audio_sources: Vec::new(),
        }
    }

    /// Linear chain a - b - c - d, portals authored forward only; each pair
    /// is crossable both ways.
    fn chain() -> BTreeMap<WorldUrl, WorldDescriptor> {
        let mut map = BTreeMap::new();
        map.insert(WorldUrl::from("a"), world("a", &["b"]));
        map.insert(WorldUrl::from("b"), world("b", &["c"]));
        map.insert(WorldUrl::from("c"), world("c", &["d"]));
        map.insert(WorldUrl::from("d"), world("d", &[]));
        map
    }

    fn url(s: &str) -> WorldUrl {
        WorldUrl::from(s)
    }

    fn cross(h: &mut Harness, from: &str, to: &str) {
        let pair = h
            .orch
            .portal_between(&url(from), &url(to))
            .map(|id| PortalCrossing {
                pair: id,
                direction: CrossingDirection::Forward,
            })
            .or_else(|| {
                h.orch.portal_between(&url(to), &url(from)).map(|id| PortalCrossing {
                    pair: id,
                    direction: CrossingDirection::Reverse,
                })
            })
            .expect("no wired portal between worlds");
        h.orch.handle_crossing(pair).unwrap();
    }

    #[test]
    fn linear_chain_loads_within_radius() {
        let mut h = harness(radius(2), chain());
        h.orch.sync(url("a"), None).unwrap();

        assert!(h.orch.is_resident(&url("a")));
        assert!(h.orch.is_resident(&url("b")));
        assert!(h.orch.is_resident(&url("c")));
        assert!(!h.orch.is_resident(&url("d")));

        // a<->b and b<->c wired; c sits on the boundary so c<->d is not.
        assert!(h.orch.portal_between(&url("a"), &url("b")).is_some());
        assert!(h.orch.portal_between(&url("b"), &url("c")).is_some());
        assert!(h.orch.portal_between(&url("c"), &url("d")).is_none());
        assert_eq!(h.log.borrow().live_pairs.len(), 2);
        assert_eq!(h.orch.stats().worlds_loaded, 3);
        assert_eq!(h.orch.stats().portals_wired, 2);
        assert_eq!(h.orch.current_root(), Some(&url("a")));
    }

    #[test]
    fn resident_worlds_get_distinct_non_overlapping_numbers() {
        let mut h = harness(radius(1), chain());
        h.orch.sync(url("a"), None).unwrap();

        let a = h.orch.resident(&url("a")).unwrap().number;
        let b = h.orch.resident(&url("b")).unwrap().number;
        // The session's first root takes slot 0.
        assert_eq!(a, WorldNumber(0));
        assert_ne!(a, b);
        assert!(slot_offset(a).distance(slot_offset(b)) >= SLOT_STRIDE);
    }

    #[test]
    fn sync_twice_is_idempotent() {
        let mut h = harness(radius(2), chain());
        h.orch.sync(url("a"), None).unwrap();
        let pairs_before = h.log.borrow().live_pairs.len();
        let meshes_before = h.log.borrow().live_meshes.len();

        h.orch.sync(url("a"), None).unwrap();
        assert_eq!(h.log.borrow().live_pairs.len(), pairs_before);
        assert_eq!(h.log.borrow().live_meshes.len(), meshes_before);
        assert_eq!(h.orch.stats().worlds_loaded, 0);
        assert_eq!(h.orch.stats().portals_wired, 0);
    }

    #[test]
    fn crossing_chain_flushes_behind() {
        let mut h = harness(radius(1), chain());
        h.orch.sync(url("a"), None).unwrap();
        assert!(!h.orch.is_resident(&url("c")));

        cross(&mut h, "a", "b");
        assert_eq!(h.orch.current_root(), Some(&url("b")));
        assert!(h.orch.is_resident(&url("a")));
        assert!(h.orch.is_resident(&url("c")));

        // Crossing away from a finally flushes it.
        cross(&mut h, "b", "c");
        assert_eq!(h.orch.current_root(), Some(&url("c")));
        assert!(!h.orch.is_resident(&url("a")));
        assert!(h.orch.is_resident(&url("d")));
        assert_eq!(h.log.borrow().resyncs, 2);
    }

    #[test]
    fn previous_root_survives_one_cycle() {
        let mut h = harness(radius(1), chain());
        h.orch.sync(url("a"), None).unwrap();

        // Teleport two hops away; a is out of range but protected.
        h.orch.sync(url("c"), Some(url("a"))).unwrap();
        assert!(h.orch.is_resident(&url("a")));

        // The next sync no longer names a as previous root.
        h.orch.sync(url("d"), Some(url("c"))).unwrap();
        assert!(!h.orch.is_resident(&url("a")));
    }

    #[test]
    fn flush_releases_every_handle() {
        let mut h = harness(radius(1), chain());
        h.orch.sync(url("a"), None).unwrap();
        h.orch.sync(url("d"), None).unwrap();

        let log = h.log.borrow();
        // Only c and d remain; their meshes are the only live ones.
        let live: Vec<&str> = log.live_meshes.values().map(String::as_str).collect();
        assert_eq!(live.len(), 2);
        assert!(live.contains(&"c.glb"));
        assert!(live.contains(&"d.glb"));
        // Every surviving pair connects two resident worlds.
        for (src, dst) in log.live_pairs.values() {
            assert!(h.orch.is_resident(src));
            assert!(h.orch.is_resident(dst));
        }
    }

    #[test]
    fn pairs_into_flushed_worlds_are_disposed() {
        let mut h = harness(radius(1), chain());
        h.orch.sync(url("b"), None).unwrap();
        assert!(h.orch.portal_between(&url("b"), &url("c")).is_some());

        // Re-rooting on a flushes c; b survives but its pair into c must go.
        h.orch.sync(url("a"), None).unwrap();
        assert!(h.orch.portal_between(&url("b"), &url("c")).is_none());
        assert!(h.orch.portal_between(&url("a"), &url("b")).is_some());
        let log = h.log.borrow();
        assert_eq!(log.live_pairs.len(), 1);
        assert_eq!(log.registered_portals.len(), 1);
    }

    #[test]
    fn portal_missing_placement_is_skipped_with_warning() {
        let mut descriptors = chain();
        // c's only portal to d loses its destination placement.
        if let Some(c) = descriptors.get_mut(&url("c")) {
            c.portals[0].destination.position = None;
        }
        let mut h = harness(radius(1), descriptors);
        h.orch.sync(url("c"), None).unwrap();

        // d is still discovered and resident, but the portal stays unwired.
        assert!(h.orch.is_resident(&url("d")));
        assert!(h.orch.portal_between(&url("c"), &url("d")).is_none());
        assert_eq!(h.orch.stats().portals_wired, 0);
        assert!(h.orch.stats().warnings >= 1);
    }

    #[test]
    fn root_fetch_failure_is_fatal() {
        let mut h = harness(radius(2), BTreeMap::new());
        let err = h.orch.sync(url("nowhere"), None).unwrap_err();
        assert!(matches!(err, SyncError::RootDiscovery { .. }));
        assert!(h.orch.current_root().is_none());
    }

    #[test]
    fn non_root_fetch_failure_is_recoverable() {
        let mut descriptors = chain();
        descriptors.remove(&url("b"));
        let mut h = harness(radius(2), descriptors);
        h.orch.sync(url("a"), None).unwrap();

        // b stays descriptor-less and unloaded; a still has its root state.
        assert!(h.orch.is_resident(&url("a")));
        assert!(!h.orch.is_resident(&url("b")));
        assert!(h.orch.stats().warnings >= 1);
    }

    #[test]
    fn mesh_load_failure_keeps_world_resident() {
        let mut h = harness(radius(1), chain());
        h.log.borrow_mut().failing_meshes.insert("b.glb".into());
        h.orch.sync(url("a"), None).unwrap();

        let b = h.orch.resident(&url("b")).unwrap();
        assert!(b.mesh.is_none());
        assert!(h.orch.resident(&url("a")).unwrap().mesh.is_some());
        assert!(h.orch.stats().warnings >= 1);
    }

    fn chain_with_collision() -> BTreeMap<WorldUrl, WorldDescriptor> {
        let mut map = chain();
        for (url, desc) in map.iter_mut() {
            desc.collision_url = Some(format!("{}_col.glb", url.as_str()));
        }
        map
    }

    #[test]
    fn collision_eager_for_root_deferred_for_neighbors() {
        let mut h = harness(radius(1), chain_with_collision());
        h.orch.sync(url("a"), None).unwrap();

        assert!(h.orch.resident(&url("a")).unwrap().collision.is_some());
        assert!(h.orch.resident(&url("b")).unwrap().collision.is_none());
        assert_eq!(h.orch.collision_backlog_len(), 1);

        // One pump loads b's collision and registers it with physics.
        assert!(h.orch.preload_next_collision());
        let b = h.orch.resident(&url("b")).unwrap();
        assert!(b.collision.is_some());
        assert!(h.log.borrow().registered_bodies.contains(&b.collision.unwrap()));

        // Backlog drained.
        assert!(!h.orch.preload_next_collision());
    }

    #[test]
    fn eager_collision_loads_everything_in_sync() {
        let config = SyncConfig {
            hop_radius: 1,
            eager_collision: true,
            ..SyncConfig::default()
        };
        let mut h = harness(config, chain_with_collision());
        h.orch.sync(url("a"), None).unwrap();

        assert!(h.orch.resident(&url("b")).unwrap().collision.is_some());
        assert_eq!(h.orch.collision_backlog_len(), 0);
    }

    #[test]
    fn preload_skips_worlds_flushed_since_rebuild() {
        let mut h = harness(radius(1), chain_with_collision());
        h.orch.sync(url("a"), None).unwrap();
        assert_eq!(h.orch.collision_backlog_len(), 1);

        // b's collision arrives eagerly when b becomes the root; the stale
        // backlog entry for it must be dropped without a second load.
        h.orch.sync(url("b"), Some(url("a"))).unwrap();
        assert!(h.orch.resident(&url("b")).unwrap().collision.is_some());
        let loaded_before = h.log.borrow().live_collision.len();
        while h.orch.preload_next_collision() {}
        let log = h.log.borrow();
        // Each resident world holds at most one collision body.
        assert!(log.live_collision.len() >= loaded_before);
        for world in [url("a"), url("b"), url("c")] {
            let state = h.orch.resident(&world).unwrap();
            assert!(state.collision.is_some());
        }
    }

    #[test]
    fn characters_visible_only_on_root() {
        let mut descriptors = chain();
        for desc in descriptors.values_mut() {
            desc.characters = vec![json!({"kind": "npc"})];
        }
        let mut h = harness(radius(1), descriptors);
        h.orch.sync(url("a"), None).unwrap();

        {
            let log = h.log.borrow();
            assert_eq!(log.character_visibility.get(&url("a")), Some(&true));
            assert_eq!(log.character_visibility.get(&url("b")), Some(&false));
            // The root took slot 0, so its characters spawn at the local origin.
            assert_eq!(log.character_origins.get(&url("a")), Some(&DVec3::ZERO));
        }

        cross(&mut h, "a", "b");
        let log = h.log.borrow();
        assert_eq!(log.character_visibility.get(&url("a")), Some(&false));
        assert_eq!(log.character_visibility.get(&url("b")), Some(&true));
    }

    #[test]
    fn held_previous_root_characters_are_hidden() {
        let mut descriptors = chain();
        for desc in descriptors.values_mut() {
            desc.characters = vec![json!({"kind": "npc"})];
        }
        let mut h = harness(radius(1), descriptors);
        h.orch.sync(url("a"), None).unwrap();
        assert_eq!(h.log.borrow().character_visibility.get(&url("a")), Some(&true));

        // Teleport two hops away: a falls outside the radius and skips the
        // load phase, surviving only through the previous-root hold. Its
        // characters must still drop out of sight.
        h.orch.sync(url("c"), Some(url("a"))).unwrap();
        assert!(h.orch.is_resident(&url("a")));
        let log = h.log.borrow();
        assert_eq!(log.character_visibility.get(&url("a")), Some(&false));
        assert_eq!(log.character_visibility.get(&url("c")), Some(&true));
    }

    #[test]
    fn characters_removed_on_flush() {
        let mut descriptors = chain();
        for desc in descriptors.values_mut() {
            desc.characters = vec![json!({"kind": "npc"})];
        }
        let mut h = harness(radius(1), descriptors);
        h.orch.sync(url("a"), None).unwrap();
        assert!(h.log.borrow().character_worlds.contains(&url("a")));

        h.orch.sync(url("d"), None).unwrap();
        let log = h.log.borrow();
        assert!(!log.character_worlds.contains(&url("a")));
        assert!(!log.character_worlds.contains(&url("b")));
        assert!(log.character_worlds.contains(&url("d")));
    }

    #[test]
    fn audio_sources_spawn_once_and_release_on_flush() {
        let mut descriptors = chain();
        if let Some(a) = descriptors.get_mut(&url("a")) {
            a.audio_sources = vec![json!({"loop": "wind"}), json!({"loop": "birds"})];
        }
        let mut h = harness(radius(1), descriptors);
        h.orch.sync(url("a"), None).unwrap();
        assert_eq!(h.orch.resident(&url("a")).unwrap().audio.len(), 2);
        assert!(h.log.borrow().audio_worlds.contains(&url("a")));

        h.orch.sync(url("d"), None).unwrap();
        assert!(!h.log.borrow().audio_worlds.contains(&url("a")));
    }

    #[test]
    fn world_numbers_recycle_after_flush() {
        let mut h = harness(radius(1), chain());
        h.orch.sync(url("a"), None).unwrap();
        assert_eq!(h.orch.resident(&url("b")).unwrap().number, WorldNumber(1));

        // Flush a (slot 0, reserved) and load c and d (slots 2 and 3).
        h.orch.sync(url("c"), None).unwrap();
        assert_eq!(h.orch.resident(&url("c")).unwrap().number, WorldNumber(2));
        assert_eq!(h.orch.resident(&url("d")).unwrap().number, WorldNumber(3));

        // Re-rooting on a flushes c and d; a re-loads into the lowest
        // recycled slot, never back into the reserved slot 0.
        h.orch.sync(url("a"), None).unwrap();
        assert_eq!(h.orch.resident(&url("a")).unwrap().number, WorldNumber(2));
        assert_eq!(h.orch.resident(&url("b")).unwrap().number, WorldNumber(1));
    }

    #[test]
    fn on_world_change_fires_once_per_sync() {
        let mut h = harness(radius(1), chain());
        let roots: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = roots.clone();
        h.orch.set_on_world_change(Box::new(move |url, descriptor| {
            assert_eq!(descriptor.name, url.as_str());
            sink.borrow_mut().push(url.as_str().to_owned());
        }));

        h.orch.sync(url("a"), None).unwrap();
        cross(&mut h, "a", "b");
        assert_eq!(*roots.borrow(), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn requests_during_sync_coalesce_to_latest() {
        let mut h = harness(radius(1), chain());
        let roots: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = roots.clone();
        h.orch.set_on_world_change(Box::new(move |url, _| {
            sink.borrow_mut().push(url.as_str().to_owned());
        }));

        // Requests arriving while a sync is in flight are deferred, and the
        // latest overwrites any earlier pending one.
        h.orch.in_sync = true;
        h.orch.sync(url("b"), None).unwrap();
        h.orch.sync(url("c"), None).unwrap();
        assert!(h.orch.current_root().is_none());
        assert!(!h.orch.is_resident(&url("b")));

        // Once the guard clears, the next sync runs its own pass and then
        // drains only the latest pending request; b never runs.
        h.orch.in_sync = false;
        h.orch.sync(url("a"), None).unwrap();
        assert_eq!(h.orch.current_root(), Some(&url("c")));
        assert_eq!(*roots.borrow(), vec!["a".to_owned(), "c".to_owned()]);
    }
}
