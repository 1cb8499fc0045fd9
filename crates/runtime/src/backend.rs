//! Collaborator seams consumed by the orchestrator.
//!
//! Rendering, physics, characters, and audio are external systems; the
//! orchestrator drives them by handle, never by reaching into their state.
//! Backends are single-threaded collaborators on the main loop.

use crate::error::{AssetError, DiscoveryError};
use glam::DVec3;
use roam_common::{WorldDescriptor, WorldUrl};
use roam_universe::{UniversePlacement, WorldNumber};
use serde_json::Value;
use uuid::Uuid;

/// Handle to a loaded render mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub Uuid);

/// Handle to loaded collision geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollisionHandle(pub Uuid);

/// Handle to an instantiated bidirectional portal pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalPairId(pub Uuid);

/// Handle to a spawned audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AudioHandle(pub Uuid);

/// Everything a backend needs to instantiate one portal pair: both
/// endpoints already lifted into universe coordinates.
#[derive(Debug, Clone)]
pub struct PortalPairSpec {
    pub name: Option<String>,
    pub source_world: WorldUrl,
    pub destination_world: WorldUrl,
    pub start: UniversePlacement,
    pub end: UniversePlacement,
}

/// Which way a portal pair was traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingDirection {
    /// From the authoring (source) world into the destination world.
    Forward,
    /// From the destination world back into the source world.
    Reverse,
}

/// A crossing event emitted by the portal layer and consumed by
/// [`crate::Orchestrator::handle_crossing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalCrossing {
    pub pair: PortalPairId,
    pub direction: CrossingDirection,
}

/// Fetches world descriptors by URL (network, filesystem, cache).
pub trait DescriptorSource {
    fn fetch(&mut self, url: &WorldUrl) -> Result<WorldDescriptor, DiscoveryError>;
}

/// Render-side resource management: meshes, collision geometry, portal
/// pairs. Loads are synchronous from the orchestrator's point of view.
pub trait SceneBackend {
    fn load_mesh(&mut self, url: &str, number: WorldNumber) -> Result<MeshHandle, AssetError>;
    fn release_mesh(&mut self, handle: MeshHandle);

    fn load_collision(
        &mut self,
        url: &str,
        number: WorldNumber,
        visible: bool,
    ) -> Result<CollisionHandle, AssetError>;
    fn release_collision(&mut self, handle: CollisionHandle);

    fn create_portal_pair(&mut self, spec: &PortalPairSpec) -> PortalPairId;
    fn destroy_portal_pair(&mut self, id: PortalPairId);
}

/// Physics registration for collision bodies and portal surfaces.
pub trait PhysicsBackend {
    fn register_collision_body(&mut self, handle: CollisionHandle, number: WorldNumber);
    fn unregister_collision_body(&mut self, handle: CollisionHandle);
    fn register_portal(&mut self, id: PortalPairId);
    fn unregister_portal(&mut self, id: PortalPairId);
    /// Called after a crossing-triggered sync so the simulation can rebase
    /// onto the new root.
    fn resync(&mut self);
}

/// Character spawning and visibility, keyed by world URL.
pub trait CharacterBackend {
    fn spawn(&mut self, descriptors: &[Value], origin: DVec3, number: WorldNumber, world: &WorldUrl);
    fn set_visible(&mut self, world: &WorldUrl, visible: bool);
    fn remove(&mut self, world: &WorldUrl);
}

/// Audio source lifecycle, keyed by world URL.
pub trait AudioBackend {
    fn spawn_sources(
        &mut self,
        sources: &[Value],
        number: WorldNumber,
        world: &WorldUrl,
    ) -> Vec<AudioHandle>;
    fn remove_sources(&mut self, world: &WorldUrl);
}
