//! Resource orchestration for the roam world streamer.
//!
//! Turns portal crossings into discovery, flush, load, and portal-wiring
//! phases against a set of collaborator backends (scene, physics,
//! characters, audio).
//!
//! # Invariants
//! - At most one `WorldRuntimeState` per URL at a time.
//! - The flush phase of a sync completes before its load phase begins.
//! - Syncs are serialized; concurrent requests coalesce to the latest root.
//! - Every wired portal pair has both endpoint worlds resident.

pub mod backend;
mod discovery;
pub mod error;
mod orchestrator;
mod preload;
mod state;

pub use backend::{
    AudioBackend, AudioHandle, CharacterBackend, CollisionHandle, CrossingDirection,
    DescriptorSource, MeshHandle, PhysicsBackend, PortalCrossing, PortalPairId, PortalPairSpec,
    SceneBackend,
};
pub use error::{AssetError, DiscoveryError, SyncError};
pub use orchestrator::{Collaborators, Orchestrator, SyncConfig, SyncStats};
pub use state::{PortalPairInstance, WorldRuntimeState};

pub fn crate_info() -> &'static str {
    "roam-runtime v0.1.0"
}
