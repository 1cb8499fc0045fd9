//! Serde model for the world descriptor fetched per URL.
//!
//! The wire format uses camelCase field names. Asset URLs and portal
//! placements are optional: a descriptor missing one still parses, and the
//! runtime degrades that world (no collision, unusable portal) instead of
//! failing the whole sync.

use crate::types::{Placement, WorldUrl, quat_identity};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Everything the streamer consumes about one world.
///
/// `position`/`rotation` place the world's spawn point and are only
/// meaningful for the very first root of a session. `characters` and
/// `audio_sources` are opaque payloads forwarded to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mesh_url: Option<String>,
    #[serde(default)]
    pub collision_url: Option<String>,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default = "quat_identity")]
    pub rotation: Quat,
    #[serde(default)]
    pub portals: Vec<PortalSpec>,
    #[serde(default)]
    pub characters: Vec<serde_json::Value>,
    #[serde(default)]
    pub audio_sources: Vec<serde_json::Value>,
}

impl WorldDescriptor {
    /// Spawn placement of the world itself.
    pub fn placement(&self) -> Placement {
        Placement::new(self.position, self.rotation)
    }
}

/// One authored portal: a placement in the source world and a destination
/// world plus the matching placement on the far side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSpec {
    #[serde(default)]
    pub name: Option<String>,
    /// Source-side placement. Absent in malformed descriptors; such a
    /// portal still contributes a graph edge but cannot be wired.
    #[serde(default)]
    pub start: Option<Placement>,
    pub destination: PortalTarget,
}

/// The far side of a portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalTarget {
    pub url: WorldUrl,
    #[serde(default)]
    pub position: Option<Vec3>,
    #[serde(default = "quat_identity")]
    pub rotation: Quat,
}

impl PortalTarget {
    /// Destination-side placement, if the descriptor carried one.
    pub fn placement(&self) -> Option<Placement> {
        self.position.map(|p| Placement::new(p, self.rotation))
    }
}
