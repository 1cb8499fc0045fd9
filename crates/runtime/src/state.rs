use crate::backend::{AudioHandle, CollisionHandle, MeshHandle, PortalPairId};
use glam::Vec3;
use roam_common::WorldUrl;
use roam_universe::WorldNumber;

/// One wired portal pair, recorded on its source world.
///
/// The start position is kept for de-duplication: a later sync re-planning
/// the same edge must not create a second pair for the same destination and
/// (within tolerance) the same source-side placement.
#[derive(Debug, Clone)]
pub struct PortalPairInstance {
    pub handle: PortalPairId,
    pub destination: WorldUrl,
    pub start_position: Vec3,
}

/// Runtime bookkeeping for one *loaded* world.
///
/// Exists exactly while the world is resident; all handles are released and
/// the world number recycled when the world flushes.
#[derive(Debug, Clone)]
pub struct WorldRuntimeState {
    pub number: WorldNumber,
    pub mesh: Option<MeshHandle>,
    pub collision: Option<CollisionHandle>,
    pub portal_pairs: Vec<PortalPairInstance>,
    pub characters_spawned: bool,
    pub audio: Vec<AudioHandle>,
}

impl WorldRuntimeState {
    pub fn new(number: WorldNumber) -> Self {
        Self {
            number,
            mesh: None,
            collision: None,
            portal_pairs: Vec::new(),
            characters_spawned: false,
            audio: Vec::new(),
        }
    }

    /// Whether an equivalent pair (same destination, start position within
    /// `epsilon`) is already wired on this world.
    pub fn has_equivalent_pair(
        &self,
        destination: &WorldUrl,
        start_position: Vec3,
        epsilon: f32,
    ) -> bool {
        self.portal_pairs.iter().any(|pair| {
            &pair.destination == destination
                && pair.start_position.distance(start_position) <= epsilon
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn fresh_state_holds_nothing() {
        let state = WorldRuntimeState::new(WorldNumber(3));
        assert_eq!(state.number, WorldNumber(3));
        assert!(state.mesh.is_none());
        assert!(state.collision.is_none());
        assert!(state.portal_pairs.is_empty());
        assert!(!state.characters_spawned);
    }

    #[test]
    fn equivalent_pair_respects_epsilon() {
        let mut state = WorldRuntimeState::new(WorldNumber(0));
        state.portal_pairs.push(PortalPairInstance {
            handle: PortalPairId(Uuid::new_v4()),
            destination: WorldUrl::from("b"),
            start_position: Vec3::new(1.0, 0.0, 0.0),
        });

        let dest = WorldUrl::from("b");
        assert!(state.has_equivalent_pair(&dest, Vec3::new(1.005, 0.0, 0.0), 0.01));
        assert!(!state.has_equivalent_pair(&dest, Vec3::new(1.5, 0.0, 0.0), 0.01));
        // Same placement, different destination: not equivalent.
        assert!(!state.has_equivalent_pair(&WorldUrl::from("c"), Vec3::new(1.0, 0.0, 0.0), 0.01));
    }
}
