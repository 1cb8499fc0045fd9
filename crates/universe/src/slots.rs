use glam::{DVec3, Quat, Vec3};
use roam_common::Placement;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// The integer slot assigned to a currently resident world.
///
/// Slot `n` offsets the world's geometry by `slot_offset(n)` in universe
/// space. Slot 0 is the identity transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldNumber(pub u32);

impl WorldNumber {
    pub const FIRST_ROOT: WorldNumber = WorldNumber(0);
}

/// Vertical spacing between slots in universe space.
///
/// A power of two, so lifting an f32 local position to f64 and adding a
/// slot offset is exact. Must exceed any single world's vertical extent;
/// worlds stack along +Y, so horizontal footprint never matters.
pub const SLOT_STRIDE: f64 = 8192.0;

/// Universe-space offset of slot `n`. Identity for slot 0.
pub fn slot_offset(number: WorldNumber) -> DVec3 {
    DVec3::new(0.0, number.0 as f64 * SLOT_STRIDE, 0.0)
}

/// Lift a world-local position into universe space.
pub fn world_to_universe(local: Vec3, number: WorldNumber) -> DVec3 {
    local.as_dvec3() + slot_offset(number)
}

/// Exact inverse of [`world_to_universe`] for positions within the slot's
/// extent.
pub fn universe_to_world(universe: DVec3, number: WorldNumber) -> Vec3 {
    (universe - slot_offset(number)).as_vec3()
}

/// A placement lifted into universe space. Rotation is unaffected by the
/// per-slot translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniversePlacement {
    pub position: DVec3,
    pub rotation: Quat,
}

/// Lift a local placement into universe space for the given slot.
pub fn placement_to_universe(placement: &Placement, number: WorldNumber) -> UniversePlacement {
    UniversePlacement {
        position: world_to_universe(placement.position, number),
        rotation: placement.rotation,
    }
}

/// Allocates world numbers for resident worlds.
///
/// Numbers are recycled through a min-heap free list when their world fully
/// flushes, so long sessions crossing many portals do not exhaust small
/// slots. Slot 0 is handed out exactly once, to the first allocation of the
/// session, and never returns to the pool.
#[derive(Debug, Clone, Default)]
pub struct SlotAllocator {
    next: u32,
    free: BinaryHeap<Reverse<u32>>,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the lowest available world number.
    pub fn allocate(&mut self) -> WorldNumber {
        if let Some(Reverse(n)) = self.free.pop() {
            return WorldNumber(n);
        }
        let n = self.next;
        self.next += 1;
        WorldNumber(n)
    }

    /// Return a number to the pool. Slot 0 stays reserved for the session's
    /// first root and is never reissued.
    pub fn release(&mut self, number: WorldNumber) {
        if number.0 != 0 {
            self.free.push(Reverse(number.0));
        }
    }

    /// Highest slot ever handed out plus one. Useful for diagnostics.
    pub fn high_water_mark(&self) -> u32 {
        self.next
    }
}
