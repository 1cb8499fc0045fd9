//! Universe coordinates: one shared space in which all resident worlds
//! render simultaneously without overlapping.
//!
//! # Invariants
//! - A world number is never shared by two simultaneously resident worlds.
//! - Slot 0 is the identity transform and belongs to the session's first
//!   root; it is never recycled.
//! - `universe_to_world(world_to_universe(p, n), n) == p` for any f32
//!   position within a slot's extent.

mod slots;

pub use slots::{
    SLOT_STRIDE, SlotAllocator, UniversePlacement, WorldNumber, placement_to_universe,
    slot_offset, universe_to_world, world_to_universe,
};

pub fn crate_info() -> &'static str {
    "roam-universe v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("universe"));
    }
}
