//! Shared types for the roam world streamer.
//!
//! # Invariants
//! - A `WorldUrl` is the sole identity of a world; two descriptors fetched
//!   from the same URL describe the same world.
//! - Descriptor parsing is lossless for the fields this core consumes;
//!   collaborator payloads (`characters`, `audioSources`) pass through opaque.

pub mod descriptor;
pub mod types;

pub use descriptor::{PortalSpec, PortalTarget, WorldDescriptor};
pub use types::{Placement, WorldUrl};

pub fn crate_info() -> &'static str {
    "roam-common v0.1.0"
}
