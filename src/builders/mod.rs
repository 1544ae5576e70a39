//! Builders to construct control-plane components from configuration.

pub mod control_plane_builder;

pub use control_plane_builder::{ControlPlaneBuilder, DynJobQueue, LIFECYCLE_STREAM};
