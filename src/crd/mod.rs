//! Custom Resource Definitions.

pub mod control_plane;

pub use control_plane::{ControlPlane, ControlPlaneSpec, ControlPlaneStatus, Phase};
