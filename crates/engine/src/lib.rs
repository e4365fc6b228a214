//! Change-tracking and update-coalescing engine for scene streaming.
//!
//! The host registers mutable geometry sources; the engine tracks
//! mutations in per-window dirty sets and streams coalesced scene
//! updates to a single rendering frontend over a binary WebSocket
//! connection.

mod core;
mod net;
mod registry;

pub mod error;
pub mod policy;
pub mod server;

pub use error::EngineError;
pub use policy::UpdatePolicy;
pub use server::VisServer;

// The engine's public vocabulary comes from the model crates.
pub use foundation::math::{Quat, Vec2, Vec3};
pub use foundation::Color;
pub use protocol::{ObjectId, WindowId};
pub use scene::{
    Ball, Box2, Box3, Circle, Dim, GeometryValue, LineStyle, Material, Point2, Point3, PointShape,
    Polygon, Polyline, Pose2, Pose3, Shape, Source, Trajectory,
};

#[cfg(test)]
pub(crate) mod testkit;
