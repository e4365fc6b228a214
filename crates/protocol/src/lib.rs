//! Wire protocol for scene streaming.
//!
//! One envelope, [`VisMessage`], flows engine → frontend. Each message
//! is a scene update: a window id plus an ordered list of commands
//! targeting that window. The peer sends no application messages back;
//! only transport-level open/close is observed.
//!
//! Framing is handled by [`codec`]: a fixed header followed by a
//! bincode body.

pub mod codec;

use scene::{Geometry2D, Geometry3D, Material};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use codec::{decode_frame, encode_frame, CodecError};

/// Engine-assigned object identifier (`"obj_<n>"`, monotonic).
pub type ObjectId = String;

/// Stable opaque window identifier (UUIDv4).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub Uuid);

impl WindowId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A single frontend instruction, generic over the geometry union of
/// its dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command<G> {
    CreateWindow {
        window_id: WindowId,
        window_name: String,
    },
    DeleteWindow {
        window_id: WindowId,
    },
    SetTitle {
        title: String,
    },
    SetGridVisible {
        visible: bool,
    },
    SetAxesVisible {
        visible: bool,
    },
    SetLegendVisible {
        visible: bool,
    },
    AddObject {
        id: ObjectId,
        material: Material,
        geometry: G,
    },
    UpdateObjectGeometry {
        id: ObjectId,
        geometry: G,
    },
    DeleteObject {
        id: ObjectId,
    },
}

pub type Command2D = Command<Geometry2D>;
pub type Command3D = Command<Geometry3D>;

/// The wire unit: an ordered command batch for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneUpdate<G> {
    pub window_id: WindowId,
    pub window_name: String,
    pub commands: Vec<Command<G>>,
}

pub type Scene2DUpdate = SceneUpdate<Geometry2D>;
pub type Scene3DUpdate = SceneUpdate<Geometry3D>;

/// Top-level envelope sent as one binary frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VisMessage {
    Scene2D(Scene2DUpdate),
    Scene3D(Scene3DUpdate),
}

impl VisMessage {
    pub fn window_id(&self) -> WindowId {
        match self {
            VisMessage::Scene2D(update) => update.window_id,
            VisMessage::Scene3D(update) => update.window_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use scene::{Point2, Shape};

    use super::*;

    #[test]
    fn window_ids_are_unique() {
        assert_ne!(WindowId::random(), WindowId::random());
    }

    #[test]
    fn envelope_reports_window_id() {
        let id = WindowId::random();
        let msg = VisMessage::Scene2D(Scene2DUpdate {
            window_id: id,
            window_name: "w".to_string(),
            commands: vec![Command::AddObject {
                id: "obj_1".to_string(),
                material: Material::default(),
                geometry: match Point2::default().into_value() {
                    scene::GeometryValue::D2(g) => g,
                    scene::GeometryValue::D3(_) => unreachable!(),
                },
            }],
        });
        assert_eq!(msg.window_id(), id);
    }
}
