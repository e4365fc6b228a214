//! Registry: the engine's bookkeeping for tracked objects, windows and
//! per-window dirty sets, plus the send side of the connected peer.
//!
//! Invariants held between public-API calls:
//! - every id in `window_objects[w]` exists in `objects` with
//!   `window_id == w`;
//! - every id in a dirty set exists in `objects` and matches the set's
//!   dimension;
//! - `name_to_id` is a bijection with `windows` by display name;
//! - a `source_to_id` entry exists iff the source's back-reference
//!   points at this engine;
//! - at most one peer; with none, nothing is transmitted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use protocol::{Command, Command2D, Command3D, ObjectId, SceneUpdate, VisMessage, WindowId};
use scene::{Dim, GeometrySource, GeometryValue, Material, SourceKey};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::policy::UpdatePolicy;

/// What the network task writes to the peer socket.
pub(crate) enum Outbound {
    Frame(Vec<u8>),
    Close,
}

pub(crate) struct PeerLink {
    pub id: Uuid,
    pub tx: mpsc::UnboundedSender<Outbound>,
}

pub(crate) struct TrackedObject {
    pub id: ObjectId,
    pub key: SourceKey,
    pub source: Weak<dyn GeometrySource>,
    /// Present for by-value adds: the engine owns the source.
    pub keep_alive: Option<Arc<dyn GeometrySource>>,
    pub window_id: WindowId,
    pub dim: Dim,
    pub material: Material,
    pub seq: u64,
}

impl TrackedObject {
    pub fn expired(&self) -> bool {
        self.source.strong_count() == 0
    }
}

pub(crate) struct WindowRecord {
    pub id: WindowId,
    pub display_name: String,
    pub dim: Dim,
    pub grid_visible: bool,
    pub axes_visible: bool,
    pub legend_visible: bool,
    pub created_seq: u64,
}

impl WindowRecord {
    pub fn new(id: WindowId, display_name: String, dim: Dim, created_seq: u64) -> Self {
        Self {
            id,
            display_name,
            dim,
            grid_visible: true,
            axes_visible: true,
            legend_visible: true,
            created_seq,
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    pub objects: HashMap<ObjectId, TrackedObject>,
    pub source_to_id: HashMap<SourceKey, ObjectId>,
    pub window_objects: HashMap<WindowId, HashSet<ObjectId>>,
    pub dirty_2d: HashMap<WindowId, HashSet<ObjectId>>,
    pub dirty_3d: HashMap<WindowId, HashSet<ObjectId>>,
    pub windows: HashMap<WindowId, WindowRecord>,
    pub name_to_id: HashMap<String, WindowId>,
    pub policy: UpdatePolicy,
    pub peer: Option<PeerLink>,
    next_object: u64,
    next_seq: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh object id, unique for the engine's lifetime.
    pub fn next_object_id(&mut self) -> ObjectId {
        self.next_object += 1;
        format!("obj_{}", self.next_object)
    }

    pub fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn resolve_window(&self, name: &str, dim: Dim) -> Result<WindowId, EngineError> {
        let Some(&id) = self.name_to_id.get(name) else {
            return Err(EngineError::WindowNotFound {
                name: name.to_string(),
            });
        };
        match self.windows.get(&id) {
            Some(window) if window.dim == dim => Ok(id),
            Some(_) => Err(EngineError::KindMismatch {
                name: name.to_string(),
            }),
            None => Err(EngineError::WindowNotFound {
                name: name.to_string(),
            }),
        }
    }

    pub fn dirty_set_mut(&mut self, dim: Dim, window_id: WindowId) -> &mut HashSet<ObjectId> {
        match dim {
            Dim::D2 => self.dirty_2d.entry(window_id).or_default(),
            Dim::D3 => self.dirty_3d.entry(window_id).or_default(),
        }
    }

    pub fn take_dirty(&mut self, dim: Dim, window_id: WindowId) -> HashSet<ObjectId> {
        let map = match dim {
            Dim::D2 => &mut self.dirty_2d,
            Dim::D3 => &mut self.dirty_3d,
        };
        map.remove(&window_id).unwrap_or_default()
    }

    /// Encode and hand one message to the peer. With no peer connected
    /// the message is dropped; transport problems never reach callers.
    pub fn send_message(&self, message: &VisMessage) {
        let Some(peer) = &self.peer else {
            debug!("no peer connected, dropping message");
            return;
        };
        match protocol::encode_frame(message) {
            Ok(frame) => {
                if peer.tx.send(Outbound::Frame(frame)).is_err() {
                    debug!("peer channel closed, dropping message");
                }
            }
            Err(e) => error!("failed to encode frame: {e}"),
        }
    }

    pub fn send_batch(&self, batch: CommandBatch) {
        if !batch.is_empty() {
            self.send_message(&batch.into_message());
        }
    }
}

/// Ordered command batch for one window, building exactly one scene
/// update. The dimension is fixed by the window.
pub(crate) struct CommandBatch {
    window_id: WindowId,
    window_name: String,
    commands: BatchCommands,
}

enum BatchCommands {
    D2(Vec<Command2D>),
    D3(Vec<Command3D>),
}

impl CommandBatch {
    pub fn for_window(window: &WindowRecord) -> Self {
        Self {
            window_id: window.id,
            window_name: window.display_name.clone(),
            commands: match window.dim {
                Dim::D2 => BatchCommands::D2(Vec::new()),
                Dim::D3 => BatchCommands::D3(Vec::new()),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.commands {
            BatchCommands::D2(commands) => commands.is_empty(),
            BatchCommands::D3(commands) => commands.is_empty(),
        }
    }

    pub fn push_create_window(&mut self) {
        let window_id = self.window_id;
        let window_name = self.window_name.clone();
        match &mut self.commands {
            BatchCommands::D2(commands) => commands.push(Command::CreateWindow {
                window_id,
                window_name,
            }),
            BatchCommands::D3(commands) => commands.push(Command::CreateWindow {
                window_id,
                window_name,
            }),
        }
    }

    pub fn push_delete_window(&mut self) {
        let window_id = self.window_id;
        match &mut self.commands {
            BatchCommands::D2(commands) => commands.push(Command::DeleteWindow { window_id }),
            BatchCommands::D3(commands) => commands.push(Command::DeleteWindow { window_id }),
        }
    }

    pub fn push_set_title(&mut self, title: &str) {
        match &mut self.commands {
            BatchCommands::D2(commands) => commands.push(Command::SetTitle {
                title: title.to_string(),
            }),
            BatchCommands::D3(commands) => commands.push(Command::SetTitle {
                title: title.to_string(),
            }),
        }
    }

    pub fn push_set_grid_visible(&mut self, visible: bool) {
        match &mut self.commands {
            BatchCommands::D2(commands) => commands.push(Command::SetGridVisible { visible }),
            BatchCommands::D3(commands) => commands.push(Command::SetGridVisible { visible }),
        }
    }

    pub fn push_set_axes_visible(&mut self, visible: bool) {
        match &mut self.commands {
            BatchCommands::D2(commands) => commands.push(Command::SetAxesVisible { visible }),
            BatchCommands::D3(commands) => commands.push(Command::SetAxesVisible { visible }),
        }
    }

    pub fn push_set_legend_visible(&mut self, visible: bool) {
        match &mut self.commands {
            BatchCommands::D2(commands) => commands.push(Command::SetLegendVisible { visible }),
            BatchCommands::D3(commands) => commands.push(Command::SetLegendVisible { visible }),
        }
    }

    pub fn push_add_object(&mut self, id: ObjectId, material: Material, geometry: GeometryValue) {
        match (&mut self.commands, geometry) {
            (BatchCommands::D2(commands), GeometryValue::D2(geometry)) => {
                commands.push(Command::AddObject {
                    id,
                    material,
                    geometry,
                });
            }
            (BatchCommands::D3(commands), GeometryValue::D3(geometry)) => {
                commands.push(Command::AddObject {
                    id,
                    material,
                    geometry,
                });
            }
            _ => warn!("dropping add for {id}: geometry dimension does not match window"),
        }
    }

    pub fn push_update_geometry(&mut self, id: ObjectId, geometry: GeometryValue) {
        match (&mut self.commands, geometry) {
            (BatchCommands::D2(commands), GeometryValue::D2(geometry)) => {
                commands.push(Command::UpdateObjectGeometry { id, geometry });
            }
            (BatchCommands::D3(commands), GeometryValue::D3(geometry)) => {
                commands.push(Command::UpdateObjectGeometry { id, geometry });
            }
            _ => warn!("dropping update for {id}: geometry dimension does not match window"),
        }
    }

    pub fn push_delete_object(&mut self, id: ObjectId) {
        match &mut self.commands {
            BatchCommands::D2(commands) => commands.push(Command::DeleteObject { id }),
            BatchCommands::D3(commands) => commands.push(Command::DeleteObject { id }),
        }
    }

    pub fn into_message(self) -> VisMessage {
        match self.commands {
            BatchCommands::D2(commands) => VisMessage::Scene2D(SceneUpdate {
                window_id: self.window_id,
                window_name: self.window_name,
                commands,
            }),
            BatchCommands::D3(commands) => VisMessage::Scene3D(SceneUpdate {
                window_id: self.window_id,
                window_name: self.window_name,
                commands,
            }),
        }
    }
}
