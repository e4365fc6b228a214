//! Public facade: thread-safe entry points for the host application.
//!
//! The host constructs one [`VisServer`], calls [`run`](VisServer::run)
//! to start the network thread, and then drives geometry from any
//! number of threads. All operations are synchronous; produced
//! commands are handed to the network task without blocking.

use std::sync::Arc;

use parking_lot::Mutex;
use protocol::ObjectId;
use scene::{source_from_value, Dim, GeometrySource, Material, Shape, Source};
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::core::EngineCore;
use crate::error::EngineError;
use crate::net::{self, NetEvent};

pub struct VisServer {
    core: Arc<EngineCore>,
    port: u16,
    net_rx: Mutex<Option<mpsc::UnboundedReceiver<NetEvent>>>,
    net_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl VisServer {
    pub fn new(port: u16) -> Self {
        let (core, net_rx) = EngineCore::new();
        Self {
            core,
            port,
            net_rx: Mutex::new(Some(net_rx)),
            net_thread: Mutex::new(None),
        }
    }

    /// Start the accept loop and timer task on a dedicated thread.
    /// A second call is ignored.
    pub fn run(&self) {
        let Some(net_rx) = self.net_rx.lock().take() else {
            debug!("run() called twice, ignoring");
            return;
        };
        let core = Arc::clone(&self.core);
        let port = self.port;
        let spawned = std::thread::Builder::new()
            .name("vistream-net".to_string())
            .spawn(move || net::run_network(core, net_rx, port));
        match spawned {
            Ok(handle) => *self.net_thread.lock() = Some(handle),
            Err(e) => error!("failed to spawn network thread: {e}"),
        }
    }

    /// Cancel the timer, close the peer ("going away"), stop the
    /// acceptor and join the network thread. Idempotent.
    pub fn stop(&self) {
        self.core.close_peer();
        self.core.shutdown_net();
        if let Some(handle) = self.net_thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// Id assigned to the connected peer, if any.
    pub fn connected_peer_id(&self) -> Option<Uuid> {
        self.core.connected_peer_id()
    }

    /// Track a host-owned source. The engine keeps a weak reference;
    /// dropping the last host `Arc` removes the object lazily.
    pub fn add<T: Shape>(
        &self,
        source: &Arc<Source<T>>,
        window_name: &str,
        material: Material,
    ) -> Result<ObjectId, EngineError> {
        let erased: Arc<dyn GeometrySource> = Arc::clone(source) as Arc<dyn GeometrySource>;
        self.core.add_source(erased, window_name, material, false)
    }

    /// Track a bare value. The engine clones it into a source it owns;
    /// the object persists until cleared or its window is removed.
    pub fn add_value<T: Shape>(
        &self,
        shape: T,
        window_name: &str,
        material: Material,
    ) -> Result<ObjectId, EngineError> {
        self.core
            .add_source(source_from_value(shape.into_value()), window_name, material, true)
    }

    pub fn clear(&self, window_name: &str, dim: Dim) -> Result<(), EngineError> {
        self.core.clear(window_name, dim)
    }

    pub fn clear_dynamic(&self, window_name: &str, dim: Dim) -> Result<(), EngineError> {
        self.core.clear_dynamic(window_name, dim)
    }

    pub fn clear_static(&self, window_name: &str, dim: Dim) -> Result<(), EngineError> {
        self.core.clear_static(window_name, dim)
    }

    /// Flush one window's pending updates now.
    pub fn drawnow(&self, window_name: &str, dim: Dim) -> Result<(), EngineError> {
        self.core.drawnow(window_name, dim)
    }

    pub fn set_auto_update_policy(&self, enabled: bool, threshold: i32, interval_ms: i32) {
        self.core
            .set_auto_update_policy(enabled, threshold, interval_ms);
    }

    pub fn create_window(&self, name: &str, dim: Dim) -> Result<(), EngineError> {
        self.core.create_window(name, dim)
    }

    pub fn rename_window(&self, old: &str, new: &str, dim: Dim) -> Result<(), EngineError> {
        self.core.rename_window(old, new, dim)
    }

    pub fn remove_window(&self, name: &str, dim: Dim) -> Result<(), EngineError> {
        self.core.remove_window(name, dim)
    }

    pub fn set_grid_visible(&self, name: &str, visible: bool, dim: Dim) -> Result<(), EngineError> {
        self.core.set_grid_visible(name, visible, dim)
    }

    pub fn set_axes_visible(&self, name: &str, visible: bool, dim: Dim) -> Result<(), EngineError> {
        self.core.set_axes_visible(name, visible, dim)
    }

    pub fn set_legend_visible(
        &self,
        name: &str,
        visible: bool,
        dim: Dim,
    ) -> Result<(), EngineError> {
        self.core.set_legend_visible(name, visible, dim)
    }

    pub fn get_window_names(&self, dim: Dim) -> Vec<String> {
        self.core.window_names(dim)
    }

    pub fn get_windows_number(&self) -> usize {
        self.core.windows_number()
    }

    pub fn get_observables_number(&self) -> usize {
        self.core.observables_number()
    }
}

impl Drop for VisServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use foundation::math::Vec2;
    use protocol::Command;
    use scene::{Geometry2D, Point2, Pose2};

    use super::*;
    use crate::testkit::{drain, scene_2d};

    fn point_at(update_geometry: &Geometry2D) -> Vec2 {
        match update_geometry {
            Geometry2D::Point(p) => p.pos,
            other => panic!("expected a point, got {other:?}"),
        }
    }

    /// S1: create a window, add a point, mutate it twice, drawnow.
    #[test]
    fn manual_flush_carries_latest_snapshot() {
        let server = VisServer::new(0);
        let mut peer = server.core.attach_peer().expect("attach").1;

        server.create_window("w", Dim::D2).expect("create");
        let source = Source::new(Point2 {
            pos: Vec2::new(0.0, 0.0),
        });
        let id = server.add(&source, "w", Material::default()).expect("add");
        assert_eq!(id, "obj_1");

        source.set_position(Vec2::new(1.0, 0.0));
        source.set_position(Vec2::new(2.0, 0.0));

        let before = drain(&mut peer);
        assert_eq!(before.len(), 2, "CreateWindow and AddObject only");
        assert!(matches!(
            scene_2d(&before[0]).commands[0],
            Command::CreateWindow { .. }
        ));
        match &scene_2d(&before[1]).commands[0] {
            Command::AddObject { id, geometry, .. } => {
                assert_eq!(id, "obj_1");
                assert_eq!(point_at(geometry), Vec2::new(0.0, 0.0));
            }
            other => panic!("expected AddObject, got {other:?}"),
        }

        server.drawnow("w", Dim::D2).expect("drawnow");
        let flushed = drain(&mut peer);
        assert_eq!(flushed.len(), 1);
        match &scene_2d(&flushed[0]).commands[0] {
            Command::UpdateObjectGeometry { id, geometry } => {
                assert_eq!(id, "obj_1");
                assert_eq!(point_at(geometry), Vec2::new(2.0, 0.0));
            }
            other => panic!("expected UpdateObjectGeometry, got {other:?}"),
        }

        // Nothing dirty: a second drawnow stays silent.
        server.drawnow("w", Dim::D2).expect("drawnow");
        assert!(drain(&mut peer).is_empty());
    }

    /// S2: threshold policy coalesces two mutations into one update.
    #[test]
    fn threshold_flush_coalesces() {
        let server = VisServer::new(0);
        let mut peer = server.core.attach_peer().expect("attach").1;
        server.create_window("w", Dim::D2).expect("create");
        server.set_auto_update_policy(true, 2, 0);

        let a = Source::new(Point2::default());
        let b = Source::new(Point2::default());
        server.add(&a, "w", Material::default()).expect("add a");
        server.add(&b, "w", Material::default()).expect("add b");
        drain(&mut peer);

        a.set_position(Vec2::new(1.0, 0.0));
        a.set_position(Vec2::new(2.0, 0.0));
        assert!(drain(&mut peer).is_empty(), "one dirty object, below threshold");
        b.set_position(Vec2::new(0.0, 1.0));

        let messages = drain(&mut peer);
        assert_eq!(messages.len(), 1);
        let commands = &scene_2d(&messages[0]).commands;
        assert_eq!(commands.len(), 2);
        let a_update = commands
            .iter()
            .find_map(|c| match c {
                Command::UpdateObjectGeometry { id, geometry } if id == "obj_1" => Some(geometry),
                _ => None,
            })
            .expect("update for obj_1");
        assert_eq!(
            point_at(a_update),
            Vec2::new(2.0, 0.0),
            "intermediate snapshot coalesced away"
        );
    }

    /// S4: reconnect replay reaches current state in insertion order.
    #[test]
    fn reconnect_replays_windows_and_objects() {
        let server = VisServer::new(0);
        server.create_window("w", Dim::D2).expect("create");

        let a = Source::new(Point2::default());
        let b = Source::new(Pose2::default());
        server.add(&a, "w", Material::default()).expect("add a");
        server.add(&b, "w", Material::default()).expect("add b");

        let (peer_id, first_rx) = server.core.attach_peer().expect("attach");
        drop(first_rx);
        server.core.detach_peer(peer_id);
        assert!(!server.is_connected());

        a.set_position(Vec2::new(5.0, 5.0));

        let mut peer = server.core.attach_peer().expect("reattach").1;
        let messages = drain(&mut peer);
        assert_eq!(messages.len(), 2, "window batch plus object batch");
        assert!(matches!(
            scene_2d(&messages[0]).commands[0],
            Command::CreateWindow { .. }
        ));
        let adds = &scene_2d(&messages[1]).commands;
        assert_eq!(adds.len(), 2);
        match &adds[0] {
            Command::AddObject { id, geometry, .. } => {
                assert_eq!(id, "obj_1");
                assert_eq!(point_at(geometry), Vec2::new(5.0, 5.0), "current snapshot");
            }
            other => panic!("expected AddObject, got {other:?}"),
        }
        assert!(matches!(&adds[1], Command::AddObject { id, .. } if id == "obj_2"));
    }

    /// S5: dropping the host's last reference removes the object on
    /// the next operation.
    #[test]
    fn expired_source_is_swept_with_delete() {
        let server = VisServer::new(0);
        let mut peer = server.core.attach_peer().expect("attach").1;
        server.create_window("w", Dim::D2).expect("create");

        let source = Source::new(Point2::default());
        let id = server.add(&source, "w", Material::default()).expect("add");
        drain(&mut peer);
        assert_eq!(server.get_observables_number(), 1);

        drop(source);
        server.drawnow("w", Dim::D2).expect("drawnow");

        let messages = drain(&mut peer);
        assert_eq!(messages.len(), 1);
        assert!(
            matches!(&scene_2d(&messages[0]).commands[0], Command::DeleteObject { id: deleted } if *deleted == id)
        );
        assert_eq!(server.get_observables_number(), 0);

        let reg = server.core.registry().lock();
        assert!(reg.objects.is_empty());
        assert!(reg.source_to_id.is_empty());
        assert!(reg.window_objects.values().all(|set| set.is_empty()));
    }

    /// S6: rename retargets the name, keeps the window id.
    #[test]
    fn rename_window_emits_set_title() {
        let server = VisServer::new(0);
        let mut peer = server.core.attach_peer().expect("attach").1;
        server.create_window("a", Dim::D2).expect("create");

        let src = Source::new(Point2::default());
        server.add(&src, "a", Material::default()).expect("add");

        let created = drain(&mut peer);
        let original_id = scene_2d(&created[0]).window_id;

        server.rename_window("a", "b", Dim::D2).expect("rename");
        let messages = drain(&mut peer);
        assert_eq!(messages.len(), 1);
        let update = scene_2d(&messages[0]);
        assert_eq!(update.window_id, original_id);
        assert!(
            matches!(&update.commands[0], Command::SetTitle { title } if title == "b")
        );

        let src2 = Source::new(Point2::default());
        assert_eq!(
            server.add(&src2, "a", Material::default()),
            Err(EngineError::WindowNotFound {
                name: "a".to_string()
            })
        );
        assert!(server.add(&src2, "b", Material::default()).is_ok());
    }

    #[test]
    fn rename_to_same_name_is_a_silent_success() {
        let server = VisServer::new(0);
        let mut peer = server.core.attach_peer().expect("attach").1;
        server.create_window("w", Dim::D2).expect("create");
        drain(&mut peer);

        assert!(server.rename_window("w", "w", Dim::D2).is_ok());
        assert!(drain(&mut peer).is_empty());
    }

    #[test]
    fn remove_window_deletes_objects_then_window() {
        let server = VisServer::new(0);
        let mut peer = server.core.attach_peer().expect("attach").1;
        server.create_window("w", Dim::D2).expect("create");

        let a = Source::new(Point2::default());
        let b = Source::new(Point2::default());
        server.add(&a, "w", Material::default()).expect("add a");
        server.add(&b, "w", Material::default()).expect("add b");
        drain(&mut peer);

        server.remove_window("w", Dim::D2).expect("remove");
        let messages = drain(&mut peer);
        assert_eq!(messages.len(), 1, "one scene update for the removal");
        let commands = &scene_2d(&messages[0]).commands;
        assert_eq!(commands.len(), 3);
        assert!(commands[..2]
            .iter()
            .all(|c| matches!(c, Command::DeleteObject { .. })));
        assert!(matches!(commands[2], Command::DeleteWindow { .. }));

        assert_eq!(server.get_windows_number(), 0);
        assert_eq!(server.get_observables_number(), 0);
        assert!(server.get_window_names(Dim::D2).is_empty());
    }

    #[test]
    fn window_names_are_unique_across_dimensions() {
        let server = VisServer::new(0);
        server.create_window("w", Dim::D2).expect("create");
        assert_eq!(
            server.create_window("w", Dim::D3),
            Err(EngineError::DuplicateName {
                name: "w".to_string()
            })
        );
        assert_eq!(server.create_window("", Dim::D2), Err(EngineError::EmptyName));

        assert_eq!(
            server.drawnow("w", Dim::D3),
            Err(EngineError::KindMismatch {
                name: "w".to_string()
            })
        );
    }

    #[test]
    fn add_without_window_changes_nothing() {
        let server = VisServer::new(0);
        let source = Source::new(Point2::default());
        assert!(matches!(
            server.add(&source, "missing", Material::default()),
            Err(EngineError::WindowNotFound { .. })
        ));
        assert_eq!(server.get_observables_number(), 0);

        // The source stays unbound: mutations mark nothing dirty.
        source.set_position(Vec2::new(1.0, 1.0));
        let reg = server.core.registry().lock();
        assert!(reg.dirty_2d.is_empty());
    }

    #[test]
    fn messages_are_dropped_without_a_peer() {
        let server = VisServer::new(0);
        server.create_window("w", Dim::D2).expect("create");
        let source = Source::new(Point2::default());
        server.add(&source, "w", Material::default()).expect("add");
        source.set_position(Vec2::new(1.0, 0.0));
        server.drawnow("w", Dim::D2).expect("drawnow");
        assert!(!server.is_connected());
        assert!(server.connected_peer_id().is_none());
    }
}
