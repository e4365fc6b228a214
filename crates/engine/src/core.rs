//! Engine operations over the registry.
//!
//! Every public operation takes the registry lock, sweeps expired
//! sources first, runs its body, and emits any produced commands while
//! still holding the lock (the peer send handle is an unbounded
//! channel, so emission never blocks). Per-window command order on the
//! wire therefore matches production order.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use protocol::{ObjectId, WindowId};
use scene::{ChangeObserver, Dim, GeometrySource, Material, SourceKey};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::net::NetEvent;
use crate::policy::UpdatePolicy;
use crate::registry::{CommandBatch, Outbound, PeerLink, Registry, TrackedObject, WindowRecord};

pub(crate) struct EngineCore {
    weak_self: Weak<EngineCore>,
    registry: Mutex<Registry>,
    net_tx: mpsc::UnboundedSender<NetEvent>,
}

enum ClearMode {
    All,
    ExpiredOnly,
    LiveOnly,
}

impl EngineCore {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<NetEvent>) {
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let core = Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            registry: Mutex::new(Registry::new()),
            net_tx,
        });
        (core, net_rx)
    }

    fn observer_handle(&self) -> Weak<dyn ChangeObserver> {
        self.weak_self.clone()
    }

    fn notify_net(&self, event: NetEvent) {
        let _ = self.net_tx.send(event);
    }

    pub fn shutdown_net(&self) {
        let _ = self.net_tx.send(NetEvent::Shutdown);
    }

    // --- object management ---

    pub fn add_source(
        &self,
        source: Arc<dyn GeometrySource>,
        window_name: &str,
        material: Material,
        owned: bool,
    ) -> Result<ObjectId, EngineError> {
        let mut reg = self.registry.lock();
        self.sweep_expired_locked(&mut reg);

        let window_id = reg.resolve_window(window_name, source.dim())?;

        let id = reg.next_object_id();
        let seq = reg.next_seq();
        let key = source.key();
        let snapshot = source.snapshot();

        source.bind(self.observer_handle());
        reg.source_to_id.insert(key, id.clone());
        reg.window_objects
            .entry(window_id)
            .or_default()
            .insert(id.clone());
        reg.objects.insert(
            id.clone(),
            TrackedObject {
                id: id.clone(),
                key,
                source: Arc::downgrade(&source),
                keep_alive: owned.then(|| Arc::clone(&source)),
                window_id,
                dim: source.dim(),
                material: material.clone(),
                seq,
            },
        );

        let batch = {
            let Some(window) = reg.windows.get(&window_id) else {
                return Ok(id);
            };
            let mut batch = CommandBatch::for_window(window);
            batch.push_add_object(id.clone(), material, snapshot);
            batch
        };
        reg.send_batch(batch);
        Ok(id)
    }

    pub fn clear(&self, window_name: &str, dim: Dim) -> Result<(), EngineError> {
        self.clear_matching(window_name, dim, ClearMode::All)
    }

    /// Remove tracked objects in the window whose source has expired.
    pub fn clear_dynamic(&self, window_name: &str, dim: Dim) -> Result<(), EngineError> {
        self.clear_matching(window_name, dim, ClearMode::ExpiredOnly)
    }

    /// Remove tracked objects in the window whose source is still live.
    pub fn clear_static(&self, window_name: &str, dim: Dim) -> Result<(), EngineError> {
        self.clear_matching(window_name, dim, ClearMode::LiveOnly)
    }

    fn clear_matching(
        &self,
        window_name: &str,
        dim: Dim,
        mode: ClearMode,
    ) -> Result<(), EngineError> {
        let mut reg = self.registry.lock();
        self.sweep_expired_locked(&mut reg);

        let window_id = reg.resolve_window(window_name, dim)?;
        let candidates: Vec<ObjectId> = reg
            .window_objects
            .get(&window_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut batches = HashMap::new();
        for id in candidates {
            let Some(tracked) = reg.objects.get(&id) else {
                continue;
            };
            let matches_mode = match mode {
                ClearMode::All => true,
                ClearMode::ExpiredOnly => tracked.expired(),
                ClearMode::LiveOnly => !tracked.expired(),
            };
            if matches_mode {
                self.remove_object_locked(&mut reg, &id, &mut batches);
            }
        }
        for batch in batches.into_values() {
            reg.send_batch(batch);
        }
        Ok(())
    }

    /// Remove every tracked object whose host dropped its source.
    /// Runs at the start of each mutating operation; expiry is always
    /// discovered lazily.
    fn sweep_expired_locked(&self, reg: &mut Registry) {
        let expired: Vec<ObjectId> = reg
            .objects
            .values()
            .filter(|tracked| tracked.expired())
            .map(|tracked| tracked.id.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        let mut batches = HashMap::new();
        for id in expired {
            self.remove_object_locked(reg, &id, &mut batches);
        }
        for batch in batches.into_values() {
            reg.send_batch(batch);
        }
    }

    fn remove_object_locked(
        &self,
        reg: &mut Registry,
        id: &str,
        batches: &mut HashMap<WindowId, CommandBatch>,
    ) {
        let Some(tracked) = reg.objects.remove(id) else {
            return;
        };

        // A re-added source maps to its newest object id; only the
        // current holder may clear the binding.
        if reg.source_to_id.get(&tracked.key).map(String::as_str) == Some(id) {
            reg.source_to_id.remove(&tracked.key);
            if let Some(source) = tracked.source.upgrade() {
                source.unbind(&self.observer_handle());
            }
        }

        if let Some(set) = reg.window_objects.get_mut(&tracked.window_id) {
            set.remove(id);
        }
        match tracked.dim {
            Dim::D2 => {
                if let Some(set) = reg.dirty_2d.get_mut(&tracked.window_id) {
                    set.remove(id);
                }
            }
            Dim::D3 => {
                if let Some(set) = reg.dirty_3d.get_mut(&tracked.window_id) {
                    set.remove(id);
                }
            }
        }

        if let Some(window) = reg.windows.get(&tracked.window_id) {
            batches
                .entry(tracked.window_id)
                .or_insert_with(|| CommandBatch::for_window(window))
                .push_delete_object(id.to_string());
        }
    }

    // --- flushing ---

    pub fn drawnow(&self, window_name: &str, dim: Dim) -> Result<(), EngineError> {
        let mut reg = self.registry.lock();
        self.sweep_expired_locked(&mut reg);
        let window_id = reg.resolve_window(window_name, dim)?;
        self.flush_window_locked(&mut reg, window_id, dim);
        Ok(())
    }

    /// Interval-policy entry point: flush every non-empty dirty set.
    pub fn flush_all(&self) {
        let mut reg = self.registry.lock();
        self.sweep_expired_locked(&mut reg);

        let flat: Vec<WindowId> = reg
            .dirty_2d
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(window_id, _)| *window_id)
            .collect();
        for window_id in flat {
            self.flush_window_locked(&mut reg, window_id, Dim::D2);
        }

        let solid: Vec<WindowId> = reg
            .dirty_3d
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(window_id, _)| *window_id)
            .collect();
        for window_id in solid {
            self.flush_window_locked(&mut reg, window_id, Dim::D3);
        }
    }

    fn flush_window_locked(&self, reg: &mut Registry, window_id: WindowId, dim: Dim) {
        let dirty = reg.take_dirty(dim, window_id);
        if dirty.is_empty() {
            return;
        }

        let batch = {
            let Some(window) = reg.windows.get(&window_id) else {
                return;
            };
            let mut batch = CommandBatch::for_window(window);
            for id in dirty {
                let Some(tracked) = reg.objects.get(&id) else {
                    continue;
                };
                // Expired sources are skipped here; the next sweep
                // emits their DeleteObject.
                let Some(source) = tracked.source.upgrade() else {
                    continue;
                };
                batch.push_update_geometry(id, source.snapshot());
            }
            batch
        };
        reg.send_batch(batch);
    }

    pub fn set_auto_update_policy(&self, enabled: bool, threshold: i32, interval_ms: i32) {
        {
            let mut reg = self.registry.lock();
            reg.policy = UpdatePolicy {
                enabled,
                threshold,
                interval_ms,
            };
        }
        // The timer itself lives on the network task.
        self.notify_net(NetEvent::PolicyChanged);
    }

    /// Tick period for the interval policy, or `None` when the timer
    /// should not run.
    pub fn desired_tick(&self) -> Option<Duration> {
        let reg = self.registry.lock();
        if reg.policy.enabled && reg.policy.interval_ms > 0 && reg.peer.is_some() {
            Some(Duration::from_millis(reg.policy.interval_ms as u64))
        } else {
            None
        }
    }

    // --- window control ---

    pub fn create_window(&self, name: &str, dim: Dim) -> Result<(), EngineError> {
        let mut reg = self.registry.lock();
        self.sweep_expired_locked(&mut reg);

        if name.is_empty() {
            return Err(EngineError::EmptyName);
        }
        if reg.name_to_id.contains_key(name) {
            return Err(EngineError::DuplicateName {
                name: name.to_string(),
            });
        }

        let id = WindowId::random();
        let seq = reg.next_seq();
        let record = WindowRecord::new(id, name.to_string(), dim, seq);
        let mut batch = CommandBatch::for_window(&record);
        batch.push_create_window();

        reg.name_to_id.insert(name.to_string(), id);
        reg.windows.insert(id, record);
        reg.send_batch(batch);

        info!("created window \"{name}\" ({dim:?})");
        Ok(())
    }

    pub fn rename_window(&self, old: &str, new: &str, dim: Dim) -> Result<(), EngineError> {
        let mut reg = self.registry.lock();
        self.sweep_expired_locked(&mut reg);

        if new.is_empty() {
            return Err(EngineError::EmptyName);
        }
        let window_id = reg.resolve_window(old, dim)?;
        if new == old {
            return Ok(());
        }
        if reg.name_to_id.contains_key(new) {
            return Err(EngineError::DuplicateName {
                name: new.to_string(),
            });
        }

        reg.name_to_id.remove(old);
        reg.name_to_id.insert(new.to_string(), window_id);
        let batch = {
            let Some(window) = reg.windows.get_mut(&window_id) else {
                return Ok(());
            };
            window.display_name = new.to_string();
            let mut batch = CommandBatch::for_window(window);
            batch.push_set_title(new);
            batch
        };
        reg.send_batch(batch);
        Ok(())
    }

    pub fn remove_window(&self, name: &str, dim: Dim) -> Result<(), EngineError> {
        let mut reg = self.registry.lock();
        self.sweep_expired_locked(&mut reg);

        let window_id = reg.resolve_window(name, dim)?;
        let ids: Vec<ObjectId> = reg
            .window_objects
            .remove(&window_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        let mut batches = HashMap::new();
        for id in &ids {
            self.remove_object_locked(&mut reg, id, &mut batches);
        }

        let mut batch = match batches.remove(&window_id) {
            Some(batch) => batch,
            None => match reg.windows.get(&window_id) {
                Some(window) => CommandBatch::for_window(window),
                None => return Ok(()),
            },
        };
        batch.push_delete_window();

        reg.dirty_2d.remove(&window_id);
        reg.dirty_3d.remove(&window_id);
        if let Some(record) = reg.windows.remove(&window_id) {
            reg.name_to_id.remove(&record.display_name);
        }
        reg.send_batch(batch);

        info!("removed window \"{name}\"");
        Ok(())
    }

    pub fn set_grid_visible(&self, name: &str, visible: bool, dim: Dim) -> Result<(), EngineError> {
        self.set_window_flag(name, dim, WindowFlag::Grid, visible)
    }

    pub fn set_axes_visible(&self, name: &str, visible: bool, dim: Dim) -> Result<(), EngineError> {
        self.set_window_flag(name, dim, WindowFlag::Axes, visible)
    }

    pub fn set_legend_visible(
        &self,
        name: &str,
        visible: bool,
        dim: Dim,
    ) -> Result<(), EngineError> {
        self.set_window_flag(name, dim, WindowFlag::Legend, visible)
    }

    fn set_window_flag(
        &self,
        name: &str,
        dim: Dim,
        flag: WindowFlag,
        visible: bool,
    ) -> Result<(), EngineError> {
        let mut reg = self.registry.lock();
        self.sweep_expired_locked(&mut reg);

        let window_id = reg.resolve_window(name, dim)?;
        let batch = {
            let Some(window) = reg.windows.get_mut(&window_id) else {
                return Ok(());
            };
            let mut batch = CommandBatch::for_window(window);
            match flag {
                WindowFlag::Grid => {
                    window.grid_visible = visible;
                    batch.push_set_grid_visible(visible);
                }
                WindowFlag::Axes => {
                    window.axes_visible = visible;
                    batch.push_set_axes_visible(visible);
                }
                WindowFlag::Legend => {
                    window.legend_visible = visible;
                    batch.push_set_legend_visible(visible);
                }
            }
            batch
        };
        reg.send_batch(batch);
        Ok(())
    }

    // --- connection management ---

    /// Admit a peer if the seat is free. Returns the receiving half of
    /// its send channel, pre-loaded with the state replay.
    pub fn attach_peer(&self) -> Option<(Uuid, mpsc::UnboundedReceiver<Outbound>)> {
        let admitted = {
            let mut reg = self.registry.lock();
            if reg.peer.is_some() {
                return None;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let peer_id = Uuid::new_v4();
            reg.peer = Some(PeerLink { id: peer_id, tx });
            self.replay_locked(&reg);
            (peer_id, rx)
        };
        self.notify_net(NetEvent::PeerChanged);
        Some(admitted)
    }

    /// Re-emit window creation and live objects so the frontend
    /// reaches the current engine state.
    fn replay_locked(&self, reg: &Registry) {
        let mut windows: Vec<&WindowRecord> = reg.windows.values().collect();
        windows.sort_by_key(|window| window.created_seq);

        for window in &windows {
            let mut batch = CommandBatch::for_window(window);
            batch.push_create_window();
            reg.send_batch(batch);
        }

        let mut objects: Vec<&TrackedObject> = reg.objects.values().collect();
        objects.sort_by_key(|tracked| tracked.seq);

        for window in &windows {
            let mut batch = CommandBatch::for_window(window);
            for tracked in objects.iter().filter(|t| t.window_id == window.id) {
                let Some(source) = tracked.source.upgrade() else {
                    continue;
                };
                batch.push_add_object(
                    tracked.id.clone(),
                    tracked.material.clone(),
                    source.snapshot(),
                );
            }
            reg.send_batch(batch);
        }
    }

    pub fn detach_peer(&self, peer_id: Uuid) {
        {
            let mut reg = self.registry.lock();
            if reg.peer.as_ref().map(|peer| peer.id) != Some(peer_id) {
                return;
            }
            reg.peer = None;
        }
        self.notify_net(NetEvent::PeerChanged);
    }

    /// Close the peer gracefully (used by `stop()`).
    pub fn close_peer(&self) {
        let link = self.registry.lock().peer.take();
        if let Some(link) = link {
            let _ = link.tx.send(Outbound::Close);
        }
        self.notify_net(NetEvent::PeerChanged);
    }

    // --- queries ---

    pub fn is_connected(&self) -> bool {
        self.registry.lock().peer.is_some()
    }

    pub fn connected_peer_id(&self) -> Option<Uuid> {
        self.registry.lock().peer.as_ref().map(|peer| peer.id)
    }

    pub fn window_names(&self, dim: Dim) -> Vec<String> {
        let reg = self.registry.lock();
        let mut windows: Vec<&WindowRecord> =
            reg.windows.values().filter(|w| w.dim == dim).collect();
        windows.sort_by_key(|window| window.created_seq);
        windows
            .into_iter()
            .map(|window| window.display_name.clone())
            .collect()
    }

    pub fn windows_number(&self) -> usize {
        self.registry.lock().windows.len()
    }

    pub fn observables_number(&self) -> usize {
        self.registry.lock().objects.len()
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Mutex<Registry> {
        &self.registry
    }
}

enum WindowFlag {
    Grid,
    Axes,
    Legend,
}

impl ChangeObserver for EngineCore {
    /// Dirty marking. Cheap on purpose: host setters call this on
    /// every mutation.
    fn on_change(&self, key: SourceKey) {
        let mut reg = self.registry.lock();
        let Some(id) = reg.source_to_id.get(&key).cloned() else {
            return;
        };
        let Some(tracked) = reg.objects.get(&id) else {
            return;
        };
        let (window_id, dim) = (tracked.window_id, tracked.dim);

        let set = reg.dirty_set_mut(dim, window_id);
        set.insert(id);
        let dirty_len = set.len();

        if reg.policy.threshold_reached(dirty_len) {
            self.flush_window_locked(&mut reg, window_id, dim);
        }
    }
}
