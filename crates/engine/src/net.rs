//! Network task: accepts the single rendering peer over WebSocket and
//! drives the interval-flush timer.
//!
//! Everything here runs on one cooperative runtime owned by a
//! dedicated thread. Host threads never touch the socket; they enqueue
//! frames on the peer channel and post [`NetEvent`]s for timer
//! transitions.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::core::EngineCore;
use crate::registry::Outbound;

/// Posted by host threads to the network task. Timer mutations happen
/// only here, never on the calling thread.
pub(crate) enum NetEvent {
    PolicyChanged,
    PeerChanged,
    Shutdown,
}

pub(crate) fn run_network(
    core: Arc<EngineCore>,
    net_rx: mpsc::UnboundedReceiver<NetEvent>,
    port: u16,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to build network runtime: {e}");
            return;
        }
    };
    runtime.block_on(serve(core, net_rx, port));
}

async fn serve(core: Arc<EngineCore>, net_rx: mpsc::UnboundedReceiver<NetEvent>, port: u16) {
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind port {port}: {e}");
            return;
        }
    };
    info!("listening on port {port}");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let timer = tokio::spawn(timer_loop(core.clone(), net_rx, shutdown_tx));

    let app = Router::new().route("/ws", get(ws_handler)).with_state(core);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await;
    if let Err(e) = served {
        error!("server error: {e}");
    }

    let _ = timer.await;
    info!("network task stopped");
}

/// Single cooperative timer for the interval policy. Rearmed whenever
/// the policy or the peer changes; runs only while
/// `enabled && interval_ms > 0 && peer connected`.
pub(crate) async fn timer_loop(
    core: Arc<EngineCore>,
    mut net_rx: mpsc::UnboundedReceiver<NetEvent>,
    shutdown_tx: watch::Sender<bool>,
) {
    let mut period = core.desired_tick();
    let mut ticker = make_ticker(period);

    loop {
        tokio::select! {
            event = net_rx.recv() => match event {
                Some(NetEvent::Shutdown) | None => break,
                Some(NetEvent::PolicyChanged) | Some(NetEvent::PeerChanged) => {
                    let desired = core.desired_tick();
                    // Same-state transitions keep the running ticker's
                    // phase; only a real change rearms.
                    if desired != period {
                        period = desired;
                        ticker = make_ticker(period);
                    }
                }
            },
            _ = tick(&mut ticker) => core.flush_all(),
        }
    }

    let _ = shutdown_tx.send(true);
}

fn make_ticker(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    })
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn ws_handler(State(core): State<Arc<EngineCore>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_peer(core, socket))
}

async fn handle_peer(core: Arc<EngineCore>, mut socket: WebSocket) {
    // Single-peer admission: while a peer holds the seat, newcomers
    // are closed right after the upgrade.
    let Some((peer_id, mut outbound)) = core.attach_peer() else {
        debug!("rejecting connection: a peer is already attached");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AGAIN,
                reason: Cow::Borrowed("peer already connected"),
            })))
            .await;
        return;
    };
    info!("peer {peer_id} connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Frame(bytes)) => {
                    if let Err(e) = sink.send(Message::Binary(bytes)).await {
                        warn!("send to peer failed: {e}");
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: Cow::Borrowed("going away"),
                        })))
                        .await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // The frontend sends no application messages.
                Some(Ok(_)) => {}
            },
        }
    }

    core.detach_peer(peer_id);
    info!("peer {peer_id} disconnected");
}

#[cfg(test)]
mod tests {
    use foundation::math::Vec2;
    use scene::{Dim, Material, Point2, Source};

    use super::*;
    use crate::testkit::{drain, scene_2d};

    #[tokio::test(start_paused = true)]
    async fn interval_flush_coalesces_mutations() {
        let (core, net_rx) = EngineCore::new();
        core.create_window("w", Dim::D2).expect("create window");

        let (_peer_id, mut peer_rx) = core.attach_peer().expect("attach");
        drain(&mut peer_rx); // replay

        let sources: Vec<_> = (0..3).map(|_| Source::new(Point2::default())).collect();
        for source in &sources {
            core.add_source(source.clone(), "w", Material::default(), false)
                .expect("add");
        }
        drain(&mut peer_rx); // add commands

        core.set_auto_update_policy(true, 1000, 33);

        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let timer = tokio::spawn(timer_loop(core.clone(), net_rx, shutdown_tx));
        tokio::time::sleep(Duration::from_millis(1)).await;

        for i in 0..10u32 {
            sources[(i % 3) as usize].set_position(Vec2::new(i as f32, 0.0));
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        let messages = drain(&mut peer_rx);
        assert_eq!(messages.len(), 1, "one coalesced update per interval");
        let update = scene_2d(&messages[0]);
        assert_eq!(update.commands.len(), 3);
        assert!(update
            .commands
            .iter()
            .all(|c| matches!(c, protocol::Command::UpdateObjectGeometry { .. })));

        // Nothing dirty: further ticks stay silent.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(drain(&mut peer_rx).is_empty());

        core.shutdown_net();
        timer.await.expect("timer task");
    }

    #[tokio::test(start_paused = true)]
    async fn timer_stops_when_peer_leaves() {
        let (core, net_rx) = EngineCore::new();
        core.create_window("w", Dim::D2).expect("create window");
        core.set_auto_update_policy(true, 1000, 10);
        assert_eq!(core.desired_tick(), None, "no peer, no timer");

        let (peer_id, mut peer_rx) = core.attach_peer().expect("attach");
        assert_eq!(core.desired_tick(), Some(Duration::from_millis(10)));

        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let timer = tokio::spawn(timer_loop(core.clone(), net_rx, shutdown_tx));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let source = Source::new(Point2::default());
        core.add_source(source.clone(), "w", Material::default(), false)
            .expect("add");
        drain(&mut peer_rx);

        core.detach_peer(peer_id);
        source.set_position(Vec2::new(1.0, 0.0));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Disconnected: the dirty mark stays queued for the next flush.
        assert!(drain(&mut peer_rx).is_empty());

        core.shutdown_net();
        timer.await.expect("timer task");
    }

    #[test]
    fn zero_interval_never_arms_the_timer() {
        let (core, _net_rx) = EngineCore::new();
        let _peer = core.attach_peer();
        core.set_auto_update_policy(true, 2, 0);
        assert_eq!(core.desired_tick(), None);
        core.set_auto_update_policy(true, 2, 25);
        assert_eq!(core.desired_tick(), Some(Duration::from_millis(25)));
        core.set_auto_update_policy(false, 2, 25);
        assert_eq!(core.desired_tick(), None);
    }

    #[test]
    fn second_peer_is_refused_a_seat() {
        let (core, _net_rx) = EngineCore::new();
        let first = core.attach_peer();
        assert!(first.is_some());
        assert!(core.attach_peer().is_none());
    }
}
