//! Shared helpers for engine tests: a directly-attached peer channel
//! plus frame decoding.

use protocol::{Scene2DUpdate, VisMessage};
use tokio::sync::mpsc;

use crate::registry::Outbound;

/// Drain and decode every frame currently queued for the peer.
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<VisMessage> {
    let mut out = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Frame(bytes) = outbound {
            out.push(protocol::decode_frame(&bytes).expect("decode frame"));
        }
    }
    out
}

pub(crate) fn scene_2d(message: &VisMessage) -> &Scene2DUpdate {
    match message {
        VisMessage::Scene2D(update) => update,
        VisMessage::Scene3D(_) => panic!("expected a 2D scene update"),
    }
}
