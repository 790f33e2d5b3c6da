//! Fan-out to open connections

use crate::messages::ServerMessage;
use crate::registry::ConnectionId;
use crate::server::connections::{ConnectionDirectory, OutboundMessage};
use std::sync::Arc;
use tracing::{debug, warn};

/// Delivers envelopes to one or many sessions
///
/// Delivery is best-effort: a full or closed queue drops that recipient's
/// copy and moves on to the next.
#[derive(Clone)]
pub struct Broadcaster {
    connections: Arc<ConnectionDirectory>,
}

impl Broadcaster {
    pub fn new(connections: Arc<ConnectionDirectory>) -> Self {
        Self { connections }
    }

    /// Queue `message` for every open session except `exclude`.
    /// Returns how many sessions accepted it.
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<ConnectionId>) -> usize {
        let Some(msg) = encode(message) else {
            return 0;
        };

        let recipients = self.connections.open_sessions(exclude);
        let mut delivered = 0;

        for session in &recipients {
            match session.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // Expected during rapid disconnects or with a stalled reader
                    debug!(conn_id = %session.id, kind = msg.kind, error = %e, "Dropped message for session");
                }
            }
        }

        debug!(kind = msg.kind, recipients = recipients.len(), delivered, "Broadcast");
        delivered
    }

    /// Queue `message` for a single session
    pub fn send_to(&self, target: ConnectionId, message: &ServerMessage) -> bool {
        let Some(session) = self.connections.get(target) else {
            debug!(conn_id = %target, kind = message.kind(), "No session for target");
            return false;
        };

        let Some(msg) = encode(message) else {
            return false;
        };

        match session.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!(conn_id = %target, kind = message.kind(), error = %e, "Failed to queue message");
                false
            }
        }
    }
}

fn encode(message: &ServerMessage) -> Option<OutboundMessage> {
    match OutboundMessage::encode(message) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(kind = message.kind(), error = %e, "Failed to serialize message");
            None
        }
    }
}
