//! Connection directory
//!
//! Maps live connection handles to their sessions. Each session owns a
//! bounded outbound queue drained by the connection's writer task.

use crate::messages::ServerMessage;
use crate::registry::ConnectionId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Pre-serialized frame queued for a connection
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Envelope type, for logging
    pub kind: &'static str,
    /// JSON text, shared across all recipients of a fan-out
    pub payload: Arc<str>,
}

impl OutboundMessage {
    pub fn encode(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(message)?;
        Ok(Self {
            kind: message.kind(),
            payload: Arc::from(text),
        })
    }
}

/// One open connection
pub struct Session {
    /// Generated session id, also the handle stored on device records
    pub id: ConnectionId,
    pub opened_at: DateTime<Utc>,
    tx: mpsc::Sender<OutboundMessage>,
}

impl Session {
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            opened_at: Utc::now(),
            tx,
        }
    }

    /// Open until the writer task stops draining the queue
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue without waiting. Fails if the queue is full or the writer is gone.
    pub fn try_send(&self, msg: OutboundMessage) -> Result<(), TrySendError<OutboundMessage>> {
        self.tx.try_send(msg)
    }
}

/// All live sessions by connection handle
#[derive(Clone, Default)]
pub struct ConnectionDirectory {
    sessions: Arc<DashMap<ConnectionId, Arc<Session>>>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<Session>) {
        self.sessions.insert(session.id, session);
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Open sessions, minus `exclude`
    ///
    /// Collected up front so no shard lock is held while sending.
    pub fn open_sessions(&self, exclude: Option<ConnectionId>) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| Some(*entry.key()) != exclude && entry.value().is_open())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}
