// ABOUTME: Registry of connected listeners
// ABOUTME: Queues event frames to one socket or fans them out to every socket

use crate::protocol::messages::Message;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Listener identifier, a v4 UUID per socket
pub type ClientId = String;

/// Frames queued for a socket's writer task
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Serialized event; shared when broadcast
    Text(Arc<str>),
}

/// One open event channel socket
#[derive(Debug)]
pub struct ConnectedClient {
    /// Listener identifier
    pub client_id: ClientId,
    /// Peer address, when known
    pub remote_addr: Option<SocketAddr>,
    /// Queue drained by the socket's writer task
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectedClient {
    /// Register `tx` as the outbound queue for `client_id`
    pub fn new(client_id: ClientId, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            client_id,
            remote_addr: None,
            tx,
        }
    }

    /// Queue a frame; fails once the writer task has gone
    pub fn send(&self, frame: ServerMessage) -> Result<(), mpsc::error::SendError<ServerMessage>> {
        self.tx.send(frame)
    }
}

/// Connected listeners keyed by id
///
/// Shared behind an `Arc` by the server, the listener counter and the
/// scheduler. Sends never block: frames go to per-socket queues.
#[derive(Debug, Default)]
pub struct ClientManager {
    clients: RwLock<HashMap<ClientId, ConnectedClient>>,
}

impl ClientManager {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener socket
    pub fn add_client(&self, client: ConnectedClient) {
        let mut clients = self.clients.write();
        log::debug!("Registering {} ({} open)", client.client_id, clients.len() + 1);
        clients.insert(client.client_id.clone(), client);
    }

    /// Forget a listener socket, returning it if it was registered
    pub fn remove_client(&self, client_id: &str) -> Option<ConnectedClient> {
        let mut clients = self.clients.write();
        let removed = clients.remove(client_id);
        if removed.is_some() {
            log::debug!("Unregistered {} ({} open)", client_id, clients.len());
        }
        removed
    }

    /// Open sockets right now
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Queue `message` for every listener
    ///
    /// Serializes once; returns how many queues accepted the frame.
    pub fn broadcast(&self, message: &Message) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };

        let delivered = self
            .clients
            .read()
            .values()
            .filter(|client| client.send(frame.clone()).is_ok())
            .count();
        log::debug!("Broadcast {} to {} listeners", message.name(), delivered);
        delivered
    }

    /// Queue `message` for one listener; false if it is gone
    pub fn send_to_client(&self, client_id: &str, message: &Message) -> bool {
        let Some(frame) = encode(message) else {
            return false;
        };

        self.clients
            .read()
            .get(client_id)
            .is_some_and(|client| client.send(frame).is_ok())
    }

    /// Visit every open socket under the read lock
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ConnectedClient),
    {
        self.clients.read().values().for_each(|client| f(client));
    }
}

fn encode(message: &Message) -> Option<ServerMessage> {
    match message.to_json() {
        Ok(json) => Some(ServerMessage::Text(json.into())),
        Err(e) => {
            log::error!("Failed to serialize {}: {}", message.name(), e);
            None
        }
    }
}
