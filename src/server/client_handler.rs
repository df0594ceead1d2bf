// ABOUTME: Per-socket event channel handler
// ABOUTME: Registers a listener, sends the live state on connect and answers resync requests

use crate::protocol::messages::Message;
use crate::server::client_manager::{ClientId, ClientManager, ConnectedClient, ServerMessage};
use crate::server::listeners::ListenerCounter;
use crate::server::scheduler::ScheduleView;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Registration that undoes itself when the socket handler returns
struct Registration {
    client_id: ClientId,
    clients: Arc<ClientManager>,
    listeners: Arc<ListenerCounter>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.clients.remove_client(&self.client_id);
        self.listeners.on_disconnect();
        log::info!("Listener {} disconnected", self.client_id);
    }
}

/// Serve one event channel socket until it closes
pub async fn handle_client(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    client_manager: Arc<ClientManager>,
    listeners: Arc<ListenerCounter>,
    schedule: ScheduleView,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut queue) = mpsc::unbounded_channel::<ServerMessage>();

    let client_id: ClientId = uuid::Uuid::new_v4().to_string();
    let mut client = ConnectedClient::new(client_id.clone(), tx);
    client.remote_addr = remote_addr;
    client_manager.add_client(client);

    let registration = Registration {
        client_id: client_id.clone(),
        clients: Arc::clone(&client_manager),
        listeners: Arc::clone(&listeners),
    };

    log::info!(
        "Listener connected: {} ({})",
        client_id,
        remote_addr.map(|a| a.to_string()).unwrap_or_else(|| "unknown".into())
    );

    // Late joiners get the live position before the new count goes out
    listeners.on_connect_with(|count| {
        if let Some(snapshot) = schedule.snapshot_with(count) {
            client_manager.send_to_client(&client_id, &snapshot.to_radio_state());
        }
    });

    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(ServerMessage::Text(text)) = queue.recv().await {
            if sink.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                log::debug!("Writer for {} stopped: socket closed", writer_id);
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                on_request(text.as_str(), &client_id, &client_manager, &schedule);
            }
            Ok(WsMessage::Close(_)) => break,
            // Pings are answered by axum; binary frames carry nothing for us
            Ok(_) => {}
            Err(e) => {
                log::warn!("Socket error for {}: {}", client_id, e);
                break;
            }
        }
    }

    writer.abort();
    drop(registration);
}

/// React to one text frame from a listener
fn on_request(
    text: &str,
    client_id: &ClientId,
    client_manager: &ClientManager,
    schedule: &ScheduleView,
) {
    let request = match Message::from_json(text) {
        Ok(request) => request,
        Err(e) => {
            log::warn!("Ignoring malformed frame from {}: {}", client_id, e);
            return;
        }
    };

    match request {
        Message::GetCurrentState => send_radio_state(client_id, client_manager, schedule),
        Message::SyncPosition => match schedule.snapshot() {
            Some(snapshot) => {
                log::debug!("sync-time for {}: {:.3}s", client_id, snapshot.current_position);
                client_manager.send_to_client(client_id, &snapshot.to_sync_time());
            }
            None => log::debug!("sync-position from {} while idle", client_id),
        },
        other => log::debug!("{} sent server-only event {}", client_id, other.name()),
    }
}

/// Send radio-state to one listener; nothing while the playlist is empty
fn send_radio_state(client_id: &str, client_manager: &ClientManager, schedule: &ScheduleView) {
    if let Some(snapshot) = schedule.snapshot() {
        client_manager.send_to_client(client_id, &snapshot.to_radio_state());
    }
}
