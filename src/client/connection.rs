// ABOUTME: Event channel connection for the listening client
// ABOUTME: Connects with tokio-tungstenite, feeds events to the sync engine and reconnects on loss

use crate::client::config::ClientConfig;
use crate::client::engine::SyncEngine;
use crate::error::Error;
use crate::protocol::messages::Message;
use crate::Result;
use futures_util::{Sink, SinkExt, StreamExt};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

/// Local control of a running listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerCommand {
    /// Flip between muted and audible
    ToggleMute,
    /// Ask the server for its position now
    Resync,
    /// Log what is playing and where
    Status,
}

enum SessionEnd {
    Closed,
    Shutdown,
}

/// Follow the broadcast until `shutdown` flips, reconnecting as needed
///
/// Playback continues from the local clock while disconnected; the
/// `radio-state` sent on every reconnect realigns it.
pub async fn run_listener(
    config: &ClientConfig,
    engine: &mut SyncEngine,
    mut commands: Option<mpsc::UnboundedReceiver<ListenerCommand>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        log::info!("Connecting to {}", config.server_url);
        match connect_async(config.server_url.as_str()).await {
            Ok((ws, _)) => {
                log::info!("Connected to {}", config.server_url);
                match session(ws, config, engine, &mut commands, &mut shutdown).await {
                    Ok(SessionEnd::Shutdown) => return Ok(()),
                    Ok(SessionEnd::Closed) => log::warn!("Server closed the connection"),
                    Err(e) => log::warn!("Connection lost: {}", e),
                }
            }
            Err(e) => log::warn!("Failed to connect to {}: {}", config.server_url, e),
        }

        log::info!("Reconnecting in {:?}", config.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

async fn session<S>(
    ws: S,
    config: &ClientConfig,
    engine: &mut SyncEngine,
    commands: &mut Option<mpsc::UnboundedReceiver<ListenerCommand>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd>
where
    S: futures_util::Stream<Item = std::result::Result<WsMessage, tungstenite::Error>>
        + Sink<WsMessage, Error = tungstenite::Error>
        + Unpin,
{
    let (mut write, mut read) = ws.split();

    let mut ticker = config.sync_interval.map(|period| {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let received_at = Instant::now();
                    match Message::from_json(&text) {
                        Ok(message) => on_event(engine, &message, received_at).await,
                        Err(e) => log::warn!("Ignoring malformed message: {}", e),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(SessionEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(Error::from(e)),
            },
            _ = next_tick(&mut ticker) => {
                send(&mut write, &Message::SyncPosition).await?;
            }
            command = next_command(commands) => match command {
                ListenerCommand::ToggleMute => {
                    if engine.is_muted() {
                        engine.unmute();
                        log::info!("Unmuted");
                    } else {
                        engine.mute();
                        log::info!("Muted");
                    }
                }
                ListenerCommand::Resync => send(&mut write, &Message::SyncPosition).await?,
                ListenerCommand::Status => log_status(engine),
            },
            _ = shutdown.changed() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}

async fn on_event(engine: &mut SyncEngine, message: &Message, received_at: Instant) {
    match message {
        Message::ListenersUpdate(update) => log::info!("Listeners: {}", update.count),
        Message::RadioState(state) => {
            log::info!(
                "On air: {} at {:.1}s ({} listening)",
                state.track.title,
                state.current_position,
                state.listener_count
            );
        }
        _ => log::debug!("Received {}", message.name()),
    }

    if let Err(e) = engine.handle_message(message, received_at).await {
        log::warn!("Could not follow {}: {}", message.name(), e);
    }
}

fn log_status(engine: &SyncEngine) {
    let levels = engine.levels();
    match engine.announced_track() {
        Some(track) => log::info!(
            "{} [{:.1}s / {:.1}s]{} rms={:.3} peak={:.3}",
            track.title,
            engine.current_time(),
            track.duration_seconds,
            if engine.is_muted() { " (muted)" } else { "" },
            levels.rms,
            levels.peak
        ),
        None => log::info!("Nothing playing yet"),
    }
}

async fn send<S>(sink: &mut S, message: &Message) -> Result<()>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let text = message.to_json()?;
    sink.send(WsMessage::Text(text)).await?;
    Ok(())
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_command(
    commands: &mut Option<mpsc::UnboundedReceiver<ListenerCommand>>,
) -> ListenerCommand {
    if let Some(rx) = commands.as_mut() {
        if let Some(command) = rx.recv().await {
            return command;
        }
        // Sender gone; stop polling
        *commands = None;
    }
    std::future::pending().await
}
