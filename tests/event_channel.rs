use futures_util::{SinkExt, StreamExt};
use liveradio::client::{
    run_listener, AudioGraph, ClientConfig, MemoryFetcher, SyncEngine,
};
use liveradio::protocol::Track;
use liveradio::server::{Playlist, RadioServer, ServerConfig};
use liveradio::Message;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start(playlist: Playlist) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let config = ServerConfig::new(std::env::temp_dir()).ws_path("/radio");
        let server = RadioServer::with_config(config).with_playlist(playlist);
        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            server.serve(listener, shutdown).await.unwrap();
        });

        Self {
            addr,
            _shutdown: shutdown_tx,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/radio", self.addr)
    }

    async fn connect(&self) -> Socket {
        let (ws, _) = connect_async(self.url()).await.unwrap();
        ws
    }
}

fn two_tracks() -> Playlist {
    Playlist::new(vec![
        Track::new(1, "First", "/music/a.wav", Some(60.0)).with_artist("Someone"),
        Track::new(2, "Second", "/music/b.wav", Some(60.0)),
    ])
}

async fn send(ws: &mut Socket, message: &Message) {
    ws.send(WsMessage::Text(message.to_json().unwrap()))
        .await
        .unwrap();
}

/// Next event, or None if nothing arrives within `wait`
async fn recv_within(ws: &mut Socket, wait: Duration) -> Option<Message> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next()).await.ok()??;
        if let Ok(WsMessage::Text(text)) = frame {
            return Some(Message::from_json(&text).unwrap());
        }
    }
}

/// Skip events until one named `name` arrives
async fn recv_named(ws: &mut Socket, name: &str) -> Message {
    loop {
        let message = recv_within(ws, Duration::from_secs(5))
            .await
            .unwrap_or_else(|| panic!("timed out waiting for {}", name));
        if message.name() == name {
            return message;
        }
    }
}

/// Collect every event arriving within `wait`
async fn drain(ws: &mut Socket, wait: Duration) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some(message) = recv_within(ws, wait).await {
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn test_late_joiner_receives_radio_state() {
    let server = TestServer::start(two_tracks()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut ws = server.connect().await;
    let Message::RadioState(state) = recv_named(&mut ws, "radio-state").await else {
        unreachable!()
    };

    assert_eq!(state.track.id, 1);
    assert_eq!(state.track.artist.as_deref(), Some("Someone"));
    assert_eq!(state.listener_count, 1);
    assert!(state.current_position >= 0.2, "position {}", state.current_position);
    assert!(state.current_position <= 60.0);
    assert!(state.server_time >= state.track_start_timestamp);
}

#[tokio::test]
async fn test_first_frame_is_radio_state() {
    let server = TestServer::start(two_tracks()).await;
    let mut ws = server.connect().await;

    let first = recv_within(&mut ws, Duration::from_secs(5)).await.unwrap();
    let Message::RadioState(state) = first else {
        panic!("expected radio-state first, got {}", first.name())
    };
    assert_eq!(state.listener_count, 1);

    let Message::ListenersUpdate(update) = recv_named(&mut ws, "listeners-update").await else {
        unreachable!()
    };
    assert_eq!(update.count, 1);
}

#[tokio::test]
async fn test_sync_time_goes_only_to_requester() {
    let server = TestServer::start(two_tracks()).await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    drain(&mut a, Duration::from_millis(200)).await;
    drain(&mut b, Duration::from_millis(200)).await;

    send(&mut a, &Message::SyncPosition).await;

    let Message::SyncTime(sync) = recv_named(&mut a, "sync-time").await else {
        unreachable!()
    };
    assert!(sync.current_position >= 0.0);
    assert!(sync.server_time > 0);

    let others = drain(&mut b, Duration::from_millis(300)).await;
    assert!(others.iter().all(|m| m.name() != "sync-time"));
}

#[tokio::test]
async fn test_get_current_state_replies_with_radio_state() {
    let server = TestServer::start(two_tracks()).await;
    let mut ws = server.connect().await;
    recv_named(&mut ws, "radio-state").await;

    send(&mut ws, &Message::GetCurrentState).await;
    let Message::RadioState(state) = recv_named(&mut ws, "radio-state").await else {
        unreachable!()
    };
    assert_eq!(state.track.title, "First");
}

#[tokio::test]
async fn test_listener_count_follows_connections() {
    let server = TestServer::start(two_tracks()).await;
    let mut a = server.connect().await;
    drain(&mut a, Duration::from_millis(200)).await;

    let mut b = server.connect().await;
    let Message::ListenersUpdate(update) = recv_named(&mut a, "listeners-update").await else {
        unreachable!()
    };
    assert_eq!(update.count, 2);

    b.close(None).await.unwrap();
    let Message::ListenersUpdate(update) = recv_named(&mut a, "listeners-update").await else {
        unreachable!()
    };
    assert_eq!(update.count, 1);
}

#[tokio::test]
async fn test_empty_playlist_stays_silent() {
    let server = TestServer::start(Playlist::default()).await;
    let mut ws = server.connect().await;
    send(&mut ws, &Message::SyncPosition).await;
    send(&mut ws, &Message::GetCurrentState).await;

    let received = drain(&mut ws, Duration::from_millis(500)).await;
    assert!(
        received.iter().all(|m| m.name() == "listeners-update"),
        "unexpected events: {:?}",
        received.iter().map(|m| m.name()).collect::<Vec<_>>()
    );
}

fn wav_bytes(seconds: f64) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..(8000.0 * seconds) as u32 {
            writer.write_sample(1000i16).unwrap();
            writer.write_sample(-1000i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[tokio::test]
async fn test_listener_follows_broadcast() {
    let server = TestServer::start(two_tracks()).await;

    let config = ClientConfig::new(server.url()).reconnect_delay(Duration::from_millis(100));
    let fetcher = MemoryFetcher::new()
        .with_track("/music/a.wav", wav_bytes(5.0))
        .with_track("/music/b.wav", wav_bytes(5.0));
    let mut engine = SyncEngine::new(AudioGraph::new(8000), Arc::new(fetcher), &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = shutdown_tx.send(true);
    });

    run_listener(&config, &mut engine, None, shutdown_rx)
        .await
        .unwrap();

    assert_eq!(engine.loaded_ref(), Some("/music/a.wav"));
    assert_eq!(engine.announced_track().map(|t| t.id), Some(1));
    assert_eq!(engine.state().active_graphs, 1);
}
