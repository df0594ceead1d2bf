// ABOUTME: Main broadcast server implementation
// ABOUTME: Provides the WebSocket endpoint, music route, and coordinates all server components

use crate::server::client_handler::handle_client;
use crate::server::client_manager::ClientManager;
use crate::server::clock::ServerClock;
use crate::server::config::ServerConfig;
use crate::server::listeners::ListenerCounter;
use crate::server::playlist::{load_playlist, Playlist};
use crate::server::scheduler::{spawn_scheduler, BroadcastScheduler, ScheduleView};
use axum::{
    extract::ws::WebSocketUpgrade,
    extract::{ConnectInfo, State},
    response::IntoResponse,
    routing::any,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Client manager
    pub client_manager: Arc<ClientManager>,
    /// Listener counter
    pub listeners: Arc<ListenerCounter>,
    /// Read-only scheduler view
    pub schedule: ScheduleView,
}

/// Broadcast server
pub struct RadioServer {
    /// Server configuration
    config: Arc<ServerConfig>,
    /// Client manager
    client_manager: Arc<ClientManager>,
    /// Listener counter
    listeners: Arc<ListenerCounter>,
    /// Server clock
    clock: Arc<ServerClock>,
    /// Preloaded playlist; scanned from `music_dir` when absent
    playlist: Option<Playlist>,
}

impl RadioServer {
    /// Create a new server with default configuration
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new server with custom configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let client_manager = Arc::new(ClientManager::new());
        Self {
            config: Arc::new(config),
            listeners: Arc::new(ListenerCounter::new(Arc::clone(&client_manager))),
            client_manager,
            clock: Arc::new(ServerClock::new()),
            playlist: None,
        }
    }

    /// Broadcast this playlist instead of scanning the music directory
    pub fn with_playlist(mut self, playlist: Playlist) -> Self {
        self.playlist = Some(playlist);
        self
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the client manager
    pub fn client_manager(&self) -> Arc<ClientManager> {
        Arc::clone(&self.client_manager)
    }

    /// Get the listener counter
    pub fn listeners(&self) -> Arc<ListenerCounter> {
        Arc::clone(&self.listeners)
    }

    /// Bind the configured address and run until Ctrl-C
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;

        let shutdown_signal = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => log::info!("Received shutdown signal"),
                Err(e) => {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = self.config.clone();

        let playlist = match self.playlist {
            Some(playlist) => playlist,
            None => {
                let dir = config.music_dir.clone();
                let options = config.loader();
                tokio::task::spawn_blocking(move || load_playlist(&dir, &options)).await?
            }
        };

        // Start the scheduler
        let mut scheduler = BroadcastScheduler::new(
            config.scheduler(),
            self.clock.clone(),
            self.listeners.clone(),
            self.client_manager.clone(),
        );
        scheduler.start(playlist);
        let schedule = scheduler.view();
        let (scheduler_handle, scheduler_shutdown) = spawn_scheduler(scheduler);

        // Build application state
        let state = AppState {
            client_manager: self.client_manager.clone(),
            listeners: self.listeners.clone(),
            schedule,
        };

        // Build router
        let app = Router::new()
            .route(&config.ws_path, any(ws_handler))
            .nest_service(&config.music_route, ServeDir::new(&config.music_dir))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        log::info!(
            "Radio server listening on {} (endpoint: {}, music: {})",
            listener.local_addr()?,
            config.ws_path,
            config.music_route
        );

        // Run server with graceful shutdown
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        // Shutdown scheduler
        let _ = scheduler_shutdown.send(true);
        let _ = scheduler_handle.await;

        log::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for RadioServer {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_client(
            socket,
            Some(remote_addr),
            state.client_manager,
            state.listeners,
            state.schedule,
        )
    })
}
