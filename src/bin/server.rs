// ABOUTME: Liveradio server binary
// ABOUTME: Broadcasts a music directory as a shared, synchronized timeline

use clap::Parser;
use liveradio::server::{RadioServer, ServerArgs};

#[derive(Parser, Debug)]
#[command(name = "liveradio-server")]
#[command(author, version, about = "Synchronized live radio server", long_about = None)]
struct Args {
    #[command(flatten)]
    server: ServerArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize tracing
    args.server.init_tracing();

    // Log startup info
    args.server.log_startup_info();

    // Create server configuration
    let config = args.server.build_config();

    // Create and run server
    let server = RadioServer::with_config(config);
    let client_manager = server.client_manager();
    let listeners = server.listeners();

    // Spawn a task to periodically report connected listeners
    let report_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            let count = listeners.count();
            if count > 0 {
                tracing::info!("Listeners: {}", count);
                client_manager.for_each(|client| {
                    tracing::debug!(
                        "  - {} from {}",
                        client.client_id,
                        client
                            .remote_addr
                            .map(|addr| addr.to_string())
                            .unwrap_or_else(|| "unknown".to_string())
                    );
                });
            }
            let underflows = listeners.underflow_count();
            if underflows > 0 {
                tracing::warn!("Listener count underflows so far: {}", underflows);
            }
        }
    });

    tracing::info!("Press Ctrl+C to stop");

    let result = server.run().await;
    report_task.abort();
    result
}
