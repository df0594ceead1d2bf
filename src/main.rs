// ABOUTME: Liveradio listener binary
// ABOUTME: Plays the live broadcast on the default audio device, in step with the server

use clap::Parser;
use liveradio::client::{
    run_listener, CpalOutput, HttpFetcher, ListenerArgs, ListenerCommand, SyncEngine,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

#[derive(Parser, Debug)]
#[command(name = "liveradio")]
#[command(author, version, about = "Listen to a liveradio broadcast", long_about = None)]
struct Args {
    #[command(flatten)]
    listener: ListenerArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    args.listener.init_tracing();

    let config = args.listener.build_config();
    tracing::info!("Liveradio v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Server: {}", config.server_url);
    tracing::info!("Media: {}", config.media_base());

    // The stream must stay on this task; it stops when dropped
    let (output, graph) = CpalOutput::open()?;
    tracing::info!("Output: {} at {} Hz", output.device_name(), output.sample_rate());

    let fetcher = Arc::new(HttpFetcher::new(config.media_base()));
    let mut engine = SyncEngine::new(graph, fetcher, &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let command = match line.trim() {
                "m" | "mute" => ListenerCommand::ToggleMute,
                "s" | "sync" => ListenerCommand::Resync,
                "" | "i" | "info" => ListenerCommand::Status,
                other => {
                    tracing::warn!("Unknown command '{}' (m = mute, s = sync, i = info)", other);
                    continue;
                }
            };
            if command_tx.send(command).is_err() {
                break;
            }
        }
    });

    tracing::info!("Commands: m = mute/unmute, s = resync, i = now playing. Ctrl+C to stop");

    run_listener(&config, &mut engine, Some(command_rx), shutdown_rx).await?;

    drop(output);
    Ok(())
}
