use anyhow::Context;
use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{error, info};

// Added for tracing file logging
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use filemesh::config::NodeConfig;
use filemesh::server::FileServer;

/// Demonstration plaintext uploaded by a node started with a peer.
const DEMO_CONTENT: &str = "This is some structured file content.";
const DEMO_FILENAME: &str = "hello_from_client.txt";

#[derive(Parser)]
#[command(author, version, about = "Encrypted peer-to-peer file replication mesh", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Peer address to connect to (omit to run a standalone node)
    #[arg(long)]
    peer: Option<String>,

    /// Request the uploaded file back after replication
    #[arg(long)]
    download: bool,

    /// Directory for stored records
    #[arg(long, default_value = ".filemesh")]
    data_dir: String,

    /// Optional JSON config file; command-line flags take precedence
    #[arg(long)]
    config: Option<String>,
}

// Function to initialize tracing and file logging
// Returns a WorkerGuard that must be kept alive for logs to be written
fn init_logging(log_file_prefix: &str) -> Result<WorkerGuard, Box<dyn Error>> {
    // Create a directory for logs if it doesn't exist
    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", log_file_prefix);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false); // Don't use ANSI codes in files

    let console_layer = fmt::layer().with_writer(std::io::stdout);

    // Use RUST_LOG env var, default to info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // This guard needs to stay in scope, otherwise logs stop writing.
    let _guard = init_logging("filemesh_node").map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let cli = Cli::parse();

    let mut config = NodeConfig::load_or_default(cli.config.as_deref());
    config.port = cli.port;
    config.data_dir = cli.data_dir;
    if cli.peer.is_some() {
        config.peer = cli.peer;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("invalid configuration")?;

    let server = FileServer::new(&config)
        .await
        .context("failed to initialize node")?;

    // Bind failure is the one fatal error: propagate and abort.
    let addr = server.start().await.context("failed to start listener")?;
    info!("node is up on {}", addr);

    if let Some(peer) = config.peer.clone() {
        // Give a freshly launched peer a moment to bind.
        tokio::time::sleep(Duration::from_secs(1)).await;

        server
            .connect_to(&peer)
            .await
            .with_context(|| format!("failed to connect to peer {peer}"))?;

        match server
            .upload(DEMO_FILENAME, "text/plain", DEMO_CONTENT.as_bytes())
            .await
        {
            Ok(record) => {
                info!("uploaded {} as record {}", DEMO_FILENAME, record);

                if cli.download {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    match server.download(&peer, &record).await {
                        Ok(plaintext) => info!(
                            "downloaded copy of {} decrypts to: {}",
                            record,
                            String::from_utf8_lossy(&plaintext)
                        ),
                        Err(e) => error!("download of {} failed: {}", record, e),
                    }
                }
            }
            Err(e) => error!("upload failed: {}", e),
        }
    }

    // Run until terminated externally.
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
