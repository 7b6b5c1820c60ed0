use clap::Parser;
use parley_net::{ServerConfig, TransportMode};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Length-prefixed JSON-RPC chat server.
#[derive(Debug, Parser)]
#[command(name = "parley-server", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 12345)]
    port: u16,
    /// Enable TLS.
    #[arg(long)]
    secure: bool,
    /// TLS certificate chain file.
    #[arg(long, default_value = "server.crt")]
    cert: PathBuf,
    /// TLS private key file.
    #[arg(long, default_value = "server.key")]
    key: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = ServerConfig {
        port: args.port,
        mode: if args.secure {
            TransportMode::Secure
        } else {
            TransportMode::Plain
        },
        cert_file: args.cert,
        key_file: args.key,
    };

    let app = parley_server::build();
    let port = match app.controller.start(&cfg).await {
        Ok(port) => port,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };
    info!(port, secure = args.secure, "parley server running; ctrl-c to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal handler failed");
        app.controller.stop_all().await;
        return ExitCode::FAILURE;
    }

    info!("shutting down");
    app.controller.stop_all().await;
    ExitCode::SUCCESS
}
