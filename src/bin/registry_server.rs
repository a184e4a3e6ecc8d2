//! Package registry server entrypoint.
//!
//! # Usage
//!
//! ```bash
//! registry_server --host 0.0.0.0 --port 8080 --database-url sqlite:registry.db
//! ```
//!
//! Every flag has an environment-variable equivalent (see `registry::config`);
//! an explicit flag wins, an env var is the next fallback, and
//! [`ServerConfig::from_env`] supplies the defaults.

use clap::Parser;
use registry::config::ServerConfig;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "registry_server", version, about = "Self-hosted package registry server")]
struct Cli {
    /// Address to bind to (overrides REGISTRY_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides REGISTRY_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Metadata store connection string (overrides DATABASE_URL).
    #[arg(long = "database-url")]
    database_url: Option<String>,

    /// Filesystem root for hosted/cached archives (overrides STORAGE_PATH).
    #[arg(long = "storage-path")]
    storage_path: Option<String>,
}

impl Cli {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database_url) = self.database_url {
            config.database_url = database_url;
        }
        if let Some(storage_path) = self.storage_path {
            config.storage_path = storage_path;
        }
        config
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("registry=info,tower_http=info"));

    fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.apply(ServerConfig::from_env());

    tracing::info!(
        host = %config.host,
        port = config.port,
        database_url = %config.database_url,
        "starting registry server"
    );

    match registry::api::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "registry server failed to start or exited with an error");
            ExitCode::FAILURE
        }
    }
}
