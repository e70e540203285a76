use nskv::config::Config;
use nskv::server::{self, ServerContext};
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    // Reloadable so CONFIG SET loglevel takes effect on a running server.
    let (filter, log_handle) = reload::Layer::new(config.log_filter());
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();

    if let Some(path) = &config.config_file {
        info!("Loaded config from {}", path.display());
    }
    info!("{} namespace(s) configured", config.namespaces.len());

    let ctx = match ServerContext::new(config) {
        Ok(ctx) => ctx.with_log_filter(log_handle),
        Err(e) => {
            error!("Invalid namespace configuration: {e}");
            std::process::exit(1);
        }
    };

    server::run_server(ctx).await
}
