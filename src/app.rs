use std::io;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::infrastructure::bootstrap::build_state;
use crate::infrastructure::config::AppConfig;
use crate::interfaces::http::start_server;

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn serve(config: AppConfig) -> io::Result<()> {
    let (host, port) = config.bind_address();
    let state = build_state(config);

    let server = start_server(state.clone()).map_err(|err| {
        error!(error = %err, "Failed to bind {}:{}", host, port);
        err
    })?;
    info!("Listening on http://{}:{}", host, port);

    let result = server.await;

    info!("Shutting down, closing database connections");
    state.connections.close_all().await;
    result
}

pub fn run() -> io::Result<()> {
    let config = AppConfig::load().map_err(|err| {
        eprintln!("{}", err);
        io::Error::new(io::ErrorKind::InvalidInput, err.to_string())
    })?;
    init_tracing(&config.logging.filter);

    actix_web::rt::System::new().block_on(serve(config))
}
