//! Team Consultation Gateway server
//!
//! Entry point: loads configuration, initializes logging and serves the
//! consultation API until Ctrl-C.

use std::sync::Arc;

use dotenvy::dotenv;
use mimalloc::MiMalloc;

use consult_gateway::{config::AppConfig, server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    // Load .env (if present) before anything reads the environment
    let _ = dotenv();

    telemetry::init();

    let config = match AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server::start_server(config).await {
        tracing::error!(error = %format!("{e:#}"), "Server terminated with an error");
        std::process::exit(1);
    }
}
