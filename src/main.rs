use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod db;
mod extract;
mod llm;
mod pipeline;
mod prompt;
mod recall;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Initialize logging
    init_tracing(config.log_format);

    info!(
        "Using {} database '{}' on {}",
        config.database.backend, config.database.database, config.database.host
    );

    let app_state = match AppState::initialize(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            return Err(e);
        }
    };

    // One-shot mode: print the report and exit
    if let Some(question) = args.ask.as_deref() {
        let report = app_state.assistant.ask(question).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if !report.succeeded() {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Start the web server
    info!(
        "Starting Sakila query assistant on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
