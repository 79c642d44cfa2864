//! simple-db - Main entry point.
//!
//! Runs SQL statements through a pooled client and prints each outcome as a
//! JSON line on stdout. Logs go to stderr.

use clap::Parser;
use simple_db::config::Config;
use simple_db::{Client, DbError};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run_statements(client: &Client, config: &Config) -> Result<(), DbError> {
    let mut ctx = client.context();

    if config.transaction {
        client.start_transaction(&mut ctx).await?;
    }

    for sql in &config.statements {
        // A failure inside the transaction has already rolled it back
        let outcome = client.run(&mut ctx, sql, &[]).await?;
        let line = serde_json::json!({ "sql": sql, "outcome": outcome });
        println!("{line}");
    }

    if config.transaction {
        client.commit(&mut ctx).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    let client_config = config.client_config()?;
    info!(
        url = %client_config.redacted_url(),
        capacity = client_config.pool_capacity,
        "Starting simple-db v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = Client::connect(client_config).await?;
    let result = run_statements(&client, &config).await;
    client.close().await;

    if let Err(e) = result {
        error!(error = %e, suggestion = ?e.suggestion(), "Statement failed");
        return Err(e.into());
    }

    info!(statements = config.statements.len(), "Done");
    Ok(())
}
