// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Greenbar: virtual IBM 1403 line printer
//
// Entry point.  Initialises logging, loads and validates the configuration,
// then either bootstraps an administrator account or runs the daemon until
// interrupted.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use greenbar_core::config::ServerConfig;
use greenbar_core::error::Result;
use greenbar_store::SqliteAccountStore;

use services::app_services::{AppServices, create_admin};

/// Virtual IBM 1403 line printer: accepts LPD jobs and mails them back as
/// green-bar PDFs.
#[derive(Parser, Debug)]
#[command(name = "greenbar")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "greenbar.json")]
    config: PathBuf,

    /// Create (or promote) an administrator account for EMAIL and exit
    #[arg(long, value_name = "EMAIL")]
    create_admin: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "greenbar failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!(config = %args.config.display(), "Greenbar starting");
    let config = ServerConfig::load(&args.config)?;

    if let Some(email) = args.create_admin {
        let store = SqliteAccountStore::open(&config.database_file)?;
        let (account, created) = create_admin(&store, &email)?;
        info!(
            email = %account.email,
            access_key = %account.access_key,
            created,
            "administrator ready; print to this access key as the queue name"
        );
        return Ok(());
    }

    let mut services = AppServices::init(config)?;
    services.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    services.stop().await
}
