mod api;
mod config;
mod download;
mod error;
mod extract;
mod fetch;
mod pipeline;
mod render;
mod resolve;
mod store;

use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{AppConfig, is_valid_product_code};
use crate::pipeline::Orchestrator;
use crate::store::{CatalogDetails, SqliteRepository};

#[derive(Parser)]
#[command(
    name = "diecast_fetch",
    about = "Fetch Mini GT model names and photos into a local collection"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve,
    /// Scrape one product code and store the result
    Scrape { code: String },
    /// Scrape a product code, then record catalog details on it
    Add {
        code: String,
        #[arg(long)]
        release_type: Option<String>,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print the stored record for a product code
    Show { code: String },
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}

/// Image directory and table must exist before anything runs.
async fn prepare_environment(cfg: &AppConfig) -> Result<()> {
    tokio::fs::create_dir_all(&cfg.image_dir)
        .await
        .with_context(|| format!("cannot create {}", cfg.image_dir.display()))?;
    SqliteRepository::new(cfg).init_schema().await?;
    info!(
        db = %cfg.db_path.display(),
        images = %cfg.image_dir.display(),
        "environment ready"
    );
    Ok(())
}

fn checked_code(code: &str) -> Result<&str> {
    if is_valid_product_code(code) {
        Ok(code)
    } else {
        anyhow::bail!("invalid product code {code:?}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = AppConfig::load()?;
    prepare_environment(&cfg).await?;
    let orchestrator = Orchestrator::from_config(&cfg)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg, orchestrator).await,
        Commands::Scrape { code } => {
            let code = checked_code(&code)?;
            match orchestrator.scrape(code).await {
                Ok(path) => {
                    let name = orchestrator
                        .store()
                        .find(code)
                        .await?
                        .and_then(|r| r.display_name)
                        .unwrap_or_default();
                    println!("{code}: {name}");
                    println!("image: {}", path.display());
                    Ok(())
                }
                Err(e) => anyhow::bail!("{code} could not be scraped ({}): {e}", e.stage()),
            }
        }
        Commands::Add {
            code,
            release_type,
            price,
            notes,
        } => {
            let code = checked_code(&code)?;
            if let Err(e) = orchestrator.scrape(code).await {
                println!("Skipping database entry for {code}: {e}");
                return Ok(());
            }
            let details = CatalogDetails {
                release_type,
                purchase_price: price,
                notes,
            };
            orchestrator.store().record_details(code, details).await?;
            show(&orchestrator, code).await
        }
        Commands::Show { code } => show(&orchestrator, checked_code(&code)?).await,
    }
}

async fn show(orchestrator: &Orchestrator, code: &str) -> Result<()> {
    match orchestrator.store().find(code).await? {
        Some(rec) => println!("{}", serde_json::to_string_pretty(&rec)?),
        None => println!("No record for {code}."),
    }
    Ok(())
}

async fn serve(cfg: AppConfig, orchestrator: Orchestrator) -> Result<()> {
    let bind = (cfg.bind_addr.clone(), cfg.port);
    info!(addr = %bind.0, port = bind.1, "starting API server");

    let state = web::Data::new(api::ApiState::new(&cfg, orchestrator));
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(api::cors_headers())
            .configure(api::routes)
    })
    .bind(bind)
    .context("failed to bind API server")?
    .run()
    .await?;
    Ok(())
}
