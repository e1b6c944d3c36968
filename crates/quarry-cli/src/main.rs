//! Quarry command-line tool.
//!
//! Explains how a search compiles, describes the relations reachable from an
//! entity, or runs a search against a JSON dataset.

mod commands;
mod config;

use clap::Parser;
use quarry_core::query::SearchExecutor;

use config::{Args, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarry=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.into_config();
    tracing::debug!(?config, "configuration loaded");

    let output = match args.command {
        Command::Explain {
            schema,
            search,
            aliasing,
        } => {
            let catalog = commands::load_catalog(&schema)?;
            let spec = commands::load_search(&search, aliasing)?;
            commands::explain(&SearchExecutor::new(&catalog).with_config(config), &spec)?
        }
        Command::Describe {
            schema,
            entity,
            depth,
        } => {
            let catalog = commands::load_catalog(&schema)?;
            commands::describe(&catalog, &entity, depth)?
        }
        Command::Run {
            schema,
            search,
            data,
            aliasing,
        } => {
            let catalog = commands::load_catalog(&schema)?;
            let spec = commands::load_search(&search, aliasing)?;
            let executor = SearchExecutor::new(&catalog).with_config(config);
            commands::run(&executor, spec, &data).await?
        }
    };

    println!("{}", output.trim_end());
    Ok(())
}
