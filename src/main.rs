use clap::Parser;
use tracing_subscriber::EnvFilter;

use landgraph::cli::{dispatch, Cli};
use landgraph::core::{load_config, Context};
use landgraph::db;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("landgraph=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config();

    let pool = match db::open_pool(&config.data_location, config.parallel_connections as u32).await
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Cannot open database: {}", e);
            std::process::exit(0);
        }
    };
    let ctx = Context::new(config, pool);

    match dispatch(&ctx, cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Command failed: {:#}", e);
            std::process::exit(0);
        }
    }
}
