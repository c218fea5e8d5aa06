use clap::Parser;
use fire_projection::api::{Cli, execute};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = execute(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
