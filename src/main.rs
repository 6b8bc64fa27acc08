#![forbid(unsafe_code)]

use bio_gateway::{config::Args, server};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();

    // parse cli arguments (and environment)
    let args = Args::parse();
    if let Err(err) = server::run(args).await {
        error!(%err, "gateway exited with error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
