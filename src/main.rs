use clap::Parser;
use wasm_stream_broker::cli::{Cli, Commands};

#[tokio::main]
pub async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start(args) => wasm_stream_broker::run_start(args).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "broker exited with an error");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
