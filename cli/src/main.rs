use clap::Parser;
use file_registry_cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let output = Cli::parse().run().await?;
    println!("{}", serde_json::to_string_pretty(&output.body)?);
    if output.is_error {
        std::process::exit(1);
    }
    Ok(())
}
