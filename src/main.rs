use clap::Parser;
use tracing::Level;

use curator_vectors::config::Config;

#[derive(Parser)]
#[command(version, about = "Embedding store coordination service")]
struct Cli {
    /// Bind address override; otherwise CURATOR_BIND or 0.0.0.0:8081.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    tracing::info!("curator-vectors {} starting", curator_vectors::VERSION);
    curator_vectors::api::run(config).await
}
