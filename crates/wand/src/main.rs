//! wand - magic-link gated reverse proxy

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use wand::{WandServer, config::Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // RUST_LOG wins over --log-level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &args.log_level;
        EnvFilter::new(format!(
            "wand={level},wand_session={level},wand_issue={level},wand_proxy={level},wand_reaper={level},warn"
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(args.log_json.then(|| fmt::layer().json()))
        .with((!args.log_json).then(fmt::layer))
        .init();

    args.validate()?;

    info!(
        listen = %args.listen,
        domain = %args.domain,
        api = ?args.api_addr(),
        "starting wand"
    );

    let server = WandServer::builder()
        .args(&args)
        .build()
        .await
        .context("failed to start server")?;
    server.run().await?;
    Ok(())
}
