use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thoughtline_core::ThoughtlineConfig;
use tracing::info;

mod app;
mod chat;
mod cli;
mod http;
mod policy;

use cli::{Cli, Commands};

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thoughtline_gateway=info,tower_http=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // config: --config > THOUGHTLINE_CONFIG (via clap env) > ~/.thoughtline/thoughtline.toml
    let config = ThoughtlineConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        ThoughtlineConfig::default()
    });

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Chat {
            prompt,
            conversation,
            provider,
            base_url,
            model,
        } => {
            let overrides = chat::ChatOverrides {
                provider,
                base_url,
                model,
            };
            chat::run_chat(&config, prompt, conversation, overrides).await
        }
        Commands::Conversations { limit } => chat::list_conversations(&config, limit),
        Commands::Export { id, output } => chat::export_conversation(&config, &id, output.as_deref()),
        Commands::Import { file } => chat::import_conversation(&config, &file),
    }
}

async fn serve(config: ThoughtlineConfig) -> anyhow::Result<()> {
    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // No overall timeout: streams stay open as long as the upstream writes.
    let client = reqwest::Client::builder()
        .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
        .build()?;

    if config.proxy.allow_local {
        tracing::warn!("proxy.allow_local is on; local and private upstreams are reachable");
    }
    let state = Arc::new(app::AppState::new(config, client));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!(%addr, "Thoughtline gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
