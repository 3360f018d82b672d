//! needle server entry point.

use std::sync::Arc;

use clap::Parser;
use needle_api::report_runner;
use needle_config::CliArgs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(dir = %args.dir.display(), "Loading configuration");
    let configuration = needle_domain::config_loader::load(&args.dir)?;

    let state = Arc::new(needle_api::AppState::new(configuration));

    tokio::spawn(report_runner::run(state.clone(), args.dir.clone()));

    let app = needle_api::build_router(state);

    let bind_addr = if args.bind.contains(':') {
        format!("[{}]:{}", args.bind, args.port)
    } else {
        format!("{}:{}", args.bind, args.port)
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
