use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use caption_service::{AppConfig, GeminiClient, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        ?config.listen_addr,
        model = %config.gemini_model,
        max_upload_bytes = config.max_upload_bytes,
        "starting caption service"
    );

    let client = Arc::new(GeminiClient::new(config.as_ref())?);
    if client.validate_api_key().await {
        tracing::info!("Gemini API key accepted");
    } else {
        tracing::warn!("Gemini API key validation failed, generation requests will likely fail");
    }

    let router = build_router(config.clone(), client);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
