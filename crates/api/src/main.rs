use std::sync::Arc;

use anyhow::Context;

use warden_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_observability::init();

    let config = AppConfig::from_env()?;
    let services = warden_api::app::build_services(&config).await?;
    let app = warden_api::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
