use anyhow::{Context, Result};
use plancheck_api::{build_app, AppConfig};
use plancheck_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("plancheck_api");

    let config = AppConfig::from_env()?;
    let bind = config.bind.clone();
    let upstream = config.upstream_base_url.clone();
    let credential_configured = config.credential.is_some();

    let app = build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(
        bind = %bind,
        upstream = %upstream,
        credential_configured,
        "plan checker relay started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
