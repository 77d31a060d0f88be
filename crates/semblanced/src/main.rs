use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod routes;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        listen = %config.listen_addr,
        faces_dir = %config.faces_dir.display(),
        model_dir = %config.model_dir.display(),
        "semblanced starting"
    );

    let store = store::DirStore::open(&config.faces_dir)?;

    // Fail fast if either model is missing.
    let engine = engine::spawn_engine(
        &config.mesh_model_path(),
        &config.detector_model_path(),
        store,
        config.duplicate_threshold,
        config.recognition_threshold,
    )?;

    let app = routes::router(routes::AppState { engine });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "semblanced ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("semblanced shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
