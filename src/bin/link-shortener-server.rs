use std::sync::Arc;

use link_shortener::{
    api::{self, AppState},
    config,
    link_service::link_service_capsule,
};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container().await?;

    let (link_service, base_url) =
        container.read((link_service_capsule, config::base_url_capsule));
    let app = api::router(AppState {
        link_service,
        base_url: Arc::from(base_url),
    });

    let listener = TcpListener::bind(container.read(config::addr_capsule)).await?;
    info!(addr = %listener.local_addr()?, "Started listening on TCP");
    axum::serve(listener, app).await?;
    Ok(())
}
