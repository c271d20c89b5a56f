//! Standalone CLI following the marker feed
//!
//! Run with: cargo run --features cli --bin marker-cli

use std::sync::Arc;
use std::time::Duration;

use marker_live::core::StoreChange;
use marker_live::http_native::HttpMarkerApi;
use marker_live::surface::{LogNavigator, LogSurface};
use marker_live::time::SystemClock;
use marker_live::websocket_native::WsPushTransport;
use marker_live::{Session, ViewerConfig};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,marker_live=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let config = ViewerConfig::from_env();
    info!(
        api = %config.api_url,
        ws = %config.ws_url,
        mode = %config.mode,
        name = ?config.initial_name,
        "Starting marker client"
    );

    let api = Arc::new(HttpMarkerApi::new(&config.api_url, REQUEST_TIMEOUT)?);
    let transport = Arc::new(WsPushTransport::new(&config.ws_url)?);
    let mut session = Session::new(
        &config,
        api,
        transport,
        LogSurface::default(),
        LogNavigator,
        Arc::new(SystemClock),
    );

    session.subscribe(|change| match change {
        StoreChange::Error(Some(message)) => warn!(%message, "Marker error"),
        StoreChange::Error(None) => info!("Marker feed healthy"),
        StoreChange::Filter(filter) => info!(%filter, "Filter changed"),
        _ => {}
    });

    session.attach();
    session
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!(
        markers = session.store().markers().len(),
        rendered = session.reconciler().surface().point_count(),
        connection = session.connection_state().label(),
        "Shutting down"
    );
    session.detach();
    Ok(())
}
