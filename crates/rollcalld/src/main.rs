use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod analysis;
mod capture;
mod channel;
mod config;
mod dbus_interface;
mod debounce;
mod display;
mod engine;
mod jobs;
mod slot;
mod state;
mod store;

/// Worker threads are plain OS threads and the dispatcher uses blocking
/// HTTP, so the tokio runtime is built by hand and only hosts D-Bus and
/// signal handling.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = config::Config::load()?;
    tracing::info!(
        camera = %config.camera.device,
        mode = ?config.matcher.mode,
        store = %config.store.base_url,
        "configuration loaded"
    );

    let store = store::open(&config.store)?;
    let engine = engine::spawn_engine(&config, store.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;

    let service = dbus_interface::KioskService::new(
        engine.links().clone(),
        engine.analyzer_ready(),
        config.matcher.mode,
        store,
    );
    let bus = config.dbus.bus;
    let waited = runtime.block_on(async move {
        // Held for the daemon's lifetime; dropping it releases the bus name.
        let _connection = match dbus_interface::serve(service, bus).await {
            Ok(conn) => {
                tracing::info!(name = dbus_interface::BUS_NAME, ?bus, "D-Bus interface registered");
                Some(conn)
            }
            Err(e) => {
                tracing::warn!(error = %e, "D-Bus unavailable; running without control surface");
                None
            }
        };

        tracing::info!("rollcalld ready");
        wait_for_shutdown().await
    });

    tracing::info!("rollcalld shutting down");
    engine.shutdown();
    waited?;
    Ok(())
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}
