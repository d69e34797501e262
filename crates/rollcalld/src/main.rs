use anyhow::{Context, Result};
use rollcall_core::types::TIMESTAMP_FORMAT;
use rollcall_core::StopSignal;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod sink;

const BUS_NAME: &str = "org.rollcall.Rollcall1";
const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();
    tracing::info!(
        frame_source = %config.frame_source,
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        tolerance = config.tolerance,
        mirror = config.mirror,
        "configuration loaded"
    );

    let stop = StopSignal::new();
    let (engine, shared, mut done) =
        engine::spawn_engine(&config, stop.clone()).context("failed to start engine")?;

    let service = dbus_interface::RollcallService::new(engine, shared, &config);
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    let summary = tokio::select! {
        summary = &mut done => summary,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupted; stopping live loop");
            stop.stop();
            done.await
        }
    };

    match summary {
        Ok(summary) => {
            tracing::info!(
                frames = summary.frames,
                faces = summary.faces,
                reason = ?summary.reason,
                "live loop ended"
            );
            for entry in &summary.attendance {
                println!("{} {}", entry.label, entry.first_seen.format(TIMESTAMP_FORMAT));
            }
        }
        Err(_) => tracing::error!("engine thread ended without a summary"),
    }

    tracing::info!("rollcalld shutting down");
    Ok(())
}
