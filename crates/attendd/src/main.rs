use anyhow::{Context, Result};
use attend_store::{FsEvidenceSink, SqliteStore};
use attendd::dbus_interface::{AttendService, BUS_NAME, OBJECT_PATH};
use attendd::{Config, VerificationService};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("attendd starting");

    let config = Config::load()?;
    let matcher = config.matcher()?;
    let calendar = config.calendar()?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .await
            .with_context(|| format!("opening ledger {}", config.db_path.display()))?,
    );
    let evidence = Arc::new(FsEvidenceSink::new(&config.evidence_dir));

    tracing::info!(
        db = %config.db_path.display(),
        evidence = %config.evidence_dir.display(),
        threshold = matcher.threshold(),
        dimension = matcher.dimension(),
        utc_offset = %calendar.offset(),
        "ledger opened"
    );

    let service = VerificationService::new(store.clone(), store, evidence, matcher)
        .with_calendar(calendar)
        .with_capture_timeout(config.capture_timeout());
    let iface = AttendService::new(Arc::new(service));

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, iface)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME}"))?;

    tracing::info!(bus = BUS_NAME, session = config.session_bus, "attendd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("attendd shutting down");

    Ok(())
}
