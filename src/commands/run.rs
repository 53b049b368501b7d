use crate::api::{DeviceState, device_router, serve, service_runtime};
use crate::args::RunArgs;
use crate::schedule::autodial::AutoDialScheduler;
use crate::schedule::config::SchedulerConfig;
use crate::schedule::poll::PollScheduler;
use crate::shared::lock::ModemLock;
use crate::shared::shutdown::{install_shutdown_flag, join_worker};
use crate::store::{ReadingStore, SqliteStore};
use crate::sync::{HttpSink, ReadingSink, SyncOptions, spawn_sync_worker};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{info, warn};

// Device service: poll loop, auto-dial loop and optional sync worker on their
// own threads, HTTP control surface on the main thread until Ctrl-C.
pub fn run_service(args: RunArgs) -> Result<()> {
    let running = install_shutdown_flag()?;
    let _lock = ModemLock::acquire(&args.lock_file)?;

    let config = Arc::new(
        SchedulerConfig::new(args.schedule_settings()).context("invalid schedule settings")?,
    );
    // Declared before the store so it outlives every thread that queries it.
    let runtime = service_runtime()?;
    let store: Arc<dyn ReadingStore> = Arc::new(
        SqliteStore::open(&args.data_file, runtime.handle().clone())
            .with_context(|| format!("opening data file failed: {}", args.data_file.display()))?,
    );
    info!(path = %args.data_file.display(), "storing readings");

    let modem = Arc::new(args.link.modem());
    // A missing modem is not fatal; every exchange retries the open.
    if !modem.channel().open() {
        warn!(
            device = modem.channel().device(),
            "modem not available at startup; will retry on next use"
        );
    }

    // Sync worker runs beside the poll loop so network stalls never delay sampling.
    let (sink, sync_worker) = match args.sync_url.as_deref() {
        Some(url) => {
            let http = HttpSink::new(url, Duration::from_millis(args.sync_timeout_ms))?;
            info!(endpoint = http.endpoint(), "syncing readings to aggregator");
            let (handle, worker) =
                spawn_sync_worker(Box::new(http), Arc::clone(&running), SyncOptions::default())
                    .context("starting sync thread failed")?;
            (Some(Arc::new(handle) as Arc<dyn ReadingSink>), Some(worker))
        }
        None => {
            info!("no sync URL configured; readings stay local");
            (None, None)
        }
    };

    let poller = PollScheduler::new(
        Arc::clone(&modem),
        Arc::clone(&config),
        Arc::clone(&store),
        sink,
    )
    .spawn(Arc::clone(&running))
    .context("starting poll thread failed")?;
    let dialer = AutoDialScheduler::new(Arc::clone(&modem), Arc::clone(&config))
        .spawn(Arc::clone(&running))
        .context("starting auto-dial thread failed")?;

    let app = device_router(Arc::new(DeviceState {
        modem: Arc::clone(&modem),
        config,
        store,
    }));
    let served = runtime.block_on(serve(app, args.listen, Arc::clone(&running)));

    // The server also returns on a bind failure; stop the loops either way.
    running.store(false, Ordering::SeqCst);
    join_worker("poll", poller);
    // The poll thread owned the last sync handle, so the worker drains and exits.
    if let Some(worker) = sync_worker {
        join_worker("sync", worker);
    }
    join_worker("auto-dial", dialer);
    if modem.channel().is_open() {
        modem.channel().mark_failed();
        info!(device = modem.channel().device(), "serial port closed");
    }
    info!("service stopped");
    served
}
