use crate::api::{aggregator_router, serve, service_runtime};
use crate::args::AggregateArgs;
use crate::shared::shutdown::install_shutdown_flag;
use crate::store::SqliteStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

// Central collector: stores what devices publish and serves it back as history.
pub fn run_aggregate(args: AggregateArgs) -> Result<()> {
    let running = install_shutdown_flag()?;
    let runtime = service_runtime()?;
    let store = SqliteStore::open(&args.data_file, runtime.handle().clone())
        .with_context(|| format!("opening data file failed: {}", args.data_file.display()))?;
    info!(path = %store.path().display(), "aggregating readings");

    runtime.block_on(serve(aggregator_router(Arc::new(store)), args.listen, running))
}
