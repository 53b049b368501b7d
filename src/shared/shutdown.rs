use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{error, info};

// Shared run flag cleared by Ctrl-C. Every loop and the HTTP server watch it.
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        if flag.swap(false, Ordering::SeqCst) {
            info!("stop requested; finishing current work");
        }
    })
    .context("installing Ctrl-C handler failed")?;
    Ok(running)
}

// Waits for a worker thread and reports a panic instead of propagating it.
pub fn join_worker(name: &str, handle: JoinHandle<()>) {
    match handle.join() {
        Ok(()) => info!(worker = name, "worker joined"),
        Err(_) => error!(worker = name, "worker panicked"),
    }
}
