use crate::modem::csq::rssi_to_dbm;
use crate::reading::SignalReading;
use crate::store::{ReadingStore, StoreError};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// Somewhere a fresh reading can be pushed. Callers log failures and carry on.
pub trait ReadingSink: Send + Sync {
    fn publish(&self, reading: &SignalReading) -> Result<()>;
}

// Posts readings as JSON to an aggregator's `/ingest` route.
pub struct HttpSink {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("building sync HTTP client failed")?;
        Ok(Self {
            client,
            endpoint: format!("{}/ingest", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReadingSink for HttpSink {
    fn publish(&self, reading: &SignalReading) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(reading)
            .send()
            .with_context(|| format!("posting reading to {} failed", self.endpoint))?
            .error_for_status()
            .with_context(|| format!("aggregator {} rejected reading", self.endpoint))?;
        Ok(())
    }
}

/// Queue and shutdown limits for the sync worker.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    // Readings waiting for the network; further readings are dropped from sync, not from storage.
    pub capacity: usize,
    // Time allowed after a stop request for flushing what is still queued.
    pub drain_budget: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            capacity: 256,
            drain_budget: Duration::from_secs(5),
        }
    }
}

// Queue side of the sync worker. Publishing only enqueues, so the poll loop never waits on the network.
#[derive(Clone)]
pub struct SyncHandle {
    tx: SyncSender<SignalReading>,
}

impl ReadingSink for SyncHandle {
    fn publish(&self, reading: &SignalReading) -> Result<()> {
        match self.tx.try_send(*reading) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => bail!("sync queue full; reading not synced"),
            Err(TrySendError::Disconnected(_)) => bail!("sync worker has stopped"),
        }
    }
}

pub fn spawn_sync_worker(
    sink: Box<dyn ReadingSink>,
    running: Arc<AtomicBool>,
    options: SyncOptions,
) -> io::Result<(SyncHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::sync_channel::<SignalReading>(options.capacity);
    let handle = thread::Builder::new()
        .name("sync".into())
        .spawn(move || sync_worker_loop(sink.as_ref(), &running, &rx, options.drain_budget))?;
    Ok((SyncHandle { tx }, handle))
}

fn sync_worker_loop(
    sink: &dyn ReadingSink,
    running: &AtomicBool,
    rx: &Receiver<SignalReading>,
    drain_budget: Duration,
) {
    info!("sync worker started");
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(reading) => {
                publish_one(sink, &reading);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    drain(sink, rx, drain_budget);
    info!("sync worker stopped");
}

// Flush the queue after a stop request, giving up at the first failure or once the budget is spent.
fn drain(sink: &dyn ReadingSink, rx: &Receiver<SignalReading>, budget: Duration) {
    let deadline = Instant::now() + budget;
    let mut flushing = true;
    let mut unsent = 0_usize;
    while let Ok(reading) = rx.try_recv() {
        if flushing && Instant::now() < deadline && publish_one(sink, &reading) {
            continue;
        }
        flushing = false;
        unsent += 1;
    }
    if unsent > 0 {
        warn!(unsent, "stopped with readings not synced; they remain in local storage");
    }
}

fn publish_one(sink: &dyn ReadingSink, reading: &SignalReading) -> bool {
    match sink.publish(reading) {
        Ok(()) => {
            debug!(timestamp = reading.timestamp, "reading synced");
            true
        }
        Err(err) => {
            warn!(
                timestamp = reading.timestamp,
                error = %format!("{err:#}"),
                "sync failed; reading kept locally only"
            );
            false
        }
    }
}

// Body accepted by the aggregator. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestPayload {
    pub timestamp: Option<i64>,
    pub rssi: Option<u32>,
    pub dbm: Option<f64>,
    pub ber: Option<u32>,
}

impl IngestPayload {
    // Needs both a timestamp and an RSSI index. Power is recomputed from the
    // index so every stored row follows the same table.
    pub fn into_reading(self) -> Option<SignalReading> {
        let timestamp = self.timestamp?;
        let rssi = self.rssi?;
        Some(SignalReading {
            timestamp,
            rssi: Some(rssi),
            dbm: rssi_to_dbm(rssi),
            ber: self.ber,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    Stored(SignalReading),
    Dropped,
}

pub fn ingest(store: &dyn ReadingStore, payload: IngestPayload) -> Result<IngestOutcome, StoreError> {
    let reported_dbm = payload.dbm;
    let Some(reading) = payload.into_reading() else {
        debug!("dropping incomplete ingest payload");
        return Ok(IngestOutcome::Dropped);
    };
    if reported_dbm.is_some() && reported_dbm != reading.dbm {
        debug!(
            timestamp = reading.timestamp,
            reported_dbm = ?reported_dbm,
            stored_dbm = ?reading.dbm,
            "sender's dBm differs from the RSSI table; storing the table value"
        );
    }
    store.append(&reading)?;
    Ok(IngestOutcome::Stored(reading))
}
