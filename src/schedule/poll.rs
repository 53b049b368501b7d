use crate::modem::Modem;
use crate::reading::SignalReading;
use crate::schedule::config::SchedulerConfig;
use crate::schedule::{Cadence, Pacer, WallClock};
use crate::store::ReadingStore;
use crate::sync::ReadingSink;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Periodic `AT+CSQ` sampler.
///
/// Every successful sample is appended to the store and handed to the sync
/// sink. Neither a store nor a sink failure stops the loop.
pub struct PollScheduler {
    modem: Arc<Modem>,
    config: Arc<SchedulerConfig>,
    store: Arc<dyn ReadingStore>,
    sink: Option<Arc<dyn ReadingSink>>,
}

impl PollScheduler {
    pub fn new(
        modem: Arc<Modem>,
        config: Arc<SchedulerConfig>,
        store: Arc<dyn ReadingStore>,
        sink: Option<Arc<dyn ReadingSink>>,
    ) -> Self {
        Self {
            modem,
            config,
            store,
            sink,
        }
    }

    // One cycle. A reply without `+CSQ` stores nothing.
    pub fn poll_once(&self) -> Option<SignalReading> {
        let timestamp = Utc::now().timestamp();
        let Some(report) = self.modem.read_signal_once() else {
            warn!("no signal reading this cycle");
            return None;
        };

        let reading = SignalReading::from_report(timestamp, report);
        info!(
            rssi = report.rssi,
            dbm = ?report.dbm,
            ber = report.ber,
            "signal sampled"
        );

        if let Err(err) = self.store.append(&reading) {
            error!(error = %err, "storing reading failed");
        }
        if let Some(sink) = &self.sink {
            if let Err(err) = sink.publish(&reading) {
                warn!(error = %format!("{err:#}"), "handing reading to sync failed");
            }
        }
        Some(reading)
    }

    pub fn run(&self, running: &AtomicBool) {
        self.run_paced(&mut WallClock::new(running));
    }

    pub fn run_paced(&self, pacer: &mut impl Pacer) {
        info!(
            interval_secs = self.config.poll_interval_secs(),
            "poll scheduler started"
        );
        let mut cadence = Cadence::starting_at(pacer.now());
        let mut last_start: Option<Instant> = None;

        while pacer.running() {
            let interval = self.config.poll_interval();
            let started = pacer.now();
            if let Some(previous) = last_start {
                debug!(
                    gap_ms = started.duration_since(previous).as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "poll gap"
                );
            }
            last_start = Some(started);

            self.poll_once();

            let wait = cadence.advance(interval, pacer.now());
            if !pacer.pause(wait) {
                break;
            }
        }
        info!("poll scheduler stopped");
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("poll".into())
            .spawn(move || self.run(&running))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::channel::ModemChannel;
    use crate::schedule::config::ScheduleSettings;
    use crate::store::HistoryQuery;
    use crate::testing::{
        FailingStore, MemoryStore, RecordingSink, ScriptedModem, ScriptedOpener, VirtualPacer,
    };
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn modem(device: &ScriptedModem) -> Arc<Modem> {
        let channel = ModemChannel::new(Box::new(ScriptedOpener::new(device.clone())));
        Arc::new(Modem::new(channel, Duration::ZERO))
    }

    fn config(poll_interval_secs: f64) -> Arc<SchedulerConfig> {
        Arc::new(
            SchedulerConfig::new(ScheduleSettings {
                poll_interval_secs,
                ..ScheduleSettings::default()
            })
            .unwrap(),
        )
    }

    #[test]
    fn successful_cycle_stores_and_publishes() {
        let device = ScriptedModem::new();
        device.set_reply("AT+CSQ", "+CSQ: 17,0\r\nOK\r\n");
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let poller = PollScheduler::new(modem(&device), config(10.0), store.clone(), Some(sink.clone()));

        let reading = poller.poll_once().unwrap();
        assert_eq!(reading.rssi, Some(17));
        assert_eq!(reading.dbm, Some(-125.0));
        assert_eq!(reading.ber, Some(0));
        assert_eq!(store.all(), vec![reading]);
        assert_eq!(sink.readings(), vec![reading]);
    }

    #[test]
    fn cycle_without_csq_stores_nothing() {
        let device = ScriptedModem::new();
        device.set_reply("AT+CSQ", "\r\nERROR\r\n");
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let poller = PollScheduler::new(modem(&device), config(10.0), store.clone(), Some(sink.clone()));

        assert_eq!(poller.poll_once(), None);
        assert!(store.query(&HistoryQuery::default()).unwrap().is_empty());
        assert!(sink.readings().is_empty());
    }

    #[test]
    fn store_failure_still_publishes() {
        let device = ScriptedModem::new();
        device.set_reply("AT+CSQ", "+CSQ: 30,0\r\n");
        let sink = Arc::new(RecordingSink::default());
        let poller = PollScheduler::new(modem(&device), config(10.0), Arc::new(FailingStore), Some(sink.clone()));

        assert!(poller.poll_once().is_some());
        assert!(poller.poll_once().is_some());
        assert_eq!(sink.readings().len(), 2);
    }

    #[test]
    fn failures_do_not_change_the_cadence() {
        let device = ScriptedModem::new();
        device.set_reply("AT+CSQ", "+CSQ: 22,0\r\n");
        let sink = Arc::new(RecordingSink::failing());
        let poller = PollScheduler::new(modem(&device), config(1.0), Arc::new(FailingStore), Some(sink.clone()));
        let mut pacer = VirtualPacer::new(5);

        poller.run_paced(&mut pacer);

        assert_eq!(sink.readings().len(), 5);
        assert_eq!(pacer.pauses(), vec![Duration::from_secs(1); 5]);
    }

    #[test]
    fn interval_change_applies_from_the_next_cycle() {
        let device = ScriptedModem::new();
        device.set_reply("AT+CSQ", "+CSQ: 22,0\r\n");
        let sink = Arc::new(RecordingSink::default());
        let config = config(1.0);
        let poller = PollScheduler::new(
            modem(&device),
            Arc::clone(&config),
            Arc::new(MemoryStore::default()),
            Some(sink.clone()),
        );
        // The change lands while the first wait is under way.
        let hook_config = Arc::clone(&config);
        let mut pacer = VirtualPacer::new(3).on_pause(move |index| {
            if index == 0 {
                hook_config.set_poll_interval(300.0).unwrap();
            }
        });

        poller.run_paced(&mut pacer);

        assert_eq!(
            pacer.pauses(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(300),
                Duration::from_secs(300)
            ]
        );
        assert_eq!(sink.readings().len(), 3);
    }

    #[test]
    fn missing_device_keeps_loop_alive() {
        let device = ScriptedModem::new();
        device.set_present(false);
        let store = Arc::new(MemoryStore::default());
        let poller = PollScheduler::new(modem(&device), config(1.0), store.clone(), None);
        let plugged = device.clone();
        let mut pacer = VirtualPacer::new(2).on_pause(move |index| {
            if index == 0 {
                plugged.set_present(true);
                plugged.set_reply("AT+CSQ", "+CSQ: 9,0\r\n");
            }
        });

        poller.run_paced(&mut pacer);

        let rssi: Vec<_> = store.all().iter().map(|r| r.rssi).collect();
        assert_eq!(rssi, vec![Some(9)]);
        assert_eq!(pacer.pauses().len(), 2);
    }

    #[test]
    fn spawned_thread_stops_promptly() {
        let device = ScriptedModem::new();
        device.set_reply("AT+CSQ", "+CSQ: 22,0\r\n");
        let store = Arc::new(MemoryStore::default());
        let poller = PollScheduler::new(modem(&device), config(1.0), store.clone(), None);
        let running = Arc::new(AtomicBool::new(true));

        let worker = poller.spawn(Arc::clone(&running)).unwrap();
        thread::sleep(Duration::from_millis(100));
        let stop_requested = Instant::now();
        running.store(false, Ordering::SeqCst);
        worker.join().unwrap();

        assert!(stop_requested.elapsed() < Duration::from_millis(500));
        assert_eq!(store.all().len(), 1);
    }
}
