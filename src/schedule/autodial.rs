use crate::modem::Modem;
use crate::schedule::config::SchedulerConfig;
use crate::schedule::{Cadence, Pacer, WallClock};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

// How often a disabled scheduler re-checks the enable flag.
const IDLE_POLL: Duration = Duration::from_secs(1);

// Places a diagnostic call to the configured number on a fixed cadence while enabled.
pub struct AutoDialScheduler {
    modem: Arc<Modem>,
    config: Arc<SchedulerConfig>,
}

impl AutoDialScheduler {
    pub fn new(modem: Arc<Modem>, config: Arc<SchedulerConfig>) -> Self {
        Self { modem, config }
    }

    pub fn run(&self, running: &AtomicBool) {
        self.run_paced(&mut WallClock::new(running));
    }

    pub fn run_paced(&self, pacer: &mut impl Pacer) {
        info!(number = self.config.auto_dial_number(), "auto-dial scheduler started");
        let mut cadence = Cadence::starting_at(pacer.now());
        let mut idle = true;

        while pacer.running() {
            let status = self.config.auto_dial_status();
            if !status.enabled {
                idle = true;
                if !pacer.pause(IDLE_POLL) {
                    break;
                }
                continue;
            }
            // Enabling calls right away and anchors the cadence at that call.
            if idle {
                cadence.reset(pacer.now());
                idle = false;
            }

            let number = self.config.auto_dial_number();
            info!(number, interval_secs = status.interval, "auto-dial placing call");
            let result = self.modem.dial_with(
                number,
                Duration::from_secs(status.duration),
                |hold| pacer.hold(hold),
            );
            info!(
                status = result.status(),
                duration_secs = status.duration,
                "auto-dial call finished"
            );

            let wait = cadence.advance(Duration::from_secs(status.interval), pacer.now());
            if !pacer.pause(wait) {
                break;
            }
        }
        info!("auto-dial scheduler stopped");
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("auto-dial".into())
            .spawn(move || self.run(&running))
    }
}
