use crate::modem::Modem;
use crate::modem::channel::{ModemChannel, SerialOpener};
use crate::modem::transceiver::DEFAULT_SETTLE;
use crate::schedule::config::{DEFAULT_CALL_NUMBER, ScheduleSettings};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// CLI root definition. This is the single entrypoint for all supported modes.
#[derive(Parser, Debug)]
#[command(name = "modem-signal-logger", version)]
#[command(about = "Modem signal-quality logger with HTTP control and remote sync")]
pub struct Cli {
    #[command(subcommand)]
    pub command: AppCommand,
}

// Subcommands map directly to one module each under src/commands/.
#[derive(Subcommand, Debug)]
pub enum AppCommand {
    /// Poll the modem, store readings, run auto-dial and serve the HTTP control surface
    Run(RunArgs),
    /// Receive readings published by devices and serve their history
    Aggregate(AggregateArgs),
    /// Read signal quality once and print it as JSON
    Read(ReadArgs),
    /// Place one call, hold it, hang up and print the result as JSON
    Dial(DialArgs),
}

// Physical link settings. These are fixed for the life of the process.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    #[arg(long, default_value = "/dev/ttyACM0")]
    pub serial_port: String,
    #[arg(long, default_value_t = 115_200)]
    pub baud_rate: u32,
    #[arg(long, default_value_t = 1_000)]
    pub read_timeout_ms: u64,
    /// Wait between writing an AT command and reading the reply
    #[arg(long, default_value_t = DEFAULT_SETTLE.as_millis() as u64)]
    pub settle_ms: u64,
}

impl LinkArgs {
    // The channel starts closed; the first exchange opens the port.
    pub fn modem(&self) -> Modem {
        let opener = SerialOpener::new(
            self.serial_port.clone(),
            self.baud_rate,
            Duration::from_millis(self.read_timeout_ms),
        );
        Modem::new(
            ModemChannel::new(Box::new(opener)),
            Duration::from_millis(self.settle_ms),
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[arg(long, default_value = "modem.lock")]
    pub lock_file: PathBuf,
    #[arg(long, default_value = "data/csq_log.db")]
    pub data_file: PathBuf,
    #[arg(long, env = "MODEM_LISTEN", default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,
    #[arg(long, default_value_t = 10.0)]
    pub poll_interval_secs: f64,
    /// Aggregator base URL; readings are POSTed to <url>/ingest
    #[arg(long, env = "MODEM_SYNC_URL")]
    pub sync_url: Option<String>,
    #[arg(long, default_value_t = 5_000)]
    pub sync_timeout_ms: u64,
    #[arg(long, default_value = DEFAULT_CALL_NUMBER)]
    pub call_number: String,
    #[arg(long, default_value_t = false)]
    pub auto_dial: bool,
    #[arg(long, default_value_t = 1_800)]
    pub auto_dial_interval_secs: u64,
    #[arg(long, default_value_t = 15)]
    pub auto_dial_duration_secs: u64,
}

impl RunArgs {
    pub fn schedule_settings(&self) -> ScheduleSettings {
        ScheduleSettings {
            poll_interval_secs: self.poll_interval_secs,
            auto_dial_enabled: self.auto_dial,
            auto_dial_interval_secs: self.auto_dial_interval_secs,
            auto_dial_duration_secs: self.auto_dial_duration_secs,
            auto_dial_number: self.call_number.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AggregateArgs {
    #[arg(long, default_value = "data/aggregate_log.db")]
    pub data_file: PathBuf,
    #[arg(long, env = "MODEM_LISTEN", default_value = "0.0.0.0:5001")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[arg(long, default_value = "modem.lock")]
    pub lock_file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct DialArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[arg(long, default_value = "modem.lock")]
    pub lock_file: PathBuf,
    #[arg(long, default_value = DEFAULT_CALL_NUMBER)]
    pub number: String,
    #[arg(long, default_value_t = 15)]
    pub secs: u64,
}
