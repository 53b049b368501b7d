// Everything that talks to the modem goes through `Modem`, which owns the one shared channel.
pub mod channel;
pub mod csq;
pub mod dial;
pub mod transceiver;

use channel::{LinkError, ModemChannel};
use csq::{AT_CSQ, CsqReport, parse_csq};
use dial::{AT_HANGUP, DialResult, dial_command, normalize_reply};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use transceiver::{send_command, transact};

pub struct Modem {
    channel: ModemChannel,
    settle: Duration,
}

impl Modem {
    pub fn new(channel: ModemChannel, settle: Duration) -> Self {
        Self { channel, settle }
    }

    pub fn channel(&self) -> &ModemChannel {
        &self.channel
    }

    // One `AT+CSQ` round trip. `None` covers a missing device, an I/O failure
    // (the channel is reset for the next attempt) and a reply without `+CSQ`.
    pub fn read_signal_once(&self) -> Option<CsqReport> {
        let settle = self.settle;
        match self
            .channel
            .with_exclusive_access(|link| send_command(link, AT_CSQ, settle))
        {
            Ok(reply) => {
                let report = parse_csq(&reply);
                if report.is_none() {
                    debug!(reply = %reply.trim(), "modem reply carried no +CSQ");
                }
                report
            }
            Err(err) => {
                warn!(error = %err, "signal read failed");
                None
            }
        }
    }

    /// Place a voice call, keep it up for `hold`, then hang up.
    ///
    /// The channel stays locked for the whole call. Nothing is retried: a
    /// failed call is reported back and the channel is reopened on next use.
    /// `number` must already have passed [`dial::validate_number`].
    pub fn dial(&self, number: &str, hold: Duration) -> DialResult {
        self.dial_with(number, hold, thread::sleep)
    }

    // `dial` with the hold delegated to `wait`, which receives `hold` while the channel is locked.
    pub fn dial_with(&self, number: &str, hold: Duration, wait: impl FnOnce(Duration)) -> DialResult {
        let settle = self.settle;
        let exchange = self.channel.with_exclusive_access(|link| {
            let start = send_command(link, &dial_command(number), settle)?;
            wait(hold);
            let end = transact(link, AT_HANGUP, settle)?;
            Ok((start, end))
        });

        match exchange {
            Ok((start, end)) => {
                let resp_start = normalize_reply(&start);
                let resp_end = normalize_reply(&end);
                info!(number, reply = %resp_start, "dialed");
                info!(number, reply = %resp_end, "hung up");
                DialResult::Ok {
                    number: number.to_string(),
                    call_seconds: hold.as_secs(),
                    resp_start,
                    resp_end,
                }
            }
            Err(err) => {
                error!(number, error = %err, "call failed");
                DialResult::Error {
                    msg: dial_error_message(&err),
                }
            }
        }
    }
}

fn dial_error_message(err: &LinkError) -> String {
    match err {
        LinkError::Unavailable | LinkError::Open { .. } => "Serial not open".to_string(),
        LinkError::Io(io) => io.to_string(),
    }
}
