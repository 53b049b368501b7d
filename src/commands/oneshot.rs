use crate::args::{DialArgs, ReadArgs};
use crate::modem::dial::validate_number;
use crate::reading::SignalReading;
use crate::schedule::config::check_manual_call;
use crate::shared::lock::ModemLock;
use anyhow::{Result, anyhow, bail};
use chrono::Utc;

// One-shot `AT+CSQ`, printed as a JSON reading on stdout.
pub fn run_read(args: ReadArgs) -> Result<()> {
    let _lock = ModemLock::acquire(&args.lock_file)?;
    let modem = args.link.modem();
    if !modem.channel().ensure_open() {
        bail!("modem not available: {}", modem.channel().device());
    }

    let timestamp = Utc::now().timestamp();
    let report = modem
        .read_signal_once()
        .ok_or_else(|| anyhow!("no signal reading from {}", args.link.serial_port))?;
    let reading = SignalReading::from_report(timestamp, report);
    println!("{}", serde_json::to_string(&reading)?);
    Ok(())
}

// One dial/hold/hangup sequence, printed as the same JSON the `/call` route returns.
pub fn run_dial(args: DialArgs) -> Result<()> {
    validate_number(&args.number)?;
    let hold = check_manual_call(args.secs)?;
    let _lock = ModemLock::acquire(&args.lock_file)?;
    let modem = args.link.modem();

    let result = modem.dial(&args.number, hold);
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_ok() {
        bail!("call to {} failed", args.number);
    }
    Ok(())
}
