use crate::modem::channel::ModemLink;
use std::io;
use std::thread;
use std::time::Duration;

// Delay between writing a command and draining the reply.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

const COMMAND_TERMINATOR: u8 = b'\r';

// Discard stale input, then run one command exchange.
pub fn send_command(link: &mut dyn ModemLink, command: &str, settle: Duration) -> io::Result<String> {
    link.clear_input()?;
    transact(link, command, settle)
}

// Write a CR-terminated command, give the modem `settle` to answer, and decode whatever arrived.
// Unsolicited lines already buffered are kept in the reply.
pub fn transact(link: &mut dyn ModemLink, command: &str, settle: Duration) -> io::Result<String> {
    let mut frame = Vec::with_capacity(command.len() + 1);
    frame.extend_from_slice(command.as_bytes());
    frame.push(COMMAND_TERMINATOR);
    link.write_command(&frame)?;

    if !settle.is_zero() {
        thread::sleep(settle);
    }

    let raw = link.read_available()?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}
