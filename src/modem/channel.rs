use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("opening serial port failed: {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial port is not open")]
    Unavailable,
    #[error("serial exchange failed: {0}")]
    Io(#[from] io::Error),
}

// Byte-level access to an open modem connection.
pub trait ModemLink: Send {
    fn clear_input(&mut self) -> io::Result<()>;
    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()>;
    // Return whatever the modem has buffered right now, possibly nothing.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;
}

impl ModemLink for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let pending = self.bytes_to_read().map_err(io::Error::from)? as usize;
            if pending == 0 {
                break;
            }
            let start = out.len();
            out.resize(start + pending, 0);
            let size = self.read(&mut out[start..])?;
            out.truncate(start + size);
            if size == 0 {
                break;
            }
        }
        Ok(out)
    }
}

// Knows how to (re)establish the physical connection.
pub trait LinkOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn ModemLink>, LinkError>;
    fn device(&self) -> &str;
}

pub struct SerialOpener {
    path: String,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialOpener {
    pub fn new(path: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            read_timeout,
        }
    }
}

impl LinkOpener for SerialOpener {
    fn open(&self) -> Result<Box<dyn ModemLink>, LinkError> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(|source| LinkError::Open {
                device: format!("{} @ {}", self.path, self.baud_rate),
                source,
            })?;
        Ok(Box::new(port))
    }

    fn device(&self) -> &str {
        &self.path
    }
}

enum ChannelState {
    Closed,
    Open(Box<dyn ModemLink>),
}

/// The single shared connection to the modem.
///
/// Every exchange runs under one mutex, so a poll and a call never interleave
/// bytes on the wire. Any I/O error drops the connection; the next access
/// reopens it.
pub struct ModemChannel {
    opener: Box<dyn LinkOpener>,
    state: Mutex<ChannelState>,
}

impl ModemChannel {
    pub fn new(opener: Box<dyn LinkOpener>) -> Self {
        Self {
            opener,
            state: Mutex::new(ChannelState::Closed),
        }
    }

    pub fn device(&self) -> &str {
        self.opener.device()
    }

    // Replace the current connection with a freshly opened one. Failure leaves the channel closed.
    pub fn open(&self) -> bool {
        let mut state = self.lock();
        self.open_locked(&mut state)
    }

    pub fn ensure_open(&self) -> bool {
        let mut state = self.lock();
        self.ensure_open_locked(&mut state)
    }

    pub fn mark_failed(&self) {
        *self.lock() = ChannelState::Closed;
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.lock(), ChannelState::Open(_))
    }

    // Run one whole command/response sequence while holding the channel.
    pub fn with_exclusive_access<T>(
        &self,
        exchange: impl FnOnce(&mut dyn ModemLink) -> io::Result<T>,
    ) -> Result<T, LinkError> {
        let mut state = self.lock();
        if !self.ensure_open_locked(&mut state) {
            return Err(LinkError::Unavailable);
        }
        let ChannelState::Open(link) = &mut *state else {
            return Err(LinkError::Unavailable);
        };

        match exchange(link.as_mut()) {
            Ok(value) => Ok(value),
            Err(err) => {
                *state = ChannelState::Closed;
                warn!(device = self.device(), error = %err, "serial exchange failed; closing port");
                Err(LinkError::Io(err))
            }
        }
    }

    fn ensure_open_locked(&self, state: &mut ChannelState) -> bool {
        if matches!(state, ChannelState::Open(_)) {
            return true;
        }
        self.open_locked(state)
    }

    fn open_locked(&self, state: &mut ChannelState) -> bool {
        match self.opener.open() {
            Ok(link) => {
                *state = ChannelState::Open(link);
                info!(device = self.device(), "serial port opened");
                true
            }
            Err(err) => {
                *state = ChannelState::Closed;
                error!(device = self.device(), error = %err, "serial port unavailable");
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
