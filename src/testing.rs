// In-memory collaborators shared by the unit tests.
use crate::modem::channel::{LinkError, LinkOpener, ModemLink};
use crate::reading::SignalReading;
use crate::schedule::Pacer;
use crate::store::{HistoryQuery, ReadingStore, StoreError, select_latest};
use crate::sync::ReadingSink;
use anyhow::bail;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct DeviceState {
    present: bool,
    opens: usize,
    replies: HashMap<String, Vec<u8>>,
    pending: Vec<u8>,
    writes: Vec<Vec<u8>>,
    fail_next_write: bool,
    fail_commands: Vec<String>,
}

// A fake modem: answers scripted replies per command and records every write.
#[derive(Clone)]
pub struct ScriptedModem {
    state: Arc<Mutex<DeviceState>>,
    writers: Arc<AtomicUsize>,
    max_writers: Arc<AtomicUsize>,
}

impl ScriptedModem {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                present: true,
                ..DeviceState::default()
            })),
            writers: Arc::new(AtomicUsize::new(0)),
            max_writers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn link(&self) -> ScriptedLink {
        ScriptedLink {
            device: self.clone(),
        }
    }

    pub fn set_present(&self, present: bool) {
        self.state.lock().unwrap().present = present;
    }

    pub fn set_reply(&self, command: &str, reply: &str) {
        self.set_raw_reply(command, reply.as_bytes().to_vec());
    }

    pub fn set_raw_reply(&self, command: &str, reply: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(command.to_string(), reply);
    }

    pub fn push_unsolicited(&self, text: &str) {
        self.state
            .lock()
            .unwrap()
            .pending
            .extend_from_slice(text.as_bytes());
    }

    pub fn fail_next_write(&self) {
        self.state.lock().unwrap().fail_next_write = true;
    }

    pub fn fail_write_of(&self, command: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_commands
            .push(command.to_string());
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    // Successful writes with the trailing CR removed.
    pub fn writes(&self) -> Vec<String> {
        self.raw_writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).trim_end_matches('\r').to_string())
            .collect()
    }

    pub fn max_concurrent_writers(&self) -> usize {
        self.max_writers.load(Ordering::SeqCst)
    }
}

pub struct ScriptedLink {
    device: ScriptedModem,
}

impl ModemLink for ScriptedLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.device.state.lock().unwrap().pending.clear();
        Ok(())
    }

    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()> {
        let active = self.device.writers.fetch_add(1, Ordering::SeqCst) + 1;
        self.device.max_writers.fetch_max(active, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        let result = self.record_write(bytes);
        self.device.writers.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.device.state.lock().unwrap().pending))
    }
}

impl ScriptedLink {
    fn record_write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.device.state.lock().unwrap();
        let command = String::from_utf8_lossy(bytes)
            .trim_end_matches('\r')
            .to_string();
        if state.fail_next_write || state.fail_commands.contains(&command) {
            state.fail_next_write = false;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        state.writes.push(bytes.to_vec());
        let reply = state
            .replies
            .get(&command)
            .cloned()
            .unwrap_or_else(|| b"\r\nOK\r\n".to_vec());
        state.pending.extend_from_slice(&reply);
        Ok(())
    }
}

pub struct ScriptedOpener {
    device: ScriptedModem,
}

impl ScriptedOpener {
    pub fn new(device: ScriptedModem) -> Self {
        Self { device }
    }
}

impl LinkOpener for ScriptedOpener {
    fn open(&self) -> Result<Box<dyn ModemLink>, LinkError> {
        let mut state = self.device.state.lock().unwrap();
        if !state.present {
            return Err(LinkError::Open {
                device: "scripted".into(),
                source: serialport::Error::new(serialport::ErrorKind::NoDevice, "not present"),
            });
        }
        state.opens += 1;
        Ok(Box::new(self.device.link()))
    }

    fn device(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<SignalReading>>,
}

impl MemoryStore {
    pub fn with_readings(readings: Vec<SignalReading>) -> Self {
        Self {
            readings: Mutex::new(readings),
        }
    }

    pub fn all(&self) -> Vec<SignalReading> {
        self.readings.lock().unwrap().clone()
    }
}

impl ReadingStore for MemoryStore {
    fn append(&self, reading: &SignalReading) -> Result<(), StoreError> {
        self.readings.lock().unwrap().push(*reading);
        Ok(())
    }

    fn query(&self, query: &HistoryQuery) -> Result<Vec<SignalReading>, StoreError> {
        Ok(select_latest(self.all(), query))
    }
}

// Store whose disk is always full.
pub struct FailingStore;

impl ReadingStore for FailingStore {
    fn append(&self, _reading: &SignalReading) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: PathBuf::from("/full"),
            source: io::Error::other("no space left on device"),
        })
    }

    fn query(&self, _query: &HistoryQuery) -> Result<Vec<SignalReading>, StoreError> {
        Err(StoreError::Io {
            path: PathBuf::from("/full"),
            source: io::Error::other("no space left on device"),
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(Instant, SignalReading)>>,
    fail: bool,
}

impl RecordingSink {
    // Records every reading but reports each publish as failed.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn readings(&self) -> Vec<SignalReading> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| *r)
            .collect()
    }

    pub fn instants(&self) -> Vec<Instant> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }
}

impl ReadingSink for RecordingSink {
    fn publish(&self, reading: &SignalReading) -> anyhow::Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((Instant::now(), *reading));
        if self.fail {
            bail!("aggregator unreachable");
        }
        Ok(())
    }
}

type PauseHook = Box<dyn FnMut(usize)>;

// Clock that only moves when a loop waits. Runs a fixed number of pauses, then asks the loop to stop.
pub struct VirtualPacer {
    now: Instant,
    remaining: usize,
    pauses: Vec<Duration>,
    holds: Vec<Duration>,
    hook: Option<PauseHook>,
}

impl VirtualPacer {
    pub fn new(pauses: usize) -> Self {
        Self {
            now: Instant::now(),
            remaining: pauses,
            pauses: Vec::new(),
            holds: Vec::new(),
            hook: None,
        }
    }

    // Called with the index of each pause after the clock has moved.
    pub fn on_pause(mut self, hook: impl FnMut(usize) + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.clone()
    }

    pub fn holds(&self) -> Vec<Duration> {
        self.holds.clone()
    }
}

impl Pacer for VirtualPacer {
    fn now(&self) -> Instant {
        self.now
    }

    fn running(&self) -> bool {
        self.remaining > 0
    }

    fn pause(&mut self, wait: Duration) -> bool {
        let index = self.pauses.len();
        self.pauses.push(wait);
        self.now += wait;
        self.remaining = self.remaining.saturating_sub(1);
        if let Some(hook) = self.hook.as_mut() {
            hook(index);
        }
        self.remaining > 0
    }

    fn hold(&mut self, duration: Duration) {
        self.holds.push(duration);
        self.now += duration;
    }
}
