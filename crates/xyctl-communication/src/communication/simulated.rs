//! Simulated firmware
//!
//! An in-process stand-in for a GRBL or Marlin board. It answers identity,
//! status, parameter and motion commands the way the real firmware does,
//! applies real-time override pulses to its own feed override, and records
//! everything the host wrote so tests can assert on the traffic.
//!
//! Fault injection: answer nothing ([`SimulatedMachine::set_silent`]), fail
//! every I/O call ([`SimulatedMachine::set_fail_io`]), raise an alarm on the
//! next motion line or status query, or reject the next line with an error
//! code.

use super::{PortOpener, Transport};
use crate::firmware::grbl::realtime::{self, OverrideCodes};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use xyctl_core::ConnectError;
use xyctl_settings::OverrideCodeTable;

/// Banner answered to `$I` by the simulated GRBL
pub const SIMULATED_GRBL_BANNER: &str = "Grbl 1.1h ['$' for help]";
/// Identity answered to `M115` by the simulated Marlin
pub const SIMULATED_MARLIN_BANNER: &str =
    "FIRMWARE_NAME:Marlin 2.1.2 (Jan  1 2024) SOURCE_CODE_URL:github.com/MarlinFirmware/Marlin MACHINE_TYPE:XY";

/// Firmware family emulated by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFirmware {
    /// GRBL 1.1
    Grbl,
    /// Marlin 2.x
    Marlin,
    /// Never answers
    Silent,
}

#[derive(Debug)]
struct SimState {
    firmware: SimulatedFirmware,
    banner: String,
    ack_latency: Duration,
    codes: OverrideCodes,
    silent: bool,
    fail_io: bool,
    alarm_on_next_motion: Option<String>,
    alarm_on_next_status: Option<String>,
    locked: bool,
    reject_next: Option<u8>,
    reject_next_motion: Option<u8>,
    reject_line: Option<(String, u8)>,
    held: bool,
    feed_override: u16,
    feed_rate: f64,
    marlin_speed: u16,
    params: BTreeMap<u32, String>,
    partial: Vec<u8>,
    outgoing: VecDeque<(Instant, String)>,
    written: Vec<String>,
    realtime: Vec<u8>,
    outstanding: usize,
    max_outstanding: usize,
}

impl SimState {
    fn new(firmware: SimulatedFirmware) -> Self {
        let banner = match firmware {
            SimulatedFirmware::Marlin => SIMULATED_MARLIN_BANNER,
            _ => SIMULATED_GRBL_BANNER,
        };
        let params = [
            (0, "10"),
            (1, "25"),
            (3, "0"),
            (11, "0.010"),
            (20, "0"),
            (21, "0"),
            (100, "250.000"),
            (101, "250.000"),
            (110, "500.000"),
            (111, "500.000"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();

        Self {
            firmware,
            banner: banner.to_string(),
            ack_latency: Duration::ZERO,
            codes: OverrideCodes::for_table(OverrideCodeTable::Legacy),
            silent: firmware == SimulatedFirmware::Silent,
            fail_io: false,
            alarm_on_next_motion: None,
            alarm_on_next_status: None,
            locked: false,
            reject_next: None,
            reject_next_motion: None,
            reject_line: None,
            held: false,
            feed_override: 100,
            feed_rate: 0.0,
            marlin_speed: 100,
            params,
            partial: Vec::new(),
            outgoing: VecDeque::new(),
            written: Vec::new(),
            realtime: Vec::new(),
            outstanding: 0,
            max_outstanding: 0,
        }
    }

    fn queue(&mut self, line: impl Into<String>) {
        let ready = Instant::now() + self.ack_latency;
        self.outgoing.push_back((ready, line.into()));
    }

    fn receive(&mut self, data: &[u8]) {
        for &byte in data {
            if is_realtime_byte(byte) {
                self.on_realtime(byte);
            } else if byte == b'\n' {
                let raw = std::mem::take(&mut self.partial);
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                self.on_line(line);
            } else if byte != b'\r' {
                self.partial.push(byte);
            }
        }
    }

    fn on_realtime(&mut self, byte: u8) {
        self.realtime.push(byte);
        if self.silent || self.firmware != SimulatedFirmware::Grbl {
            return;
        }

        match byte {
            b'?' => {
                if let Some(alarm) = self.alarm_on_next_status.take() {
                    self.queue(alarm);
                    self.locked = true;
                }
                let state = if self.held {
                    "Hold:0"
                } else if self.outstanding > 0 {
                    "Run"
                } else {
                    "Idle"
                };
                let frame = format!(
                    "<{}|MPos:0.000,0.000,0.000|FS:{},0|Ov:{},100,100>",
                    state, self.feed_rate, self.feed_override
                );
                self.queue(frame);
            }
            b'!' => self.held = true,
            b'~' => self.held = false,
            _ => {
                if let Some(percent) = realtime::apply_pulse(&self.codes, self.feed_override, byte) {
                    self.feed_override = percent;
                }
            }
        }
    }

    fn on_line(&mut self, line: String) {
        self.written.push(line.clone());
        if self.silent {
            return;
        }
        match self.firmware {
            SimulatedFirmware::Grbl => self.grbl_reply(&line),
            SimulatedFirmware::Marlin => self.marlin_reply(&line),
            SimulatedFirmware::Silent => {}
        }
    }

    fn expect_ack(&mut self) {
        self.outstanding += 1;
        self.max_outstanding = self.max_outstanding.max(self.outstanding);
    }

    fn grbl_reply(&mut self, line: &str) {
        self.expect_ack();

        if self.locked {
            if line == "$X" {
                self.locked = false;
            } else {
                self.queue("error:9");
                return;
            }
        }

        if let Some(code) = self.reject_next.take() {
            self.queue(format!("error:{}", code));
            return;
        }
        if let Some((text, code)) = self.reject_line.take() {
            if text == line {
                self.queue(format!("error:{}", code));
                return;
            }
            self.reject_line = Some((text, code));
        }
        if is_motion(line) {
            if let Some(code) = self.reject_next_motion.take() {
                self.queue(format!("error:{}", code));
                return;
            }
            if let Some(alarm) = self.alarm_on_next_motion.take() {
                self.queue(alarm);
                // an alarm line is not an acknowledgment
                self.outstanding -= 1;
                return;
            }
            if let Some(feed) = word_value(line, 'F') {
                self.feed_rate = feed;
            }
        }

        if line == "$I" {
            let banner = self.banner.clone();
            self.queue("[VER:1.1h.20190825:]");
            self.queue(banner);
        } else if line == "$$" {
            let dump: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("${}={}", k, v))
                .collect();
            for entry in dump {
                self.queue(entry);
            }
        } else if line == "$X" {
            self.queue("[MSG:Caution: Unlocked]");
        } else if let Some((key, value)) = parse_assignment(line) {
            self.params.insert(key, value);
        } else if let Some(feed) = line.strip_prefix('F').and_then(|v| v.parse::<f64>().ok()) {
            self.feed_rate = feed;
        } else if line == "M115" {
            self.queue("error:20");
            return;
        }
        self.queue("ok");
    }

    fn marlin_reply(&mut self, line: &str) {
        self.expect_ack();

        if let Some(code) = self.reject_next.take() {
            self.queue(format!("Error:Unknown code {}", code));
            self.queue("ok");
            return;
        }
        if line.starts_with('$') {
            self.queue(format!("echo:Unknown command: \"{}\"", line));
        } else if line == "M115" {
            let banner = self.banner.clone();
            self.queue(banner);
            self.queue("Cap:EEPROM:1");
        } else if line == "M114" {
            self.queue("X:0.00 Y:0.00 Z:0.00 E:0.00 Count X:0 Y:0 Z:0");
        } else if let Some(speed) = line.strip_prefix("M220 S").and_then(|v| v.parse::<u16>().ok()) {
            self.marlin_speed = speed;
        }
        self.queue("ok");
    }
}

fn is_realtime_byte(byte: u8) -> bool {
    matches!(byte, b'?' | b'!' | b'~') || byte >= 0x80
}

fn is_motion(line: &str) -> bool {
    let upper = line.to_ascii_uppercase();
    upper.split_whitespace().any(|word| {
        matches!(word, "G0" | "G00" | "G1" | "G01")
    })
}

fn word_value(line: &str, letter: char) -> Option<f64> {
    line.split_whitespace()
        .find_map(|word| word.strip_prefix(letter))
        .and_then(|v| v.parse::<f64>().ok())
}

fn parse_assignment(line: &str) -> Option<(u32, String)> {
    let (key, value) = line.strip_prefix('$')?.split_once('=')?;
    Some((key.trim().parse().ok()?, value.trim().to_string()))
}

/// Shared handle to a simulated board
///
/// Clones refer to the same board; keep one in the test and hand another to
/// [`SimulatedOpener`].
#[derive(Debug, Clone)]
pub struct SimulatedMachine {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedMachine {
    /// Simulated board of the given family
    pub fn new(firmware: SimulatedFirmware) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(firmware))),
        }
    }

    /// Simulated GRBL 1.1
    pub fn grbl() -> Self {
        Self::new(SimulatedFirmware::Grbl)
    }

    /// Simulated Marlin
    pub fn marlin() -> Self {
        Self::new(SimulatedFirmware::Marlin)
    }

    /// Board that never answers
    pub fn silent() -> Self {
        Self::new(SimulatedFirmware::Silent)
    }

    /// Delay before each reply becomes readable
    pub fn with_ack_latency(self, latency: Duration) -> Self {
        self.state.lock().ack_latency = latency;
        self
    }

    /// Identity line answered by the board
    pub fn with_banner(self, banner: impl Into<String>) -> Self {
        self.state.lock().banner = banner.into();
        self
    }

    /// Override byte table understood by the board
    pub fn with_override_codes(self, table: OverrideCodeTable) -> Self {
        self.state.lock().codes = OverrideCodes::for_table(table);
        self
    }

    /// Stop (or resume) answering anything
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Fail (or stop failing) every read and write
    pub fn set_fail_io(&self, fail: bool) {
        self.state.lock().fail_io = fail;
    }

    /// Answer the next motion line with an alarm instead of `ok`
    pub fn trigger_alarm_on_next_motion(&self, alarm: impl Into<String>) {
        self.state.lock().alarm_on_next_motion = Some(alarm.into());
    }

    /// Report an alarm ahead of the next status frame and refuse every
    /// line with `error:9` until `$X`
    pub fn raise_alarm_on_next_status(&self, alarm: impl Into<String>) {
        self.state.lock().alarm_on_next_status = Some(alarm.into());
    }

    /// Whether an alarm lock is in effect
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Answer the next line with `error:<code>`
    pub fn reject_next(&self, code: u8) {
        self.state.lock().reject_next = Some(code);
    }

    /// Answer the first occurrence of `line` with `error:<code>`
    pub fn reject_line(&self, line: impl Into<String>, code: u8) {
        self.state.lock().reject_line = Some((line.into(), code));
    }

    /// Answer the next motion line with `error:<code>`
    pub fn reject_next_motion(&self, code: u8) {
        self.state.lock().reject_next_motion = Some(code);
    }

    /// Lines written by the host, in order
    pub fn written_lines(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    /// Real-time bytes written by the host, in order
    pub fn realtime_bytes(&self) -> Vec<u8> {
        self.state.lock().realtime.clone()
    }

    /// Forget recorded traffic
    pub fn clear_records(&self) {
        let mut state = self.state.lock();
        state.written.clear();
        state.realtime.clear();
        state.max_outstanding = state.outstanding;
    }

    /// Most lines ever waiting for their acknowledgment to be read
    pub fn max_outstanding(&self) -> usize {
        self.state.lock().max_outstanding
    }

    /// Feed override currently applied by the board
    pub fn feed_override(&self) -> u16 {
        self.state.lock().feed_override
    }

    /// Speed last set with `M220` (Marlin)
    pub fn marlin_speed(&self) -> u16 {
        self.state.lock().marlin_speed
    }

    /// Whether a feed hold is in effect
    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// Stored parameter value
    pub fn param(&self, id: u32) -> Option<String> {
        self.state.lock().params.get(&id).cloned()
    }

    /// Overwrite a stored parameter
    pub fn set_param(&self, id: u32, value: impl Into<String>) {
        self.state.lock().params.insert(id, value.into());
    }

    /// Open a transport to this board
    pub fn connect(&self, name: impl Into<String>) -> SimulatedTransport {
        SimulatedTransport {
            machine: self.clone(),
            name: name.into(),
        }
    }
}

/// Host side of a simulated link
#[derive(Debug)]
pub struct SimulatedTransport {
    machine: SimulatedMachine,
    name: String,
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "simulated I/O failure")
}

impl Transport for SimulatedTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.machine.state.lock();
        if state.fail_io {
            return Err(broken_pipe());
        }
        state.receive(data);
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.machine.state.lock();
                if state.fail_io {
                    return Err(broken_pipe());
                }
                let now = Instant::now();
                if state.outgoing.front().is_some_and(|(ready, _)| *ready <= now) {
                    if let Some((_, line)) = state.outgoing.pop_front() {
                        let terminal = line.starts_with("ok") || line.starts_with("error");
                        if terminal {
                            state.outstanding = state.outstanding.saturating_sub(1);
                        }
                        return Ok(Some(line));
                    }
                }
                if now >= deadline {
                    return Ok(None);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(Duration::from_millis(1)));
        }
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        let mut state = self.machine.state.lock();
        if state.fail_io {
            return Err(broken_pipe());
        }
        state.outgoing.clear();
        state.partial.clear();
        state.outstanding = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Opens transports to one simulated board under fixed port names
#[derive(Debug, Clone)]
pub struct SimulatedOpener {
    machine: SimulatedMachine,
    ports: Vec<String>,
}

impl SimulatedOpener {
    /// Expose `machine` as `/dev/ttyUSB0`
    pub fn new(machine: SimulatedMachine) -> Self {
        Self::with_ports(machine, vec!["/dev/ttyUSB0".to_string()])
    }

    /// Expose `machine` under the given port names
    pub fn with_ports(machine: SimulatedMachine, ports: Vec<String>) -> Self {
        Self { machine, ports }
    }

    /// Board behind the ports
    pub fn machine(&self) -> &SimulatedMachine {
        &self.machine
    }
}

impl PortOpener for SimulatedOpener {
    fn available_ports(&self) -> Result<Vec<String>, ConnectError> {
        Ok(self.ports.clone())
    }

    fn open(&self, port: &str, _baud_rate: u32) -> Result<Box<dyn Transport>, ConnectError> {
        if !self.ports.iter().any(|p| p == port) {
            return Err(ConnectError::FailedToOpen {
                port: port.to_string(),
                reason: "no such simulated port".to_string(),
            });
        }
        Ok(Box::new(self.machine.connect(port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(transport: &mut SimulatedTransport) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = transport.read_line(Duration::ZERO).expect("read") {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_grbl_identity() {
        let machine = SimulatedMachine::grbl();
        let mut link = machine.connect("sim");
        link.write_all(b"$I\n").expect("write");
        let lines = read_all(&mut link);
        assert_eq!(lines, vec!["[VER:1.1h.20190825:]", SIMULATED_GRBL_BANNER, "ok"]);
    }

    #[test]
    fn test_marlin_rejects_dollar_commands() {
        let machine = SimulatedMachine::marlin();
        let mut link = machine.connect("sim");
        link.write_all(b"$I\nM115\n").expect("write");
        let lines = read_all(&mut link);
        assert!(lines[0].starts_with("echo:Unknown command"));
        assert_eq!(lines[1], "ok");
        assert!(lines[2].starts_with("FIRMWARE_NAME:Marlin"));
    }

    #[test]
    fn test_override_pulses_and_status_frame() {
        let machine = SimulatedMachine::grbl();
        let mut link = machine.connect("sim");
        link.write_all(&[0x91, 0x91, 0x95, b'?']).expect("write");
        assert_eq!(machine.feed_override(), 119);
        let lines = read_all(&mut link);
        assert_eq!(lines, vec!["<Idle|MPos:0.000,0.000,0.000|FS:0,0|Ov:119,100,100>"]);
        assert_eq!(machine.realtime_bytes(), vec![0x91, 0x91, 0x95, b'?']);
    }

    #[test]
    fn test_outstanding_tracks_unread_acks() {
        let machine = SimulatedMachine::grbl();
        let mut link = machine.connect("sim");
        link.write_all(b"G1 X1\nG1 X2\nG1 X3\n").expect("write");
        assert_eq!(machine.max_outstanding(), 3);
        assert_eq!(read_all(&mut link).len(), 3);
        link.write_all(b"G1 X4\n").expect("write");
        assert_eq!(machine.max_outstanding(), 3);
    }

    #[test]
    fn test_ack_latency() {
        let machine = SimulatedMachine::grbl().with_ack_latency(Duration::from_millis(30));
        let mut link = machine.connect("sim");
        link.write_all(b"G0 X1\n").expect("write");
        assert_eq!(link.read_line(Duration::ZERO).expect("read"), None);
        assert_eq!(
            link.read_line(Duration::from_millis(200)).expect("read").as_deref(),
            Some("ok")
        );
    }

    #[test]
    fn test_fail_io() {
        let machine = SimulatedMachine::grbl();
        let mut link = machine.connect("sim");
        machine.set_fail_io(true);
        assert!(link.write_all(b"G0 X1\n").is_err());
        assert!(link.read_line(Duration::ZERO).is_err());
    }

    #[test]
    fn test_opener_rejects_unknown_port() {
        let opener = SimulatedOpener::new(SimulatedMachine::grbl());
        assert_eq!(opener.available_ports().expect("ports"), vec!["/dev/ttyUSB0"]);
        assert!(opener.open("/dev/ttyUSB0", 115200).is_ok());
        assert!(matches!(
            opener.open("COM9", 115200),
            Err(ConnectError::FailedToOpen { .. })
        ));
    }
}
