//! Motion controller
//!
//! [`MotionController`] is the single owner of the serial link and every
//! piece of state driven by it: connection, logical position, safety
//! envelope and override state all live behind one mutex, so a line
//! transaction, a status poll or a streaming step never interleaves with
//! another caller's traffic. The hold, abort and streaming flags are atomics
//! so an emergency stop is never queued behind a long transaction, and the
//! event queue has its own lock.
//!
//! Operations are grouped by concern:
//! - connection lifecycle, liveness and polling (this module)
//! - jog, home, origin, emergency stop ([`jog`])
//! - feed override control ([`overrides`])
//! - G-code streaming ([`streamer`])
//! - firmware parameters and machine preferences ([`parameters`])

pub mod gcode;
pub mod jog;
pub mod overrides;
pub mod parameters;
pub mod poller;
pub mod position;
pub mod soft_limits;
pub mod streamer;

pub use parameters::RestoreReport;
pub use poller::{Liveness, LivenessMonitor, StatusPoller};
pub use position::PositionTracker;
pub use soft_limits::{SoftLimitGuard, Violation};
pub use streamer::{spawn_stream, StreamReport};

use crate::communication::channel::{Ack, CommandChannel, Outcome, Reply};
use crate::communication::{select_port, PortOpener, SerialOpener};
use crate::firmware::grbl::{self, OverrideCodes};
use crate::firmware::{self, StatusReply};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use xyctl_core::{
    CommandError, ConnectError, ConnectionInfo, ConnectionState, Event, EventKind, EventQueue,
    FirmwareKind, MachinePosition, OverrideState, ParameterError, SafetyEnvelope,
};
use xyctl_settings::{ControllerConfig, SettingsError, SidecarStore};

/// State guarded by the transport mutex
pub(crate) struct Inner {
    channel: Option<CommandChannel>,
    state: ConnectionState,
    info: Option<ConnectionInfo>,
    tracker: PositionTracker,
    guard: SoftLimitGuard,
    overrides: OverrideState,
    poller: StatusPoller,
    codes: OverrideCodes,
    events: Arc<EventQueue>,
}

impl Inner {
    fn firmware(&self) -> FirmwareKind {
        self.info
            .as_ref()
            .map(|info| info.firmware)
            .unwrap_or_default()
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some() && self.state == ConnectionState::Connected
    }

    fn channel(&mut self) -> Result<&mut CommandChannel, CommandError> {
        match self.channel.as_mut() {
            Some(channel) if self.state == ConnectionState::Connected => Ok(channel),
            _ => Err(CommandError::NotConnected),
        }
    }

    /// Close the link after an I/O failure or a dead liveness verdict
    fn demote(&mut self, reason: &str) {
        if self.channel.is_none() {
            return;
        }
        let port = self
            .channel
            .as_ref()
            .map(|channel| channel.port_name().to_string())
            .unwrap_or_default();
        tracing::error!("Connection to {} lost: {}", port, reason);
        self.close();
        self.events.push(
            Event::new(EventKind::ConnectionLost)
                .with("port", port)
                .with("detail", reason),
        );
    }

    /// Drop the transport and forget the origin
    fn close(&mut self) {
        self.channel = None;
        self.state = ConnectionState::Disconnected;
        self.info = None;
        self.guard.clear();
    }

    /// Demote on transport failures; pass everything through
    fn check_io<T>(&mut self, result: Result<T, CommandError>) -> Result<T, CommandError> {
        if let Err(CommandError::Io { reason }) = &result {
            let reason = reason.clone();
            self.demote(&reason);
        }
        result
    }

    /// Line protocol with limit check, mode tracking and position update
    ///
    /// Motion outside the active envelope is rejected without transmission.
    /// A G90/G91 in the line takes effect before the send; the position only
    /// moves once the firmware acknowledged the line with `ok`.
    fn send_command(&mut self, text: &str) -> Result<Reply, CommandError> {
        let mode = self.tracker.mode_for(text);
        if let Err(violation) = self.guard.validate(text, &self.tracker, mode) {
            let detail = violation.to_string();
            self.events.push(
                Event::new(EventKind::LimitViolation)
                    .with("detail", &detail)
                    .with("command", text)
                    .with("axis", violation.axis),
            );
            return Err(CommandError::LimitViolation { detail });
        }
        self.tracker.set_mode(mode);

        let result = self.channel()?.send_line(text);
        let reply = match self.check_io(result) {
            Ok(reply) => reply,
            Err(err) => {
                match &err {
                    CommandError::Timeout { .. } => self.events.push(
                        Event::new(EventKind::CommandTimeout)
                            .with("command", text)
                            .with("detail", &err),
                    ),
                    CommandError::Rejected { message, .. } => self.events.push(
                        Event::new(EventKind::CommandRejected)
                            .with("command", text)
                            .with("detail", message),
                    ),
                    _ => {}
                }
                return Err(err);
            }
        };

        match &reply.ack {
            Ack::Ok => self.tracker.update_from_command(text),
            Ack::AlarmRecovered { alarm } => self.events.push(
                Event::new(EventKind::AlarmRecovered)
                    .with("command", text)
                    .with("detail", alarm),
            ),
        }
        Ok(reply)
    }

    fn send_realtime(&mut self, byte: u8) -> Result<(), CommandError> {
        let result = self.channel()?.send_realtime(byte);
        self.check_io(result)
    }

    /// One status query; GRBL frames are folded into the override state
    ///
    /// Alarms read on the way were already unlocked; they are reported here
    /// and removed from the reply.
    fn query_status(&mut self, timeout: Duration) -> Result<StatusReply, CommandError> {
        let kind = self.firmware();
        let result = firmware::query_status(self.channel()?, kind, timeout);
        let mut reply = self.check_io(result)?;
        self.poller.mark_polled();

        // not an answer to any pipelined line
        reply.pipeline.outcomes.retain(|outcome| *outcome != Outcome::Alarm);
        for alarm in std::mem::take(&mut reply.pipeline.alarms) {
            self.events.push(
                Event::new(EventKind::AlarmRecovered)
                    .with("command", "?")
                    .with("detail", alarm),
            );
        }

        if let Some(line) = reply.line.as_deref() {
            if kind == FirmwareKind::Grbl {
                StatusPoller::apply_frame(&mut self.overrides, line);
            }
        }
        Ok(reply)
    }
}

/// Client for one GRBL or Marlin controller
pub struct MotionController {
    config: Arc<ControllerConfig>,
    opener: Arc<dyn PortOpener>,
    store: SidecarStore,
    inner: Mutex<Inner>,
    liveness: Mutex<LivenessMonitor>,
    events: Arc<EventQueue>,
    hold: AtomicBool,
    abort: AtomicBool,
    streaming: AtomicBool,
}

impl std::fmt::Debug for MotionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionController")
            .field("store", &self.store)
            .field("hold", &self.is_held())
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

impl MotionController {
    /// Controller over real serial ports
    pub fn serial(config: ControllerConfig) -> Result<Self, SettingsError> {
        Self::new(config, Arc::new(SerialOpener))
    }

    /// Controller storing sidecar files in the configured data directory
    pub fn new(
        config: ControllerConfig,
        opener: Arc<dyn PortOpener>,
    ) -> Result<Self, SettingsError> {
        let store = SidecarStore::new(config.resolve_data_dir());
        Self::with_store(config, opener, store)
    }

    /// Controller with an explicit sidecar store
    ///
    /// The configuration is validated first. The persisted target speed is
    /// restored here.
    pub fn with_store(
        config: ControllerConfig,
        opener: Arc<dyn PortOpener>,
        store: SidecarStore,
    ) -> Result<Self, SettingsError> {
        config.validate()?;
        let events = Arc::new(EventQueue::new());
        let mut overrides = OverrideState::default();
        match store.load_speed() {
            Ok(Some(speed)) => overrides.target_speed_percent = speed,
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring persisted speed: {}", e),
        }

        let inner = Inner {
            channel: None,
            state: ConnectionState::Disconnected,
            info: None,
            tracker: PositionTracker::new(),
            guard: SoftLimitGuard::new(),
            overrides,
            poller: StatusPoller::new(config.status_poll_interval()),
            codes: OverrideCodes::for_table(config.override_codes),
            events: events.clone(),
        };
        let liveness = LivenessMonitor::new(config.liveness.fail_threshold, config.ping_interval());

        Ok(Self {
            config: Arc::new(config),
            opener,
            store,
            inner: Mutex::new(inner),
            liveness: Mutex::new(liveness),
            events,
            hold: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Sidecar file store
    pub fn store(&self) -> &SidecarStore {
        &self.store
    }

    /// Open a port and identify the firmware
    ///
    /// Without an explicit port the configured one is used, else the first
    /// USB/ACM-looking port, else the first serial device. An existing
    /// connection is closed first. After a GRBL handshake the firmware is
    /// unlocked, its own limit enforcement is switched off and the
    /// persisted junction deviation and direction mask are applied.
    pub fn connect(&self, port: Option<&str>) -> Result<ConnectionInfo, ConnectError> {
        let port = match port
            .map(str::to_string)
            .or_else(|| self.config.connection.port.clone())
        {
            Some(port) => port,
            None => {
                let ports = self.opener.available_ports()?;
                select_port(&ports).ok_or(ConnectError::NoPortFound)?
            }
        };
        let baud_rate = self.config.connection.baud_rate;

        let info = {
            let mut inner = self.inner.lock();
            if inner.channel.is_some() {
                tracing::info!("Closing previous connection");
                inner.close();
            }
            inner.state = ConnectionState::Handshaking;

            let info = match self.open_and_identify(&port, baud_rate) {
                Ok((channel, info)) => {
                    inner.channel = Some(channel);
                    inner.state = ConnectionState::Connected;
                    inner.info = Some(info.clone());
                    info
                }
                Err(e) => {
                    inner.state = ConnectionState::Disconnected;
                    return Err(e);
                }
            };

            inner.tracker = PositionTracker::new();
            inner.guard.clear();
            inner.overrides.current_percent = 100;
            match self.store.load_position() {
                Ok(Some((x, y))) => inner.tracker.restore(x, y),
                Ok(None) => {}
                Err(e) => tracing::warn!("Ignoring last position: {}", e),
            }

            if info.firmware == FirmwareKind::Grbl {
                if let Err(e) = self.configure_grbl(&mut inner) {
                    return Err(ConnectError::Io {
                        reason: e.to_string(),
                    });
                }
            }
            info
        };

        self.liveness.lock().reset();
        self.hold.store(false, Ordering::SeqCst);
        self.abort.store(false, Ordering::SeqCst);
        tracing::info!(
            "Connected to {} on {} ({})",
            info.firmware,
            info.port,
            info.firmware_info
        );
        self.events.push(
            Event::new(EventKind::Connected)
                .with("port", &info.port)
                .with("firmware", info.firmware)
                .with("detail", &info.firmware_info),
        );
        Ok(info)
    }

    fn open_and_identify(
        &self,
        port: &str,
        baud_rate: u32,
    ) -> Result<(CommandChannel, ConnectionInfo), ConnectError> {
        let io = |e: CommandError| ConnectError::Io {
            reason: e.to_string(),
        };

        let transport = self.opener.open(port, baud_rate)?;
        let mut channel = CommandChannel::new(transport, self.config.command_timeout());
        channel.clear_buffers().map_err(io)?;

        let identity = firmware::detect_firmware(
            &mut channel,
            self.config.handshake_window(),
            self.config.settle(),
        )
        .map_err(io)?;

        let Some(identity) = identity else {
            tracing::warn!("No firmware answered on {}", port);
            return Err(ConnectError::HandshakeTimeout {
                port: port.to_string(),
            });
        };

        let info = ConnectionInfo {
            port: port.to_string(),
            baud_rate,
            firmware: identity.kind,
            firmware_info: identity.info,
        };
        Ok((channel, info))
    }

    /// Post-handshake GRBL setup; only transport failures abort it
    fn configure_grbl(&self, inner: &mut Inner) -> Result<(), CommandError> {
        let prefs = self.store.load_machine_preferences().unwrap_or_else(|e| {
            tracing::warn!("Ignoring machine preferences: {}", e);
            Default::default()
        });
        let junction = prefs
            .junction_deviation
            .unwrap_or(self.config.motion.default_junction_deviation);

        let mut commands = vec![
            grbl::UNLOCK.to_string(),
            grbl::DISABLE_HARD_LIMITS.to_string(),
            grbl::DISABLE_SOFT_LIMITS.to_string(),
            grbl::junction_deviation_command(junction),
        ];
        if let Some(mask) = prefs.dir_invert_mask {
            commands.push(grbl::direction_mask_command(mask));
        }

        for command in &commands {
            match inner.send_command(command) {
                Ok(_) => {}
                Err(e) if e.is_io() => return Err(e),
                Err(e) => tracing::warn!("Setup command {} failed: {}", command, e),
            }
        }
        Ok(())
    }

    /// Close the link and forget the origin
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if inner.channel.is_none() {
            return;
        }

        let position = inner.tracker.position();
        if let Err(e) = self.store.save_position(position.x, position.y) {
            tracing::warn!("Failed to save position: {}", e);
        }
        let port = inner
            .info
            .as_ref()
            .map(|info| info.port.clone())
            .unwrap_or_default();
        inner.close();
        drop(inner);

        tracing::info!("Disconnected from {}", port);
        self.events
            .push(Event::new(EventKind::Disconnected).with("port", port));
    }

    /// Debounced liveness check
    ///
    /// A recent alive verdict is reused without touching the link. While a
    /// stream runs no ping is sent and the connection state is trusted.
    /// Failing to get the transport within the ping timeout counts as a
    /// failed ping. The link is declared dead, closed and reported as
    /// [`EventKind::ConnectionLost`] only after `fail_threshold`
    /// consecutive failures.
    pub fn is_alive(&self) -> bool {
        let timeout = self.config.ping_timeout();
        if self.is_streaming() {
            return self
                .inner
                .try_lock_for(timeout)
                .map(|inner| inner.is_connected())
                .unwrap_or(true);
        }

        let mut liveness = self.liveness.lock();
        let Some(mut inner) = self.inner.try_lock_for(timeout) else {
            tracing::debug!("Transport busy, ping skipped");
            return match liveness.record(false) {
                Liveness::Alive => true,
                Liveness::Dead => {
                    drop(liveness);
                    self.inner.lock().demote("no reply to liveness pings");
                    false
                }
            };
        };

        if !inner.is_connected() {
            return false;
        }
        if liveness.is_trusted() {
            return true;
        }

        let answered = match inner.query_status(timeout) {
            Ok(reply) => reply.is_alive(),
            Err(e) if e.is_io() => return false,
            Err(_) => false,
        };
        match liveness.record(answered) {
            Liveness::Alive => true,
            Liveness::Dead => {
                inner.demote("no reply to liveness pings");
                false
            }
        }
    }

    /// Rate-limited status poll
    ///
    /// Returns the feed override and feed rate last reported by the
    /// firmware. No query is sent while a stream runs or before the poll
    /// interval elapsed; the cached values are returned instead.
    pub fn poll(&self) -> Result<(u16, f64), CommandError> {
        let mut inner = self.inner.lock();
        if !inner.is_connected() {
            return Err(CommandError::NotConnected);
        }
        if !self.is_streaming() && inner.poller.is_due() {
            inner.query_status(self.config.ping_timeout())?;
        }
        Ok((
            inner.overrides.feed_override_percent,
            inner.overrides.reported_feed_rate,
        ))
    }

    /// Connection lifecycle state
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Description of the current connection
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.lock().info.clone()
    }

    /// Logical position
    pub fn position(&self) -> MachinePosition {
        self.inner.lock().tracker.position()
    }

    /// Safety envelope
    pub fn envelope(&self) -> SafetyEnvelope {
        self.inner.lock().guard.envelope()
    }

    /// Override state
    pub fn override_state(&self) -> OverrideState {
        self.inner.lock().overrides
    }

    /// Whether a stream session is running
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Whether motion is held by an emergency stop
    pub fn is_held(&self) -> bool {
        self.hold.load(Ordering::SeqCst)
    }

    /// Take all pending events, oldest first
    pub fn drain_events(&self) -> Vec<Event> {
        self.events.drain()
    }

    /// Live event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Replace the envelope bounds
    pub fn set_envelope(
        &self,
        x_min: f64,
        y_min: f64,
        x_max: f64,
        y_max: f64,
    ) -> Result<(), ParameterError> {
        if !self.inner.lock().guard.set_envelope(x_min, y_min, x_max, y_max) {
            return Err(ParameterError::InvalidValue {
                setting: "envelope".to_string(),
                reason: format!(
                    "min must be below max (x {}..{}, y {}..{})",
                    x_min, x_max, y_min, y_max
                ),
            });
        }
        tracing::info!(
            "Envelope set to X[{}, {}] Y[{}, {}]",
            x_min,
            x_max,
            y_min,
            y_max
        );
        Ok(())
    }

    /// Switch soft-limit enforcement (effective once an origin exists)
    pub fn set_limits_active(&self, active: bool) {
        self.inner.lock().guard.set_limits_active(active);
        tracing::info!("Soft limits {}", if active { "on" } else { "off" });
    }

    fn ensure_not_streaming(&self) -> Result<(), CommandError> {
        if self.is_streaming() {
            return Err(CommandError::Busy {
                reason: "stream session running".to_string(),
            });
        }
        Ok(())
    }

    fn save_position(&self, position: MachinePosition) {
        if let Err(e) = self.store.save_position(position.x, position.y) {
            tracing::warn!("Failed to save position: {}", e);
        }
    }
}
