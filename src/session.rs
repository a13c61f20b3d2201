//! A connection to the bridge and everything known about the sensor behind it.
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::constants::IDENTIFY_TOKEN;
use crate::error::{Error, Result};
use crate::field::{self, FieldMap, FieldSpec};
use crate::protocol::{self, Command, Line, Measurement};
use crate::sequencer::{Pacing, Sequencer};
use crate::space::Space;
use crate::state::{ConnectionState, DeviceState, ReadState, SensingMode};
use crate::transport::{Event, LineTransport, Transport, TransportOptions};

/// What [`Session::poll`] picked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A line and how it was classified. Already applied to the session.
    Line { text: String, decoded: Line },
    /// The read loop died; the session is now disconnected.
    Disconnected(String),
    /// A write failed; the session stays connected.
    WriteFailed(String),
}

/// Owns the transport, both address spaces and the connection/read flags.
///
/// All state changes happen on the caller's thread: inbound lines queue up
/// in the transport's channel until [`Session::poll`] applies them.
pub struct Session {
    fields: FieldMap,
    state: DeviceState,
    read: ReadState,
    connection: ConnectionState,
    transport: Option<LineTransport>,
    options: TransportOptions,
    sequencer: Sequencer,
    identified: bool,
    last_measurement: Option<Measurement>,
    last_error: Option<String>,
    // dumped words at canonical (register, MTP) addresses since creation
    received: (usize, usize),
}

impl Session {
    pub fn new(fields: FieldMap, options: TransportOptions, pacing: Pacing) -> Self {
        Session {
            fields,
            state: DeviceState::new(),
            read: ReadState::default(),
            connection: ConnectionState::Disconnected,
            transport: None,
            options,
            sequencer: Sequencer::new(pacing),
            identified: false,
            last_measurement: None,
            last_error: None,
            received: (0, 0),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Session::new(
            FieldMap::load()?,
            config.transport_options(),
            config.pacing(),
        ))
    }

    /// Open a serial port. Any previous connection is closed first.
    pub fn connect(&mut self, port: &str, baudrate: u32) -> Result<()> {
        self.disconnect();
        match LineTransport::open(port, baudrate, &self.options) {
            Ok(transport) => {
                self.on_connected(transport);
                Ok(())
            }
            Err(e) => {
                log::warn!("{}", e);
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Use an already open byte stream as the bridge link.
    pub fn attach(
        &mut self,
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) -> Result<()> {
        self.disconnect();
        let transport = LineTransport::start(reader, writer, &self.options)?;
        self.on_connected(transport);
        Ok(())
    }

    fn on_connected(&mut self, transport: LineTransport) {
        self.transport = Some(transport);
        self.connection = ConnectionState::Connected;
        self.read.reset();
        self.identified = false;
        self.last_error = None;
    }

    /// Stop the read loop and release the port. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
            log::info!("Disconnected");
        }
        self.connection = ConnectionState::Disconnected;
        self.read.reset();
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    pub fn read_state(&self) -> ReadState {
        self.read
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Whether the bridge answered `I` since connecting.
    pub fn identified(&self) -> bool {
        self.identified
    }

    pub fn last_measurement(&self) -> Option<Measurement> {
        self.last_measurement
    }

    /// Reason of the last failed connect, read or write.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of dumped words received for `space`'s own addresses so far.
    pub fn words_received(&self, space: Space) -> usize {
        match space {
            Space::Register => self.received.0,
            Space::Mtp => self.received.1,
        }
    }

    fn transport(&mut self) -> Result<&mut LineTransport> {
        match self.connection {
            ConnectionState::Connected => self.transport.as_mut().ok_or(Error::NotConnected),
            ConnectionState::Disconnected => Err(Error::NotConnected),
        }
    }

    fn send(&mut self, cmd: Command) -> Result<()> {
        let sent = self.transport()?.send_command(cmd);
        if let Err(Error::Connection(reason)) = &sent {
            self.last_error = Some(reason.clone());
        }
        sent
    }

    pub fn identify(&mut self) -> Result<()> {
        self.identified = false;
        self.send(Command::Identify)
    }

    /// Request a register dump. Unlocks [`Session::program_registers`].
    pub fn read_registers(&mut self) -> Result<()> {
        self.send(Command::ReadRegisters)?;
        self.read.mark_read(Space::Register);
        Ok(())
    }

    /// Request an MTP dump. Unlocks [`Session::program_mtp`].
    pub fn read_mtp(&mut self) -> Result<()> {
        self.send(Command::ReadMtp)?;
        self.read.mark_read(Space::Mtp);
        Ok(())
    }

    pub fn measure(&mut self) -> Result<()> {
        self.send(Command::Measure)
    }

    pub fn acknowledge_status(&mut self) -> Result<()> {
        self.send(Command::Acknowledge)
    }

    /// Connected, and `space` was read since connecting.
    pub fn check_programmable(&self, space: Space) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        if !self.read.is_read(space) {
            return Err(Error::NotRead(space));
        }
        Ok(())
    }

    /// Load the 8 register words through `W` and commit them with `S`.
    pub fn program_registers(&mut self) -> Result<()> {
        self.program(Space::Register)
    }

    /// Load MTP words 0x00..=0x0E through `E` and burn them with `P`.
    ///
    /// Non-volatile with limited endurance. Confirming the write, and
    /// checking [`Session::mtp_lock_risk`], is up to the caller.
    pub fn program_mtp(&mut self) -> Result<()> {
        if self.state.mtp_lock_risk() {
            log::warn!(
                "MTP 0x0C = 0x{:04X}: MEMLOCK/DIS_DIAG bits will be programmed",
                self.state.mtp().get(crate::constants::addresses::MTP_LOCK_WORD)
            );
        }
        self.program(Space::Mtp)
    }

    fn program(&mut self, space: Space) -> Result<()> {
        self.check_programmable(space)?;
        let words = match space {
            Space::Register => self.state.register_words(),
            Space::Mtp => self.state.mtp_program_words(),
        };
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        let programmed = self.sequencer.program(transport, space, &words);
        if let Err(Error::Connection(reason)) = &programmed {
            self.last_error = Some(reason.clone());
        }
        programmed
    }

    /// Set MEMLOCK. The MTP can never be programmed again afterwards.
    pub fn lock_mtp(&mut self) -> Result<()> {
        self.check_programmable(Space::Mtp)?;
        log::warn!("Locking MTP, this is permanent");
        self.send(Command::LockMtp)
    }

    /// Guardrail before [`Session::program_mtp`]: MTP word 0x0C is not zero.
    pub fn mtp_lock_risk(&self) -> bool {
        self.state.mtp_lock_risk()
    }

    fn spec(&self, name: &str) -> Result<&FieldSpec> {
        self.fields
            .find(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// Current value of `name` in `space`; `None` for MTP-only fields in
    /// register space.
    pub fn field(&self, name: &str, space: Space) -> Result<Option<u8>> {
        let spec = self.spec(name)?;
        Ok(self.state.read_field(spec, space))
    }

    /// Edit `name` in the local copy of `space`.
    ///
    /// Returns `Ok(false)` without touching anything when the field has no
    /// address in `space`. MTP fields outside the loader range are
    /// read-only.
    pub fn set_field(&mut self, name: &str, space: Space, value: u32) -> Result<bool> {
        let spec = self.spec(name)?.clone();
        if space == Space::Mtp && !spec.is_mtp_programmable() {
            return Err(Error::ReadOnlyField(spec.name, space));
        }
        let written = self.state.write_field(&spec, space, value);
        if written {
            log::debug!("{} {} = {}", space, spec.name, value & u32::from(spec.mask()));
        }
        Ok(written)
    }

    /// [`Session::set_field`] from user-typed text; garbage counts as 0.
    pub fn set_field_text(&mut self, name: &str, space: Space, text: &str) -> Result<bool> {
        let value = field::parse_user_value(text, self.spec(name)?);
        self.set_field(name, space, u32::from(value))
    }

    pub fn copy_registers_to_mtp(&mut self) -> usize {
        self.state.copy_registers_to_mtp(&self.fields)
    }

    pub fn apply_sensing_mode(&mut self, mode: SensingMode) -> Result<()> {
        self.state.apply_sensing_mode(&self.fields, mode)
    }

    /// Decode one line and apply it.
    pub fn handle_line(&mut self, text: &str) -> Line {
        let line = protocol::decode(text);
        match &line {
            Line::Identify => {
                self.identified = true;
                log::info!("Firmware ID OK ({})", IDENTIFY_TOKEN);
            }
            Line::Measurement(m) => {
                self.last_measurement = Some(*m);
                log::info!("Measurement: OUT1={}, OUT2={}", m.out1, m.out2);
            }
            Line::AddressWords(pairs) => {
                let (regs, mtp) = self.state.apply_pairs(pairs);
                log::debug!("Updated {} register and {} MTP words", regs, mtp);
                for &(addr, _) in pairs {
                    match Space::of_address(addr) {
                        Space::Register if Space::Register.holds(addr) => self.received.0 += 1,
                        Space::Mtp if Space::Mtp.holds(addr) => self.received.1 += 1,
                        _ => {}
                    }
                }
            }
            Line::Unrecognized => log::debug!("Ignoring line {:?}", text),
        }
        line
    }

    /// Wait up to `timeout` for one transport event and apply it.
    pub fn poll(&mut self, timeout: Duration) -> Option<Incoming> {
        let event = self.transport.as_ref()?.recv_timeout(timeout)?;
        Some(self.handle_event(event))
    }

    /// Poll until `done` holds, the deadline passes or the link drops.
    pub fn wait_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&Session) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline || !self.is_connected() {
                return false;
            }
            self.poll(deadline - now);
        }
    }

    fn handle_event(&mut self, event: Event) -> Incoming {
        match event {
            Event::Line(text) => {
                let decoded = self.handle_line(&text);
                Incoming::Line { text, decoded }
            }
            Event::Disconnected(reason) => {
                self.last_error = Some(reason.clone());
                self.disconnect();
                Incoming::Disconnected(reason)
            }
            Event::WriteFailed(reason) => Incoming::WriteFailed(reason),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
