//! Host-side mirror of the sensor's register and MTP words.
use std::fmt;
use std::str::FromStr;

use crate::constants::{addresses, LOADER_WORDS};
use crate::error::{Error, Result};
use crate::field::{self, FieldMap, FieldSpec};
use crate::space::{AddressSpace, Space};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Which spaces have been fetched from the device this connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadState {
    pub registers_read: bool,
    pub mtp_read: bool,
}

impl ReadState {
    pub fn is_read(&self, space: Space) -> bool {
        match space {
            Space::Register => self.registers_read,
            Space::Mtp => self.mtp_read,
        }
    }

    pub fn mark_read(&mut self, space: Space) {
        match space {
            Space::Register => self.registers_read = true,
            Space::Mtp => self.mtp_read = true,
        }
    }

    pub fn reset(&mut self) {
        *self = ReadState::default();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    registers: AddressSpace,
    mtp: AddressSpace,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub fn new() -> Self {
        DeviceState {
            registers: AddressSpace::new(Space::Register),
            mtp: AddressSpace::new(Space::Mtp),
        }
    }

    pub fn space(&self, kind: Space) -> &AddressSpace {
        match kind {
            Space::Register => &self.registers,
            Space::Mtp => &self.mtp,
        }
    }

    pub fn space_mut(&mut self, kind: Space) -> &mut AddressSpace {
        match kind {
            Space::Register => &mut self.registers,
            Space::Mtp => &mut self.mtp,
        }
    }

    pub fn registers(&self) -> &AddressSpace {
        &self.registers
    }

    pub fn mtp(&self) -> &AddressSpace {
        &self.mtp
    }

    /// Store dumped `(address, word)` pairs, routing each by address.
    /// Returns how many went to (register, MTP) space.
    pub fn apply_pairs(&mut self, pairs: &[(u16, u16)]) -> (usize, usize) {
        let mut counts = (0, 0);
        for &(addr, word) in pairs {
            let kind = Space::of_address(addr);
            self.space_mut(kind).set(addr, word);
            match kind {
                Space::Register => counts.0 += 1,
                Space::Mtp => counts.1 += 1,
            }
        }
        counts
    }

    pub fn read_field(&self, spec: &FieldSpec, kind: Space) -> Option<u8> {
        field::read(self.space(kind), spec)
    }

    pub fn write_field(&mut self, spec: &FieldSpec, kind: Space, value: u32) -> bool {
        field::write(self.space_mut(kind), spec, value)
    }

    /// Copy every field that has a register address and a programmable MTP
    /// address from register space into MTP space. Returns the field count.
    pub fn copy_registers_to_mtp(&mut self, fields: &FieldMap) -> usize {
        let mut copied = 0;
        for spec in fields.fields() {
            if !spec.is_mtp_programmable() {
                continue;
            }
            if let Some(value) = field::read(&self.registers, spec) {
                field::write(&mut self.mtp, spec, u32::from(value));
                copied += 1;
            }
        }
        log::info!("Copied REG to MTP ({} fields)", copied);
        copied
    }

    /// The 8 customer register words, 0x20..=0x2E.
    pub fn register_words(&self) -> [u16; LOADER_WORDS] {
        let mut words = [0; LOADER_WORDS];
        for (slot, addr) in words.iter_mut().zip(Space::Register.addresses()) {
            *slot = self.registers.get(addr);
        }
        words
    }

    /// The 8 loader-programmable MTP words, 0x00..=0x0E.
    pub fn mtp_program_words(&self) -> [u16; LOADER_WORDS] {
        let mut words = [0; LOADER_WORDS];
        for (slot, addr) in words.iter_mut().zip(Space::Mtp.addresses()) {
            *slot = self.mtp.get(addr);
        }
        words
    }

    /// MEMLOCK/DIS_DIAG guardrail: any bit set in MTP word 0x0C.
    pub fn mtp_lock_risk(&self) -> bool {
        self.mtp.get(addresses::MTP_LOCK_WORD) != 0
    }

    /// Set the OUT1/OUT2 axis routing fields in register space.
    pub fn apply_sensing_mode(&mut self, fields: &FieldMap, mode: SensingMode) -> Result<()> {
        let (ch1, ch2, platez) = mode.axes();
        for (name, value) in [("AXIS_CH1", ch1), ("AXIS_CH2", ch2), ("PLATEZ", platez)] {
            let spec = fields
                .find(name)
                .ok_or_else(|| Error::UnknownField(name.to_string()))?;
            field::write(&mut self.registers, spec, u32::from(value));
        }
        log::info!("Applied sensing mode preset: {}", mode);
        Ok(())
    }
}

/// OUT1/OUT2 axis assignment presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensingMode {
    XY,
    YX,
    XZ,
    ZX,
    YZ,
    ZY,
}

impl SensingMode {
    pub const ALL: [SensingMode; 6] = [
        SensingMode::XY,
        SensingMode::YX,
        SensingMode::XZ,
        SensingMode::ZX,
        SensingMode::YZ,
        SensingMode::ZY,
    ];

    /// (AXIS_CH1, AXIS_CH2, PLATEZ)
    pub const fn axes(self) -> (u8, u8, u8) {
        match self {
            SensingMode::XY => (0, 1, 0),
            SensingMode::YX => (1, 0, 0),
            SensingMode::XZ => (0, 2, 2),
            SensingMode::ZX => (2, 0, 2),
            SensingMode::YZ => (1, 2, 1),
            SensingMode::ZY => (2, 1, 1),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            SensingMode::XY => "X/Y",
            SensingMode::YX => "Y/X",
            SensingMode::XZ => "X/Z",
            SensingMode::ZX => "Z/X",
            SensingMode::YZ => "Y/Z",
            SensingMode::ZY => "Z/Y",
        }
    }
}

impl fmt::Display for SensingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mode", self.name())
    }
}

impl FromStr for SensingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted: String = s.chars().filter(|c| *c != '/').collect();
        SensingMode::ALL
            .into_iter()
            .find(|m| m.name().replace('/', "").eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| {
                format!(
                    "unknown sensing mode {:?}, expected one of X/Y, Y/X, X/Z, Z/X, Y/Z, Z/Y",
                    s
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FieldMap {
        FieldMap::load().unwrap()
    }

    #[test]
    fn pairs_are_routed_by_address() {
        let mut state = DeviceState::new();
        assert_eq!(state.apply_pairs(&[(0x20, 0x1234), (0x22, 0x00FF)]), (2, 0));
        assert_eq!(state.apply_pairs(&[(0x08, 0x00AA)]), (0, 1));
        assert_eq!(state.registers().get(0x20), 0x1234);
        assert_eq!(state.registers().get(0x22), 0x00FF);
        assert_eq!(state.mtp().get(0x08), 0x00AA);
        assert!(!state.registers().contains(0x08));
    }

    #[test]
    fn later_dump_overwrites() {
        let mut state = DeviceState::new();
        state.apply_pairs(&[(0x24, 1)]);
        state.apply_pairs(&[(0x24, 2)]);
        assert_eq!(state.registers().get(0x24), 2);
    }

    #[test]
    fn word_arrays_follow_address_order() {
        let mut state = DeviceState::new();
        state.apply_pairs(&[(0x2E, 8), (0x20, 1), (0x26, 4)]);
        state.apply_pairs(&[(0x00, 10), (0x0E, 17), (0x10, 99), (0x1E, 99)]);
        assert_eq!(state.register_words(), [1, 0, 0, 4, 0, 0, 0, 8]);
        assert_eq!(state.mtp_program_words(), [10, 0, 0, 0, 0, 0, 0, 17]);
    }

    #[test]
    fn copy_skips_mtp_only_and_trim_fields() {
        let fields = fields();
        let mut state = DeviceState::new();
        state.apply_pairs(&[(0x20, 0x0F8D), (0x26, 0x0025), (0x2A, 0x0013)]);
        state.apply_pairs(&[(0x0C, 0x0002), (0x14, 0xA000), (0x00, 0xF000)]);

        let copied = state.copy_registers_to_mtp(&fields);
        assert_eq!(copied, 13);
        // RG_X/FG_X/VOQ_OUT1 land in 0x00, bits 12..16 of the MTP word kept
        assert_eq!(state.mtp().get(0x00), 0xFF8D);
        assert_eq!(state.mtp().get(0x06), 0x0025);
        assert_eq!(state.mtp().get(0x0A), 0x0013);
        assert_eq!(state.mtp().get(0x0C), 0x0002);
        assert_eq!(state.mtp().get(0x14), 0xA000);
    }

    #[test]
    fn lock_guardrail() {
        let fields = fields();
        let mut state = DeviceState::new();
        assert!(!state.mtp_lock_risk());
        let memlock = fields.find("MEMLOCK").unwrap();
        assert!(state.write_field(memlock, Space::Mtp, 1));
        assert!(state.mtp_lock_risk());
        assert!(state.write_field(memlock, Space::Mtp, 0));
        assert!(!state.mtp_lock_risk());
    }

    #[test]
    fn sensing_mode_preset() {
        let fields = fields();
        let mut state = DeviceState::new();
        state.apply_pairs(&[(0x26, 0xFFC0)]);
        state.apply_sensing_mode(&fields, SensingMode::ZY).unwrap();
        let get = |n: &str| state.read_field(fields.find(n).unwrap(), Space::Register);
        assert_eq!(get("AXIS_CH1"), Some(2));
        assert_eq!(get("AXIS_CH2"), Some(1));
        assert_eq!(get("PLATEZ"), Some(1));
        assert_eq!(state.registers().get(0x26), 0xFFD6);
    }

    #[test]
    fn sensing_mode_names() {
        assert_eq!("X/Z".parse::<SensingMode>(), Ok(SensingMode::XZ));
        assert_eq!("zy".parse::<SensingMode>(), Ok(SensingMode::ZY));
        assert!("X/X".parse::<SensingMode>().is_err());
        assert_eq!(SensingMode::YX.to_string(), "Y/X mode");
    }

    #[test]
    fn read_state_resets_together() {
        let mut read = ReadState::default();
        read.mark_read(Space::Register);
        read.mark_read(Space::Mtp);
        assert!(read.is_read(Space::Register) && read.is_read(Space::Mtp));
        read.reset();
        assert_eq!(read, ReadState::default());
    }
}
