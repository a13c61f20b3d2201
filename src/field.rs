//! Named bit fields of the sensor's customer area, packed into 16-bit words.
//!
//! Every field lives inside one byte of a word and may exist at two
//! addresses: one in register space and one in MTP space. MTP-only fields
//! (lock bits, trim data, chip ids) have no register counterpart.
use std::collections::HashSet;

use anyhow::Result;
use bitfield::bitfield;
use serde::Deserialize;

use crate::constants::addresses;
use crate::space::{AddressSpace, Space};

bitfield! {
    /// A 16-bit sensor word viewed as its two bytes.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Word(u16);
    impl Debug;
    pub u8, lsb, set_lsb: 7, 0;
    pub u8, msb, set_msb: 15, 8;
}

impl Word {
    pub fn new(raw: u16) -> Self {
        Word(raw)
    }

    pub fn raw(&self) -> u16 {
        self.0
    }
}

/// Which half of the word holds a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum ByteSel {
    #[serde(rename = "LSB")]
    Low,
    #[serde(rename = "MSB")]
    High,
}

impl ByteSel {
    fn get(self, word: &Word) -> u8 {
        match self {
            ByteSel::Low => word.lsb(),
            ByteSel::High => word.msb(),
        }
    }

    fn set(self, word: &mut Word, value: u8) {
        match self {
            ByteSel::Low => word.set_lsb(value),
            ByteSel::High => word.set_msb(value),
        }
    }
}

impl ::std::fmt::Display for ByteSel {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        match self {
            ByteSel::Low => write!(f, "LSB"),
            ByteSel::High => write!(f, "MSB"),
        }
    }
}

/// One logical parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Absent for MTP-only fields.
    #[serde(default, deserialize_with = "parse_optional_address")]
    pub reg_addr: Option<u16>,
    #[serde(deserialize_with = "parse_address")]
    pub mtp_addr: u16,
    pub byte: ByteSel,
    pub bit_offset: u8,
    pub bit_width: u8,
}

impl ::std::fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        match self.reg_addr {
            Some(reg) => write!(f, "{}(REG 0x{:02X}, ", self.name, reg)?,
            None => write!(f, "{}(REG --, ", self.name)?,
        }
        write!(
            f,
            "MTP 0x{:02X}, {}[{}:{}])",
            self.mtp_addr,
            self.byte,
            self.bit_offset + self.bit_width - 1,
            self.bit_offset
        )
    }
}

impl FieldSpec {
    pub fn address(&self, space: Space) -> Option<u16> {
        match space {
            Space::Register => self.reg_addr,
            Space::Mtp => Some(self.mtp_addr),
        }
    }

    /// Value mask, right-aligned.
    pub const fn mask(&self) -> u8 {
        ((1u16 << self.bit_width) - 1) as u8
    }

    pub const fn max_value(&self) -> u8 {
        self.mask()
    }

    /// Whether the loader can write this field's MTP word.
    pub const fn is_mtp_programmable(&self) -> bool {
        self.mtp_addr <= addresses::MTP_PROGRAMMABLE_LAST
    }
}

/// Extract a field from `space`. `None` when the field has no address there.
pub fn read(space: &AddressSpace, spec: &FieldSpec) -> Option<u8> {
    let addr = spec.address(space.kind())?;
    let word = Word::new(space.get(addr));
    Some((spec.byte.get(&word) >> spec.bit_offset) & spec.mask())
}

/// Read-modify-write a field into `space`, leaving all other bits alone.
///
/// `value` is truncated to the field width, never rejected. Returns `false`
/// without touching `space` when the field has no address there.
pub fn write(space: &mut AddressSpace, spec: &FieldSpec, value: u32) -> bool {
    let Some(addr) = spec.address(space.kind()) else {
        return false;
    };
    let mask = spec.mask();
    let value = (value & u32::from(mask)) as u8;

    let mut word = Word::new(space.get(addr));
    let byte = spec.byte.get(&word);
    let byte = (byte & !(mask << spec.bit_offset)) | (value << spec.bit_offset);
    spec.byte.set(&mut word, byte);
    space.set(addr, word.raw());
    true
}

/// Parse a user-typed decimal value for `spec`.
///
/// Text that is not an integer counts as 0. The result is masked to the
/// field width, so negative input wraps the way the bridge firmware does.
pub fn parse_user_value(text: &str, spec: &FieldSpec) -> u8 {
    let value = text.trim().parse::<i128>().unwrap_or(0);
    (value & i128::from(spec.mask())) as u8
}

/// The customer-area field table.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMap {
    pub name: String,
    #[serde(default)]
    pub description: String,
    fields: Vec<FieldSpec>,
}

impl FieldMap {
    /// Load the built-in MLX90381 table.
    pub fn load() -> Result<Self> {
        Self::from_yaml(include_str!("../fields/mlx90381.yaml"))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let map: FieldMap = serde_yaml::from_str(raw)?;
        map.validate()?;
        log::debug!("Loaded field table {}: {} fields", map.name, map.fields.len());
        Ok(map)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn find(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for f in &self.fields {
            anyhow::ensure!(names.insert(f.name.as_str()), "duplicate field {}", f.name);
            anyhow::ensure!(
                (1..=8).contains(&f.bit_width)
                    && u16::from(f.bit_offset) + u16::from(f.bit_width) <= 8,
                "{}: bits {}+{} do not fit in one byte",
                f.name,
                f.bit_offset,
                f.bit_width
            );
            anyhow::ensure!(
                f.mtp_addr % 2 == 0 && f.mtp_addr <= addresses::MTP_LAST,
                "{}: bad MTP address 0x{:02X}",
                f.name,
                f.mtp_addr
            );
            if let Some(reg) = f.reg_addr {
                anyhow::ensure!(
                    reg % 2 == 0
                        && (addresses::REGISTER_BASE..=addresses::REGISTER_LAST).contains(&reg),
                    "{}: bad register address 0x{:02X}",
                    f.name,
                    reg
                );
            }
        }

        for (i, a) in self.fields.iter().enumerate() {
            for b in &self.fields[i + 1..] {
                if a.mtp_addr == b.mtp_addr
                    && a.byte == b.byte
                    && (a.mask() << a.bit_offset) & (b.mask() << b.bit_offset) != 0
                {
                    anyhow::bail!("{} overlaps {} in MTP 0x{:02X}", a.name, b.name, a.mtp_addr);
                }
            }
        }
        Ok(())
    }
}

fn parse_address_str(s: &str) -> std::result::Result<u16, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("error while parsing address {:?}: {}", s, e))
}

fn parse_address<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    parse_address_str(&s).map_err(serde::de::Error::custom)
}

fn parse_optional_address<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = serde::Deserialize::deserialize(deserializer)?;
    s.map(|s| parse_address_str(&s))
        .transpose()
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spaces() -> (AddressSpace, AddressSpace) {
        (AddressSpace::new(Space::Register), AddressSpace::new(Space::Mtp))
    }

    #[test]
    fn builtin_table_loads() {
        let map = FieldMap::load().unwrap();
        assert_eq!(map.len(), 20);
        let rg_x = map.find("RG_X").unwrap();
        assert_eq!(rg_x.reg_addr, Some(0x20));
        assert_eq!(rg_x.mtp_addr, 0x00);
        assert_eq!(rg_x.byte, ByteSel::Low);
        assert_eq!((rg_x.bit_offset, rg_x.bit_width), (0, 3));
        let tc2000 = map.find("TC2000_DATA").unwrap();
        assert_eq!(tc2000.reg_addr, None);
        assert_eq!(tc2000.mtp_addr, 0x14);
        assert_eq!(tc2000.byte, ByteSel::High);
        assert!(map.find("rg_x").is_none());
    }

    #[test]
    fn round_trip_every_field_and_value() {
        let map = FieldMap::load().unwrap();
        for spec in map.fields() {
            for kind in [Space::Register, Space::Mtp] {
                let Some(addr) = spec.address(kind) else {
                    continue;
                };
                for v in 0..=u32::from(spec.max_value()) {
                    let mut space = AddressSpace::new(kind);
                    space.set(addr, 0xA5C3);
                    assert!(write(&mut space, spec, v));
                    assert_eq!(read(&space, spec), Some(v as u8), "{} = {}", spec.name, v);

                    let field_bits = u16::from(spec.mask() << spec.bit_offset)
                        << if spec.byte == ByteSel::High { 8 } else { 0 };
                    assert_eq!(space.get(addr) & !field_bits, 0xA5C3 & !field_bits);
                }
            }
        }
    }

    #[test]
    fn packed_neighbours_are_independent() {
        let map = FieldMap::load().unwrap();
        let rg = map.find("RG_Y").unwrap();
        let fg = map.find("FG_Y").unwrap();
        let voq = map.find("VOQ_OUT2").unwrap();
        let (mut regs, _) = spaces();

        write(&mut regs, rg, 5);
        write(&mut regs, fg, 17);
        write(&mut regs, voq, 9);
        assert_eq!(regs.get(0x22), 0x098D);
        assert_eq!(read(&regs, rg), Some(5));
        assert_eq!(read(&regs, fg), Some(17));

        let (mut other, _) = spaces();
        write(&mut other, fg, 17);
        write(&mut other, rg, 5);
        write(&mut other, voq, 9);
        assert_eq!(other.get(0x22), regs.get(0x22));
    }

    #[test]
    fn wide_values_are_truncated() {
        let map = FieldMap::load().unwrap();
        let tc = map.find("TC").unwrap();
        let (mut regs, _) = spaces();
        assert!(write(&mut regs, tc, 0x3F));
        assert_eq!(read(&regs, tc), Some(0x1F));
        assert!(write(&mut regs, tc, 0x120));
        assert_eq!(read(&regs, tc), Some(0));
    }

    #[test]
    fn mtp_only_field_absent_in_register_space() {
        let map = FieldMap::load().unwrap();
        let dis_diag = map.find("DIS_DIAG").unwrap();
        let (mut regs, mut mtp) = spaces();
        mtp.set(0x0C, 0xFFFF);
        regs.set(0x2C, 0xFFFF);

        assert_eq!(read(&regs, dis_diag), None);
        assert_eq!(read(&mtp, dis_diag), Some(1));
        assert!(!write(&mut regs, dis_diag, 1));
        assert_eq!(regs.get(0x2C), 0xFFFF);
        assert!(!regs.contains(0x0C));
    }

    #[test]
    fn chip_id_uses_whole_byte() {
        let map = FieldMap::load().unwrap();
        let id = map.find("CHIP_ID2").unwrap();
        let (_, mut mtp) = spaces();
        mtp.set(0x1C, 0x12F7);
        assert_eq!(read(&mtp, id), Some(0xF7));
        assert!(!id.is_mtp_programmable());
        assert!(map.find("TC350_DATA").unwrap().is_mtp_programmable());
    }

    #[test]
    fn user_input_is_tolerant() {
        let map = FieldMap::load().unwrap();
        let tc = map.find("TC").unwrap();
        assert_eq!(parse_user_value(" 12 ", tc), 12);
        assert_eq!(parse_user_value("abc", tc), 0);
        assert_eq!(parse_user_value("", tc), 0);
        assert_eq!(parse_user_value("40", tc), 8);
        assert_eq!(parse_user_value("-1", tc), 31);
        // 2^64 + 1 still keeps its low bits
        assert_eq!(parse_user_value("18446744073709551617", tc), 1);
    }

    #[test]
    fn overlapping_table_is_rejected() {
        let raw = r#"
name: broken
fields:
  - name: A
    mtp_addr: "0x02"
    byte: LSB
    bit_offset: 0
    bit_width: 4
  - name: B
    mtp_addr: "0x02"
    byte: LSB
    bit_offset: 3
    bit_width: 2
"#;
        let err = FieldMap::from_yaml(raw).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn field_must_fit_in_byte() {
        let raw = r#"
name: broken
fields:
  - name: A
    reg_addr: "0x20"
    mtp_addr: "0x00"
    byte: MSB
    bit_offset: 6
    bit_width: 3
"#;
        assert!(FieldMap::from_yaml(raw).is_err());
    }

    #[test]
    fn huge_bit_offset_is_rejected() {
        let raw = r#"
name: broken
fields:
  - name: A
    reg_addr: "0x20"
    mtp_addr: "0x00"
    byte: LSB
    bit_offset: 255
    bit_width: 1
"#;
        assert!(FieldMap::from_yaml(raw).is_err());
    }
}
