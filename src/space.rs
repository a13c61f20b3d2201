//! Word-addressed memory spaces of the sensor.
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::addresses;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    /// Volatile customer registers, 0x20..=0x2E.
    Register,
    /// Non-volatile MTP words, 0x00..=0x1E.
    Mtp,
}

impl Space {
    /// Routing used for `<addr> <word>` dumps; the wire carries no space tag.
    pub fn of_address(addr: u16) -> Self {
        if addr >= addresses::REGISTER_BASE {
            Space::Register
        } else {
            Space::Mtp
        }
    }

    /// Word addresses shown for this space, in order.
    pub fn addresses(self) -> impl Iterator<Item = u16> {
        let (first, last) = match self {
            Space::Register => (addresses::REGISTER_BASE, addresses::REGISTER_LAST),
            Space::Mtp => (addresses::MTP_BASE, addresses::MTP_LAST),
        };
        (first..=last).step_by(2)
    }

    /// Whether `addr` is one of this space's word addresses.
    pub fn holds(self, addr: u16) -> bool {
        self.addresses().any(|a| a == addr)
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Space::Register => write!(f, "register space"),
            Space::Mtp => write!(f, "MTP space"),
        }
    }
}

/// Address to 16-bit word map. Unread addresses read as 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    kind: Space,
    words: BTreeMap<u16, u16>,
}

impl AddressSpace {
    pub fn new(kind: Space) -> Self {
        AddressSpace {
            kind,
            words: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> Space {
        self.kind
    }

    pub fn get(&self, addr: u16) -> u16 {
        self.words.get(&addr).copied().unwrap_or(0)
    }

    pub fn set(&mut self, addr: u16, word: u16) {
        self.words.insert(addr, word);
    }

    pub fn contains(&self, addr: u16) -> bool {
        self.words.contains_key(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_address_reads_zero() {
        let space = AddressSpace::new(Space::Register);
        assert_eq!(space.get(0x24), 0);
        assert!(!space.contains(0x24));
    }

    #[test]
    fn routing_threshold() {
        assert_eq!(Space::of_address(0x1F), Space::Mtp);
        assert_eq!(Space::of_address(0x00), Space::Mtp);
        assert_eq!(Space::of_address(0x20), Space::Register);
        assert_eq!(Space::of_address(0xADD), Space::Register);
    }

    #[test]
    fn canonical_addresses() {
        let regs: Vec<u16> = Space::Register.addresses().collect();
        assert_eq!(regs, vec![0x20, 0x22, 0x24, 0x26, 0x28, 0x2A, 0x2C, 0x2E]);
        assert_eq!(Space::Mtp.addresses().count(), 16);
        assert_eq!(Space::Mtp.addresses().last(), Some(0x1E));
        assert!(Space::Register.holds(0x2E));
        assert!(!Space::Register.holds(0x21));
        assert!(!Space::Register.holds(0x0ADD));
        assert!(!Space::Mtp.holds(0x20));
    }
}
