/// Line the bridge prints in response to `I`.
pub const IDENTIFY_TOKEN: &str = "90381";

pub const DEFAULT_BAUDRATE: u32 = 115200;

/// Words sent per loader (`W`/`E`) session.
pub const LOADER_WORDS: usize = 8;
/// Width of one loader value field, the bridge reads exactly this many chars.
pub const LOADER_FIELD_WIDTH: usize = 5;
pub const LOADER_ACCEPT: u8 = b'y';

pub mod commands {
    pub const IDENTIFY: u8 = b'I';
    pub const READ_REGISTERS: u8 = b'C';
    pub const READ_MTP: u8 = b'R';
    pub const MEASURE: u8 = b'M';
    pub const LOAD_REGISTERS: u8 = b'W';
    pub const LOAD_MTP: u8 = b'E';
    pub const COMMIT_REGISTERS: u8 = b'S';
    pub const COMMIT_MTP: u8 = b'P';
    pub const LOCK_MTP: u8 = b'L';
    pub const ACKNOWLEDGE: u8 = b'A';
}

pub mod addresses {
    /// Any decoded address at or above this belongs to register space.
    pub const REGISTER_BASE: u16 = 0x20;
    pub const REGISTER_LAST: u16 = 0x2E;
    pub const MTP_BASE: u16 = 0x00;
    pub const MTP_LAST: u16 = 0x1E;
    /// Last MTP word the loader can program, the rest are trim and ID words.
    pub const MTP_PROGRAMMABLE_LAST: u16 = 0x0E;
    /// MTP word holding MEMLOCK and DIS_DIAG.
    pub const MTP_LOCK_WORD: u16 = 0x0C;
}
