//! Host side of the MLX90381 UART bridge protocol.

pub mod config;
pub mod constants;
pub mod error;
pub mod field;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod space;
pub mod state;
pub mod transport;

pub use self::config::Config;
pub use self::error::{Error, Result};
pub use self::field::{FieldMap, FieldSpec};
pub use self::protocol::{Command, Line, Measurement};
pub use self::sequencer::{Pacing, Sequencer};
pub use self::session::{Incoming, Session};
pub use self::space::{AddressSpace, Space};
pub use self::state::{DeviceState, SensingMode};
pub use self::transport::{LineTransport, Transport};
