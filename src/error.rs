//! Library error type.
use crate::space::Space;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Open, read or write failure on the byte stream.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("not connected")]
    NotConnected,

    /// Programming a space before its contents were fetched from the device.
    #[error("{0} has not been read from the device yet")]
    NotRead(Space),

    #[error("loader needs exactly 8 words, got {0}")]
    WordCount(usize),

    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("field {0:?} is not writable in {1}")]
    ReadOnlyField(String, Space),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
