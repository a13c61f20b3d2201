//! The bridge's interactive memory loader (`W`/`E`).
//!
//! After the mode command the bridge prompts for each of 8 addresses in
//! turn, reads exactly 5 characters as a decimal value, then waits for
//! `y` (accept), `n` (retry) or `a` (abort). We never wait for the prompts;
//! fixed pauses between writes keep us behind the bridge's read loop.
use std::thread::sleep;
use std::time::Duration;

use crate::constants::{LOADER_ACCEPT, LOADER_FIELD_WIDTH, LOADER_WORDS};
use crate::error::{Error, Result};
use crate::protocol::Command;
use crate::space::Space;
use crate::transport::Transport;

/// Pauses between loader writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// After the mode command, while the bridge prints its first prompt.
    pub prompt: Duration,
    /// After each 5-character value.
    pub value: Duration,
    /// After each accept character.
    pub accept: Duration,
    /// Before the commit command.
    pub commit: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            prompt: Duration::from_millis(50),
            value: Duration::from_millis(10),
            accept: Duration::from_millis(20),
            commit: Duration::from_millis(50),
        }
    }
}

impl Pacing {
    /// No pauses at all, for loopback links and tests.
    pub const fn none() -> Self {
        Pacing {
            prompt: Duration::ZERO,
            value: Duration::ZERO,
            accept: Duration::ZERO,
            commit: Duration::ZERO,
        }
    }
}

/// Right-aligned, space padded, exactly 5 characters.
pub fn encode_word(word: u16) -> String {
    format!("{:>width$}", word, width = LOADER_FIELD_WIDTH)
}

pub const fn load_command(space: Space) -> Command {
    match space {
        Space::Register => Command::LoadRegisters,
        Space::Mtp => Command::LoadMtp,
    }
}

pub const fn commit_command(space: Space) -> Command {
    match space {
        Space::Register => Command::CommitRegisters,
        Space::Mtp => Command::CommitMtp,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    pacing: Pacing,
}

impl Sequencer {
    pub fn new(pacing: Pacing) -> Self {
        Sequencer { pacing }
    }

    /// Run the loader for `space`, accepting all 8 `words`.
    ///
    /// No trailing character is sent: the bridge leaves its accept loop on
    /// its own after the eighth word.
    pub fn load<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        space: Space,
        words: &[u16],
    ) -> Result<()> {
        if words.len() != LOADER_WORDS {
            return Err(Error::WordCount(words.len()));
        }

        transport.send_command(load_command(space))?;
        pause(self.pacing.prompt);

        for (i, &word) in words.iter().enumerate() {
            let field = encode_word(word);
            log::debug!("Loader {} word {}: {:?}", space, i, field);
            transport.send_raw(field.as_bytes())?;
            pause(self.pacing.value);
            transport.send_raw(&[LOADER_ACCEPT])?;
            pause(self.pacing.accept);
        }
        Ok(())
    }

    /// [`Sequencer::load`] followed by the space's commit command.
    pub fn program<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        space: Space,
        words: &[u16],
    ) -> Result<()> {
        self.load(transport, space, words)?;
        pause(self.pacing.commit);
        transport.send_command(commit_command(space))?;
        log::info!("Programmed {} ({} words)", space, words.len());
        Ok(())
    }
}

fn pause(d: Duration) {
    if !d.is_zero() {
        sleep(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Transport for Vec<u8> {
        fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
            self.extend_from_slice(raw);
            Ok(())
        }
    }

    #[test]
    fn word_fields_are_five_wide() {
        assert_eq!(encode_word(0), "    0");
        assert_eq!(encode_word(1234), " 1234");
        assert_eq!(encode_word(u16::MAX), "65535");
    }

    #[test]
    fn register_load_sequence() {
        let mut wire = Vec::new();
        Sequencer::new(Pacing::none())
            .load(&mut wire, Space::Register, &[1, 2, 3, 4, 5, 6, 7, 8])
            .unwrap();
        let expected = "W    1y    2y    3y    4y    5y    6y    7y    8y";
        assert_eq!(String::from_utf8(wire).unwrap(), expected);
    }

    #[test]
    fn program_mtp_appends_commit() {
        let mut wire = Vec::new();
        let words = [0x098D, 0, 65535, 0, 0, 0, 0, 10];
        Sequencer::new(Pacing::none())
            .program(&mut wire, Space::Mtp, &words)
            .unwrap();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("E 2445y    0y65535y"));
        assert!(text.ends_with("   10yP"));
        assert_eq!(text.len(), 1 + 8 * 6 + 1);
    }

    #[test]
    fn wrong_word_count_sends_nothing() {
        let mut wire = Vec::new();
        let err = Sequencer::default()
            .load(&mut wire, Space::Register, &[1, 2, 3])
            .unwrap_err();
        assert!(matches!(err, Error::WordCount(3)));
        assert!(wire.is_empty());
    }
}
