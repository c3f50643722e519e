//! termios driver for POSIX ttys

use std::io;
use std::sync::{Mutex, PoisonError};

use rustix::io::Errno;
use rustix::termios::{
    self, ControlModes, InputModes, LocalModes, OptionalActions, SpecialCodeIndex, Termios,
};

use super::{DriverError, Result, DEFAULT_HEIGHT, DEFAULT_WIDTH};

/// Raw-mode control of the tty on stdin
#[derive(Debug)]
pub struct PosixDriver {
    stdin: io::Stdin,
    /// Attributes before we touched anything
    original: Termios,
    /// Re-fetched before each toggle; the lock serializes get/modify/set
    working: Mutex<Termios>,
}

/// Flags for byte-at-a-time input with the terminal driving nothing else
fn make_raw(t: &mut Termios) {
    t.input_modes.remove(
        InputModes::IXON
            | InputModes::IXOFF
            | InputModes::BRKINT
            | InputModes::INPCK
            | InputModes::PARMRK
            | InputModes::ISTRIP,
    );
    t.input_modes.insert(InputModes::IGNBRK);

    t.local_modes.remove(LocalModes::ICANON);
    t.local_modes.insert(LocalModes::ECHOCTL);

    t.control_modes.remove(ControlModes::CSIZE | ControlModes::PARENB);
    t.control_modes.insert(ControlModes::CS8 | ControlModes::CREAD);

    // read() returns as soon as one byte is available
    t.special_codes[SpecialCodeIndex::VMIN] = 1;
    t.special_codes[SpecialCodeIndex::VTIME] = 0;
}

impl PosixDriver {
    pub fn open() -> Result<Self> {
        let stdin = io::stdin();
        if !termios::isatty(&stdin) {
            return Err(DriverError::NotATerminal);
        }

        let original = termios::tcgetattr(&stdin).map_err(|e| DriverError::Attributes(e.into()))?;
        let mut working = original.clone();
        make_raw(&mut working);

        termios::tcsetattr(&stdin, OptionalActions::Now, &working)
            .map_err(|e| DriverError::Attributes(e.into()))?;

        Ok(Self {
            stdin,
            original,
            working: Mutex::new(working),
        })
    }

    /// (rows, columns) from the kernel, if it knows them
    pub(super) fn window_size(&self) -> Option<(u16, u16)> {
        match termios::tcgetwinsize(&self.stdin) {
            Ok(size) if size.ws_row > 0 && size.ws_col > 0 => Some((size.ws_row, size.ws_col)),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("TIOCGWINSZ failed: {}", e);
                None
            }
        }
    }

    pub fn width(&self) -> u16 {
        self.window_size().map_or(DEFAULT_WIDTH, |(_, cols)| cols)
    }

    pub fn height(&self) -> u16 {
        self.window_size().map_or(DEFAULT_HEIGHT, |(rows, _)| rows)
    }

    fn set_local_flag(&self, flag: LocalModes, enabled: bool) {
        let mut working = self.working.lock().unwrap_or_else(PoisonError::into_inner);

        // Someone else may have changed the terminal since we last looked
        *working = match termios::tcgetattr(&self.stdin) {
            Ok(current) => current,
            Err(e) => {
                tracing::error!("Failed to get terminal info: {}", e);
                return;
            }
        };

        working.local_modes.set(flag, enabled);

        if let Err(e) = termios::tcsetattr(&self.stdin, OptionalActions::Now, &working) {
            tracing::error!("Can not set terminal flags {:?}: {}", flag, e);
        }
    }

    pub fn set_echo_enabled(&self, enabled: bool) {
        self.set_local_flag(LocalModes::ECHO, enabled);
    }

    pub fn set_interrupt_enabled(&self, enabled: bool) {
        self.set_local_flag(LocalModes::ISIG, enabled);
    }

    pub fn restore(&self) -> Result<()> {
        termios::tcsetattr(&self.stdin, OptionalActions::Now, &self.original)
            .map_err(|e| DriverError::Restore(e.into()))
    }

    /// Blocking single-byte read. Bytes map to chars one-to-one.
    pub fn read_char(&self) -> Option<char> {
        let mut buf = [0u8; 1];
        loop {
            match rustix::io::read(&self.stdin, &mut buf[..]) {
                Ok(0) => return None,
                Ok(_) => return Some(char::from(buf[0])),
                Err(e) if e == Errno::INTR => continue,
                Err(e) => {
                    tracing::debug!("Terminal read failed: {}", e);
                    return None;
                }
            }
        }
    }
}
