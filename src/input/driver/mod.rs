//! Raw-mode terminal drivers
//!
//! A driver puts the controlling terminal into unbuffered mode, toggles echo
//! and interrupt handling, reports geometry, and reads one character at a
//! time. The variant is picked once at startup; see [`crate::input::Terminal`].

#[cfg(unix)]
mod macos;
#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod win32;

use std::io;

use thiserror::Error;

#[cfg(unix)]
pub use macos::MacOsDriver;
#[cfg(unix)]
pub use posix::PosixDriver;
#[cfg(windows)]
pub use win32::WindowsDriver;

/// Geometry reported when the terminal cannot be queried
pub const DEFAULT_WIDTH: u16 = 80;
pub const DEFAULT_HEIGHT: u16 = 24;

/// Driver errors
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Unable to initialize the input console: not a terminal")]
    NotATerminal,

    #[error("{0} driver is not available on this platform")]
    Unavailable(&'static str),

    #[error("Failed to read or apply terminal attributes: {0}")]
    Attributes(#[source] io::Error),

    #[error("Failed to get console handle: {0}")]
    Handle(#[source] io::Error),

    #[error("Failed to start input reader thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to restore terminal attributes: {0}")]
    Restore(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Blocking source of input characters
pub trait InputSource: Send + Sync {
    /// Next character, or `None` once the input is closed
    fn read_char(&self) -> Option<char>;
}

/// The platform driver in use
#[derive(Debug)]
pub enum RawModeDriver {
    #[cfg(unix)]
    Posix(PosixDriver),
    #[cfg(unix)]
    MacOs(MacOsDriver),
    #[cfg(windows)]
    Windows(WindowsDriver),
}

impl RawModeDriver {
    /// POSIX termios driver on stdin
    pub fn posix() -> Result<Self> {
        #[cfg(unix)]
        {
            PosixDriver::open().map(RawModeDriver::Posix)
        }

        #[cfg(not(unix))]
        {
            Err(DriverError::Unavailable("POSIX"))
        }
    }

    /// termios driver with the Apple geometry probe
    pub fn macos() -> Result<Self> {
        #[cfg(unix)]
        {
            MacOsDriver::open().map(RawModeDriver::MacOs)
        }

        #[cfg(not(unix))]
        {
            Err(DriverError::Unavailable("macOS"))
        }
    }

    /// Windows console input driver
    pub fn windows() -> Result<Self> {
        #[cfg(windows)]
        {
            WindowsDriver::open().map(RawModeDriver::Windows)
        }

        #[cfg(not(windows))]
        {
            Err(DriverError::Unavailable("Windows"))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            #[cfg(unix)]
            RawModeDriver::Posix(_) => "PosixDriver",
            #[cfg(unix)]
            RawModeDriver::MacOs(_) => "MacOsDriver",
            #[cfg(windows)]
            RawModeDriver::Windows(_) => "WindowsDriver",
        }
    }

    /// Columns; falls back to [`DEFAULT_WIDTH`]
    pub fn width(&self) -> u16 {
        match self {
            #[cfg(unix)]
            RawModeDriver::Posix(d) => d.width(),
            #[cfg(unix)]
            RawModeDriver::MacOs(d) => d.width(),
            #[cfg(windows)]
            RawModeDriver::Windows(d) => d.width(),
        }
    }

    /// Rows; falls back to [`DEFAULT_HEIGHT`]
    pub fn height(&self) -> u16 {
        match self {
            #[cfg(unix)]
            RawModeDriver::Posix(d) => d.height(),
            #[cfg(unix)]
            RawModeDriver::MacOs(d) => d.height(),
            #[cfg(windows)]
            RawModeDriver::Windows(d) => d.height(),
        }
    }

    /// Toggle echo. Failures are logged and leave the terminal unchanged.
    pub fn set_echo_enabled(&self, enabled: bool) {
        match self {
            #[cfg(unix)]
            RawModeDriver::Posix(d) => d.set_echo_enabled(enabled),
            #[cfg(unix)]
            RawModeDriver::MacOs(d) => d.set_echo_enabled(enabled),
            #[cfg(windows)]
            RawModeDriver::Windows(d) => d.set_echo_enabled(enabled),
        }
    }

    /// Toggle Ctrl-C handling. Failures are logged and leave the terminal unchanged.
    pub fn set_interrupt_enabled(&self, enabled: bool) {
        match self {
            #[cfg(unix)]
            RawModeDriver::Posix(d) => d.set_interrupt_enabled(enabled),
            #[cfg(unix)]
            RawModeDriver::MacOs(d) => d.set_interrupt_enabled(enabled),
            #[cfg(windows)]
            RawModeDriver::Windows(d) => d.set_interrupt_enabled(enabled),
        }
    }

    /// Whether each character stands for one raw input byte
    ///
    /// The termios drivers read bytes and widen them to `char` unchanged; the
    /// console driver reads real UTF-16 characters.
    pub fn delivers_bytes(&self) -> bool {
        match self {
            #[cfg(unix)]
            RawModeDriver::Posix(_) | RawModeDriver::MacOs(_) => true,
            #[cfg(windows)]
            RawModeDriver::Windows(_) => false,
        }
    }

    /// Reapply the attributes captured at construction
    pub fn restore(&self) -> Result<()> {
        match self {
            #[cfg(unix)]
            RawModeDriver::Posix(d) => d.restore(),
            #[cfg(unix)]
            RawModeDriver::MacOs(d) => d.restore(),
            #[cfg(windows)]
            RawModeDriver::Windows(d) => d.restore(),
        }
    }
}

impl InputSource for RawModeDriver {
    fn read_char(&self) -> Option<char> {
        match self {
            #[cfg(unix)]
            RawModeDriver::Posix(d) => d.read_char(),
            #[cfg(unix)]
            RawModeDriver::MacOs(d) => d.read_char(),
            #[cfg(windows)]
            RawModeDriver::Windows(d) => d.read_char(),
        }
    }
}

/// Character for one key event, if it produces one
///
/// Key-up events, NUL and LF are dropped, CR becomes LF. Lone surrogate
/// halves have no char form and are dropped too.
#[cfg_attr(not(windows), allow(dead_code))]
fn translate_key(key_down: bool, unit: u16) -> Option<char> {
    if !key_down {
        return None;
    }
    match unit {
        0 | 0x0A => None,
        0x0D => Some('\n'),
        _ => char::from_u32(u32::from(unit)),
    }
}
