//! Terminal selection and the public input API
//!
//! [`Terminal::open`] picks a raw-mode driver for the platform, starts the
//! reader thread, and falls back to line-buffered input when no driver can
//! take the terminal.

use std::env;
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::driver::{DriverError, RawModeDriver};
use super::line_buffered::LineBufferedTerminal;
use super::multiplexer::{spawn_reader, InputMultiplexer};
use crate::config::Config;
use crate::output::{console_writer, ConsoleTarget};

/// Which input driver to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TerminalType {
    /// Pick from the platform and environment
    #[default]
    Auto,
    Unix,
    MacOs,
    Windows,
    /// Line-buffered input only
    None,
}

impl fmt::Display for TerminalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminalType::Auto => "AUTO",
            TerminalType::Unix => "UNIX",
            TerminalType::MacOs => "MACOS",
            TerminalType::Windows => "WINDOWS",
            TerminalType::None => "NONE",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown terminal type {0:?}, expected AUTO, UNIX, MACOS, WINDOWS or NONE")]
pub struct UnknownTerminalType(pub String);

impl FromStr for TerminalType {
    type Err = UnknownTerminalType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(TerminalType::Auto),
            "UNIX" => Ok(TerminalType::Unix),
            "MACOS" => Ok(TerminalType::MacOs),
            "WINDOWS" => Ok(TerminalType::Windows),
            "NONE" => Ok(TerminalType::None),
            _ => Err(UnknownTerminalType(s.to_string())),
        }
    }
}

/// Operating system family, as far as driver selection cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    MacOs,
    Windows,
    OtherUnix,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            HostOs::MacOs
        } else if cfg!(windows) {
            HostOs::Windows
        } else {
            HostOs::OtherUnix
        }
    }
}

/// Resolve [`TerminalType::Auto`] for `os`
///
/// On Windows the POSIX driver wins under Cygwin (`PWD` is a unix path),
/// MSYS/MinGW (`MSYSTEM`), and ConEmu (`ConEmuPID`).
pub fn detect<F>(os: HostOs, env: F) -> TerminalType
where
    F: Fn(&str) -> Option<String>,
{
    match os {
        HostOs::MacOs => TerminalType::MacOs,
        HostOs::OtherUnix => TerminalType::Unix,
        HostOs::Windows => {
            let cygwin = env("PWD").is_some_and(|pwd| pwd.starts_with('/'));
            let msys = env("MSYSTEM").is_some_and(|m| m.starts_with("MINGW") || m == "MSYS");
            let conemu = env("ConEmuPID").is_some();

            if cygwin || msys || conemu {
                TerminalType::Unix
            } else {
                TerminalType::Windows
            }
        }
    }
}

enum Backend {
    Raw {
        driver: Arc<RawModeDriver>,
        mux: Arc<InputMultiplexer>,
    },
    LineBuffered(LineBufferedTerminal),
}

/// Keyboard input from the controlling terminal
///
/// All methods take `&self`; share the terminal between threads to have
/// several readers at once.
pub struct Terminal {
    backend: Backend,
    kind: TerminalType,
    echo: AtomicBool,
    interrupt: AtomicBool,
    shut_down: AtomicBool,
}

impl Terminal {
    /// Open the terminal selected by `config`
    ///
    /// Never fails: when the driver cannot be set up, input degrades to
    /// whole lines.
    pub fn open(config: &Config) -> Self {
        let kind = match config.terminal_type {
            TerminalType::Auto => detect(HostOs::current(), |key| env::var(key).ok()),
            other => other,
        };

        match Self::open_raw(kind, config) {
            Ok(Some(terminal)) => {
                tracing::debug!(
                    "Created terminal: {} ({}w x {}h)",
                    kind,
                    terminal.width(),
                    terminal.height()
                );
                terminal
            }
            Ok(None) => {
                tracing::debug!("Terminal is UNSUPPORTED. Only line input available.");
                Self::line_buffered(config)
            }
            Err(e @ (DriverError::NotATerminal | DriverError::Unavailable(_))) => {
                tracing::debug!("Terminal is UNSUPPORTED ({}). Only line input available.", e);
                Self::line_buffered(config)
            }
            Err(e) => {
                tracing::error!("Failed to construct terminal, falling back to unsupported: {}", e);
                Self::line_buffered(config)
            }
        }
    }

    fn open_raw(kind: TerminalType, config: &Config) -> Result<Option<Self>, DriverError> {
        let driver = match kind {
            TerminalType::Unix => RawModeDriver::posix()?,
            TerminalType::MacOs => RawModeDriver::macos()?,
            TerminalType::Windows => RawModeDriver::windows()?,
            TerminalType::None | TerminalType::Auto => return Ok(None),
        };
        let driver = Arc::new(driver);

        let redraw = config
            .enable_ansi
            .then(|| console_writer(ConsoleTarget::Stdout, config));
        let mux = Arc::new(InputMultiplexer::new(config.enable_backspace, redraw));

        if let Err(e) = spawn_reader(Arc::clone(&driver), Arc::clone(&mux)) {
            if let Err(restore) = driver.restore() {
                tracing::warn!("{}", restore);
            }
            return Err(DriverError::Spawn(e));
        }

        let terminal = Self::with_backend(Backend::Raw { driver, mux }, kind);
        terminal.set_echo_enabled(config.enable_echo);
        terminal.set_interrupt_enabled(config.enable_interrupt);
        Ok(Some(terminal))
    }

    fn line_buffered(config: &Config) -> Self {
        let lines = LineBufferedTerminal::stdin().unwrap_or_else(|e| {
            tracing::error!("Failed to start line reader: {}", e);
            let lines = LineBufferedTerminal::detached();
            lines.close();
            lines
        });

        let terminal = Self::with_backend(Backend::LineBuffered(lines), TerminalType::None);
        terminal.echo.store(config.enable_echo, Ordering::SeqCst);
        terminal.interrupt.store(config.enable_interrupt, Ordering::SeqCst);
        terminal
    }

    fn with_backend(backend: Backend, kind: TerminalType) -> Self {
        Self {
            backend,
            kind,
            echo: AtomicBool::new(true),
            interrupt: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Driver in use; [`TerminalType::None`] for line-buffered input
    pub fn kind(&self) -> TerminalType {
        self.kind
    }

    /// Whether single keystrokes are delivered without Enter
    pub fn is_raw(&self) -> bool {
        matches!(self.backend, Backend::Raw { .. })
    }

    /// Block for the next character. `None` after [`close`](Self::close) or
    /// end of input.
    pub fn read(&self) -> Option<char> {
        match &self.backend {
            Backend::Raw { mux, .. } => mux.read(),
            Backend::LineBuffered(lines) => lines.read(),
        }
    }

    /// Block for the next line, without the line terminator
    pub fn read_line(&self) -> Vec<char> {
        match &self.backend {
            Backend::Raw { mux, .. } => mux.read_line(),
            Backend::LineBuffered(lines) => lines.read_line(),
        }
    }

    pub fn read_line_string(&self) -> String {
        self.read_line().into_iter().collect()
    }

    /// Read a line with echo off, then put echo back the way it was
    pub fn read_password(&self) -> Vec<char> {
        let echo = self.is_echo_enabled();
        self.set_echo_enabled(false);
        let line = self.read_line();
        self.set_echo_enabled(echo);
        line
    }

    pub fn width(&self) -> u16 {
        match &self.backend {
            Backend::Raw { driver, .. } => driver.width(),
            Backend::LineBuffered(lines) => lines.width(),
        }
    }

    pub fn height(&self) -> u16 {
        match &self.backend {
            Backend::Raw { driver, .. } => driver.height(),
            Backend::LineBuffered(lines) => lines.height(),
        }
    }

    pub fn set_echo_enabled(&self, enabled: bool) {
        self.echo.store(enabled, Ordering::SeqCst);
        if let Backend::Raw { driver, .. } = &self.backend {
            driver.set_echo_enabled(enabled);
        }
    }

    pub fn is_echo_enabled(&self) -> bool {
        self.echo.load(Ordering::SeqCst)
    }

    pub fn set_interrupt_enabled(&self, enabled: bool) {
        self.interrupt.store(enabled, Ordering::SeqCst);
        if let Backend::Raw { driver, .. } = &self.backend {
            driver.set_interrupt_enabled(enabled);
        }
    }

    pub fn is_interrupt_enabled(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Put the terminal attributes back to what they were before `open`
    pub fn restore(&self) -> Result<(), DriverError> {
        match &self.backend {
            Backend::Raw { driver, .. } => driver.restore(),
            Backend::LineBuffered(_) => Ok(()),
        }
    }

    /// Release every blocked reader with no data
    pub fn close(&self) {
        match &self.backend {
            Backend::Raw { mux, .. } => mux.close(),
            Backend::LineBuffered(lines) => lines.close(),
        }
    }

    /// Close, then restore the terminal. Only the first call does anything.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.close();
        if let Err(e) = self.restore() {
            tracing::error!("{}", e);
        }
    }

    /// `io::Read` over [`read`](Self::read)
    ///
    /// Bytes from a termios driver come through as they were typed; characters
    /// from the Windows console or the line reader are UTF-8 encoded.
    pub fn reader(&self) -> TerminalReader<'_> {
        let raw_bytes = match &self.backend {
            Backend::Raw { driver, .. } => driver.delivers_bytes(),
            Backend::LineBuffered(_) => false,
        };
        TerminalReader {
            terminal: self,
            raw_bytes,
            pending: [0; 4],
            start: 0,
            end: 0,
        }
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("kind", &self.kind)
            .field("raw", &self.is_raw())
            .field("echo", &self.is_echo_enabled())
            .field("interrupt", &self.is_interrupt_enabled())
            .finish()
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Byte stream of typed characters; see [`Terminal::reader`]
#[derive(Debug)]
pub struct TerminalReader<'a> {
    terminal: &'a Terminal,
    /// Characters up to U+00FF are single input bytes
    raw_bytes: bool,
    /// Unread bytes of the last character
    pending: [u8; 4],
    start: usize,
    end: usize,
}

impl Read for TerminalReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.start == self.end {
            let Some(ch) = self.terminal.read() else {
                return Ok(0);
            };
            self.start = 0;
            self.end = match u8::try_from(u32::from(ch)) {
                Ok(byte) if self.raw_bytes => {
                    self.pending[0] = byte;
                    1
                }
                _ => ch.encode_utf8(&mut self.pending).len(),
            };
        }

        let n = buf.len().min(self.end - self.start);
        buf[..n].copy_from_slice(&self.pending[self.start..self.start + n]);
        self.start += n;
        Ok(n)
    }
}
