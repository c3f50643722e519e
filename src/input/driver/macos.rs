//! Apple termios driver
//!
//! Same raw-mode control as [`PosixDriver`]. TIOCGWINSZ is unreliable on
//! some Apple setups (it fails or reports 0x0 under Rosetta and in some
//! embedded terminals), so geometry falls back to asking `stty size` with a
//! bounded wait.

use std::fs::File;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::posix::PosixDriver;
use super::{Result, DEFAULT_HEIGHT, DEFAULT_WIDTH};

const STTY_TIMEOUT: Duration = Duration::from_millis(500);
const STTY_POLL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct MacOsDriver {
    tty: PosixDriver,
}

impl MacOsDriver {
    pub fn open() -> Result<Self> {
        Ok(Self {
            tty: PosixDriver::open()?,
        })
    }

    fn window_size(&self) -> Option<(u16, u16)> {
        self.tty.window_size().or_else(probe_stty_size)
    }

    pub fn width(&self) -> u16 {
        self.window_size().map_or(DEFAULT_WIDTH, |(_, cols)| cols)
    }

    pub fn height(&self) -> u16 {
        self.window_size().map_or(DEFAULT_HEIGHT, |(rows, _)| rows)
    }

    pub fn set_echo_enabled(&self, enabled: bool) {
        self.tty.set_echo_enabled(enabled);
    }

    pub fn set_interrupt_enabled(&self, enabled: bool) {
        self.tty.set_interrupt_enabled(enabled);
    }

    pub fn restore(&self) -> Result<()> {
        self.tty.restore()
    }

    pub fn read_char(&self) -> Option<char> {
        self.tty.read_char()
    }
}

/// Run `stty size` against /dev/tty, giving up after [`STTY_TIMEOUT`]
fn probe_stty_size() -> Option<(u16, u16)> {
    let tty = File::open("/dev/tty").ok()?;
    let mut child = Command::new("stty")
        .arg("size")
        .stdin(tty)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + STTY_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => break,
            Ok(None) if Instant::now() < deadline => thread::sleep(STTY_POLL),
            Ok(None) => {
                tracing::warn!("stty size timed out after {:?}", STTY_TIMEOUT);
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(Some(_)) | Err(_) => return None,
        }
    }

    let mut output = String::new();
    child.stdout.take()?.read_to_string(&mut output).ok()?;
    parse_stty_size(&output)
}

/// Parse `rows cols` as printed by `stty size`
fn parse_stty_size(output: &str) -> Option<(u16, u16)> {
    let mut fields = output.split_whitespace();
    let rows: u16 = fields.next()?.parse().ok()?;
    let cols: u16 = fields.next()?.parse().ok()?;
    (rows > 0 && cols > 0).then_some((rows, cols))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stty_size() {
        assert_eq!(parse_stty_size("50 132\n"), Some((50, 132)));
        assert_eq!(parse_stty_size("  24   80"), Some((24, 80)));
    }

    #[test]
    fn test_parse_stty_size_rejects_garbage() {
        assert_eq!(parse_stty_size(""), None);
        assert_eq!(parse_stty_size("0 0\n"), None);
        assert_eq!(parse_stty_size("stty: stdin isn't a terminal\n"), None);
        assert_eq!(parse_stty_size("24"), None);
    }
}
