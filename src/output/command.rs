//! Decoded ANSI commands and the sink that consumes them.
//!
//! The parser turns bytes into [`AnsiCommand`] values and hands each one to a
//! [`CommandSink`]. A sink decides what a command means for its target:
//! [`Passthrough`] swallows everything (ANSI stripping), the native console
//! sink replays commands through the Windows console API, and the HTML sink
//! renders colors as markup.

use std::io::{self, Write};
use thiserror::Error;

/// SGR attribute codes that sinks care about.
pub mod sgr {
    pub const RESET: u32 = 0;
    pub const BOLD: u32 = 1;
    pub const UNDERLINE: u32 = 4;
    pub const NEGATIVE_ON: u32 = 7;
    pub const CONCEAL_ON: u32 = 8;
    pub const NORMAL: u32 = 22;
    pub const UNDERLINE_OFF: u32 = 24;
    pub const NEGATIVE_OFF: u32 = 27;
    pub const DEFAULT_FOREGROUND: u32 = 39;
    pub const DEFAULT_BACKGROUND: u32 = 49;
}

/// Direction of a cursor or scroll movement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Right,
    Left,
}

/// Region selector for erase-screen and erase-line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseMode {
    /// From the cursor to the end (code 0, the default)
    ToEnd,
    /// From the start up to and including the cursor (code 1)
    ToBeginning,
    /// Everything (code 2)
    All,
    /// Any other code, e.g. 3 (scrollback) on xterm
    Other(u32),
}

impl From<u32> for EraseMode {
    fn from(code: u32) -> Self {
        match code {
            0 => EraseMode::ToEnd,
            1 => EraseMode::ToBeginning,
            2 => EraseMode::All,
            other => EraseMode::Other(other),
        }
    }
}

/// One argument of a CSI sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Omitted argument (`;;`)
    Empty,
    Int(u32),
    /// Quoted string argument, quotes removed
    Str(String),
    /// Literal `?` or `=` marker
    Marker(char),
}

/// A decoded escape sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnsiCommand {
    /// CSI n A/B/C/D
    CursorMove(Direction, u32),
    /// CSI n E/F: column 1 of the line n down (`Down`) or up (`Up`)
    CursorLine(Direction, u32),
    /// CSI n G, 1-based
    CursorToColumn(u32),
    /// CSI row;col H (or f), 1-based
    CursorTo(u32, u32),
    EraseScreen(EraseMode),
    EraseLine(EraseMode),
    /// CSI n S (`Up`) / CSI n T (`Down`)
    Scroll(Direction, u32),
    SaveCursor,
    RestoreCursor,
    /// Any SGR code not covered by the color and reset variants
    SetAttribute(u32),
    SetForeground(u8),
    SetBackground(u8),
    DefaultForeground,
    DefaultBackground,
    AttributeReset,
    /// A CSI sequence with an unknown `[a-zA-Z]` final byte
    UnknownExtension(char, Vec<Arg>),
    /// ESC ] code ; params (BEL | ESC \)
    OperatingSystemCommand(u32, String),
}

/// Failure reported by a sink for one command
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink cannot perform this command; the raw sequence is passed on
    #[error("command not supported by this sink")]
    Unsupported,

    #[error("sink I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub type SinkResult = std::result::Result<(), SinkError>;

/// Receives decoded commands and ordinary text from an [`AnsiWriter`].
///
/// Every method has a consuming no-op default, so a sink only overrides what
/// it can act on. `out` is the stream the writer wraps; sinks that call
/// native APIs flush it first so earlier text lands before the command.
///
/// [`AnsiWriter`]: super::AnsiWriter
pub trait CommandSink {
    /// Bytes that are not part of any escape sequence.
    fn write_text(&mut self, out: &mut dyn Write, text: &[u8]) -> io::Result<()> {
        out.write_all(text)
    }

    fn cursor_move(&mut self, _out: &mut dyn Write, _dir: Direction, _count: u32) -> SinkResult {
        Ok(())
    }

    fn cursor_line(&mut self, _out: &mut dyn Write, _dir: Direction, _count: u32) -> SinkResult {
        Ok(())
    }

    fn cursor_to_column(&mut self, _out: &mut dyn Write, _col: u32) -> SinkResult {
        Ok(())
    }

    fn cursor_to(&mut self, _out: &mut dyn Write, _row: u32, _col: u32) -> SinkResult {
        Ok(())
    }

    fn erase_screen(&mut self, _out: &mut dyn Write, _mode: EraseMode) -> SinkResult {
        Ok(())
    }

    fn erase_line(&mut self, _out: &mut dyn Write, _mode: EraseMode) -> SinkResult {
        Ok(())
    }

    fn scroll(&mut self, _out: &mut dyn Write, _dir: Direction, _count: u32) -> SinkResult {
        Ok(())
    }

    fn save_cursor(&mut self, _out: &mut dyn Write) -> SinkResult {
        Ok(())
    }

    fn restore_cursor(&mut self, _out: &mut dyn Write) -> SinkResult {
        Ok(())
    }

    fn set_attribute(&mut self, _out: &mut dyn Write, _code: u32) -> SinkResult {
        Ok(())
    }

    fn set_foreground(&mut self, _out: &mut dyn Write, _color: u8) -> SinkResult {
        Ok(())
    }

    fn set_background(&mut self, _out: &mut dyn Write, _color: u8) -> SinkResult {
        Ok(())
    }

    fn default_foreground(&mut self, _out: &mut dyn Write) -> SinkResult {
        Ok(())
    }

    fn default_background(&mut self, _out: &mut dyn Write) -> SinkResult {
        Ok(())
    }

    fn attribute_reset(&mut self, _out: &mut dyn Write) -> SinkResult {
        Ok(())
    }

    fn unknown_extension(&mut self, _out: &mut dyn Write, _letter: char, _args: &[Arg]) -> SinkResult {
        Ok(())
    }

    fn operating_system_command(&mut self, _out: &mut dyn Write, _code: u32, _params: &str) -> SinkResult {
        Ok(())
    }

    /// Route one command to its method.
    fn dispatch(&mut self, out: &mut dyn Write, command: &AnsiCommand) -> SinkResult {
        match command {
            AnsiCommand::CursorMove(dir, n) => self.cursor_move(out, *dir, *n),
            AnsiCommand::CursorLine(dir, n) => self.cursor_line(out, *dir, *n),
            AnsiCommand::CursorToColumn(col) => self.cursor_to_column(out, *col),
            AnsiCommand::CursorTo(row, col) => self.cursor_to(out, *row, *col),
            AnsiCommand::EraseScreen(mode) => self.erase_screen(out, *mode),
            AnsiCommand::EraseLine(mode) => self.erase_line(out, *mode),
            AnsiCommand::Scroll(dir, n) => self.scroll(out, *dir, *n),
            AnsiCommand::SaveCursor => self.save_cursor(out),
            AnsiCommand::RestoreCursor => self.restore_cursor(out),
            AnsiCommand::SetAttribute(code) => self.set_attribute(out, *code),
            AnsiCommand::SetForeground(color) => self.set_foreground(out, *color),
            AnsiCommand::SetBackground(color) => self.set_background(out, *color),
            AnsiCommand::DefaultForeground => self.default_foreground(out),
            AnsiCommand::DefaultBackground => self.default_background(out),
            AnsiCommand::AttributeReset => self.attribute_reset(out),
            AnsiCommand::UnknownExtension(letter, args) => self.unknown_extension(out, *letter, args),
            AnsiCommand::OperatingSystemCommand(code, params) => {
                self.operating_system_command(out, *code, params)
            }
        }
    }
}

/// Consumes every command and forwards text untouched.
///
/// Wrapping a stream with this sink strips ANSI sequences from it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl CommandSink for Passthrough {}

/// Records every command it receives. Used by tests across the crate.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub commands: Vec<AnsiCommand>,
}

#[cfg(test)]
impl CommandSink for RecordingSink {
    fn dispatch(&mut self, _out: &mut dyn Write, command: &AnsiCommand) -> SinkResult {
        self.commands.push(command.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_mode_codes() {
        assert_eq!(EraseMode::from(0), EraseMode::ToEnd);
        assert_eq!(EraseMode::from(1), EraseMode::ToBeginning);
        assert_eq!(EraseMode::from(2), EraseMode::All);
        assert_eq!(EraseMode::from(3), EraseMode::Other(3));
    }

    #[test]
    fn test_passthrough_consumes_commands() {
        let mut sink = Passthrough;
        let mut out = Vec::new();

        assert!(sink.dispatch(&mut out, &AnsiCommand::CursorMove(Direction::Up, 3)).is_ok());
        assert!(sink
            .dispatch(&mut out, &AnsiCommand::UnknownExtension('h', vec![Arg::Marker('?'), Arg::Int(25)]))
            .is_ok());
        assert!(out.is_empty());

        sink.write_text(&mut out, b"plain").unwrap();
        assert_eq!(out, b"plain");
    }
}
