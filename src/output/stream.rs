//! ANSI-aware output streams
//!
//! [`AnsiWriter`] wraps any `Write` and runs every byte through an
//! [`EscapeParser`]. Text goes to the wrapped stream, escape sequences go to
//! the sink. [`console_writer`] picks the right sink for stdout/stderr.

use std::io::{self, IsTerminal, Write};

use crate::config::Config;

use super::command::{CommandSink, Passthrough};
use super::parser::EscapeParser;

/// `ESC [ m`: resets all attributes
pub const RESET_CODE: &[u8] = b"\x1b[m";

const ESC: u8 = 0x1B;

/// A writer that interprets ANSI escape sequences through a [`CommandSink`]
pub struct AnsiWriter<W: Write, S: CommandSink> {
    inner: W,
    sink: S,
    parser: EscapeParser,
}

impl<W: Write, S: CommandSink> AnsiWriter<W, S> {
    pub fn new(inner: W, sink: S) -> Self {
        Self {
            inner,
            sink,
            parser: EscapeParser::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Split into the wrapped stream and the sink. A partially written escape
    /// sequence is dropped.
    pub fn into_parts(self) -> (W, S) {
        (self.inner, self.sink)
    }

    /// Write the attribute reset sequence and flush
    pub fn reset(&mut self) -> io::Result<()> {
        self.write_all(RESET_CODE)?;
        self.flush()
    }
}

impl<W: Write, S: CommandSink> Write for AnsiWriter<W, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut i = 0;
        while i < buf.len() {
            // Hand whole runs of plain text to the sink at once
            if self.parser.is_idle() {
                let run = buf[i..].iter().position(|b| *b == ESC).unwrap_or(buf.len() - i);
                if run > 0 {
                    self.sink.write_text(&mut self.inner, &buf[i..i + run])?;
                    i += run;
                    continue;
                }
            }

            self.parser.feed(buf[i], &mut self.sink, &mut self.inner)?;
            i += 1;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Remove every recognized escape sequence from `input`
pub fn strip_ansi(input: &[u8]) -> Vec<u8> {
    let mut writer = AnsiWriter::new(Vec::with_capacity(input.len()), Passthrough);
    // Writing into a Vec cannot fail
    let _ = writer.write_all(input);
    writer.into_parts().0
}

/// Standard stream an output writer is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTarget {
    Stdout,
    Stderr,
}

impl ConsoleTarget {
    fn is_terminal(self) -> bool {
        match self {
            ConsoleTarget::Stdout => io::stdout().is_terminal(),
            ConsoleTarget::Stderr => io::stderr().is_terminal(),
        }
    }

    fn stream(self) -> Box<dyn Write + Send> {
        match self {
            ConsoleTarget::Stdout => Box::new(io::stdout()),
            ConsoleTarget::Stderr => Box::new(io::stderr()),
        }
    }
}

/// How [`console_writer`] decided to treat escape sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Sequences are written unchanged
    Raw,
    /// Sequences are removed
    Strip,
    /// Sequences are replayed through the Windows console API
    NativeConsole,
}

/// Pick the output mode for `target` under `config`
pub fn output_mode(target: ConsoleTarget, config: &Config) -> OutputMode {
    if config.force_enable_ansi {
        return OutputMode::Raw;
    }
    if !config.enable_ansi || !target.is_terminal() {
        return OutputMode::Strip;
    }

    #[cfg(windows)]
    {
        if super::console::win32::enable_virtual_terminal(target) {
            OutputMode::Raw
        } else {
            OutputMode::NativeConsole
        }
    }

    #[cfg(not(windows))]
    {
        OutputMode::Raw
    }
}

/// Build an ANSI-aware writer for stdout or stderr
pub fn console_writer(target: ConsoleTarget, config: &Config) -> Box<dyn Write + Send> {
    let mode = output_mode(target, config);
    tracing::debug!("Output {:?} uses mode {:?}", target, mode);

    match mode {
        OutputMode::Raw => target.stream(),
        OutputMode::Strip => Box::new(AnsiWriter::new(target.stream(), Passthrough)),
        OutputMode::NativeConsole => native_console_writer(target),
    }
}

#[cfg(windows)]
fn native_console_writer(target: ConsoleTarget) -> Box<dyn Write + Send> {
    use super::console::{win32::Win32Console, NativeConsoleSink};

    match Win32Console::open(target).and_then(NativeConsoleSink::new) {
        Ok(sink) => Box::new(AnsiWriter::new(target.stream(), sink)),
        Err(e) => {
            tracing::warn!("Native console unavailable, stripping ANSI instead: {}", e);
            Box::new(AnsiWriter::new(target.stream(), Passthrough))
        }
    }
}

#[cfg(not(windows))]
fn native_console_writer(target: ConsoleTarget) -> Box<dyn Write + Send> {
    Box::new(AnsiWriter::new(target.stream(), Passthrough))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::command::{AnsiCommand, RecordingSink};

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi(b"\x1b[1mbold\x1b[0m and \x1b[2Kplain"), b"bold and plain");
        assert_eq!(strip_ansi(b"no escapes here\n"), b"no escapes here\n");
    }

    #[test]
    fn test_sequence_split_across_writes() {
        let mut writer = AnsiWriter::new(Vec::new(), RecordingSink::default());
        writer.write_all(b"ab\x1b[3").unwrap();
        writer.write_all(b"1mcd").unwrap();

        assert_eq!(writer.get_ref(), b"abcd");
        assert_eq!(writer.sink().commands, vec![AnsiCommand::SetForeground(1)]);
    }

    #[test]
    fn test_reset_writes_reset_code() {
        let mut writer = AnsiWriter::new(Vec::new(), RecordingSink::default());
        writer.reset().unwrap();

        let (out, sink) = writer.into_parts();
        assert!(out.is_empty());
        assert_eq!(sink.commands, vec![AnsiCommand::AttributeReset]);
    }

    #[test]
    fn test_output_mode_respects_config() {
        let forced = Config {
            force_enable_ansi: true,
            ..Config::default()
        };
        assert_eq!(output_mode(ConsoleTarget::Stdout, &forced), OutputMode::Raw);

        let disabled = Config {
            enable_ansi: false,
            ..Config::default()
        };
        assert_eq!(output_mode(ConsoleTarget::Stderr, &disabled), OutputMode::Strip);
    }
}
