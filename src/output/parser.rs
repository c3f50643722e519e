//! ANSI escape sequence parser
//!
//! Intercepts CSI (`ESC [`) and OSC (`ESC ]`) sequences in a byte stream and
//! hands the decoded commands to a [`CommandSink`]. Every byte that is not part
//! of a recognized sequence reaches the output unchanged and in order.

use std::io::{self, Write};

use super::command::{sgr, AnsiCommand, Arg, CommandSink, Direction, EraseMode, SinkError};

/// Longest escape sequence the parser buffers before giving up on it
pub const MAX_ESCAPE_SEQUENCE_LENGTH: usize = 100;

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;
const CSI_CHAR: u8 = b'[';
const OSC_CHAR: u8 = b']';
const ST_CHAR: u8 = b'\\';

/// Parser state machine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ParserState {
    #[default]
    FirstEsc,
    SecondEsc,
    NextArg,
    StrArgEnd,
    IntArgEnd,
    OscCommand,
    OscCommandEnd,
    OscParam,
    WaitSt, // ESC received within OSC params, waiting for backslash
}

/// What the byte just fed did to the pending sequence
enum Outcome {
    Pending,
    Malformed,
    Complete(Vec<AnsiCommand>),
}

/// Byte-at-a-time escape sequence decoder
#[derive(Debug)]
pub struct EscapeParser {
    state: ParserState,
    /// Raw bytes of the sequence in progress, starting with ESC
    buffer: Vec<u8>,
    args: Vec<Arg>,
    value_start: usize,
    osc_code: u32,
    /// A quoted argument just closed; only `;` or the final byte may follow
    arg_closed: bool,
}

impl Default for EscapeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EscapeParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::FirstEsc,
            buffer: Vec::with_capacity(MAX_ESCAPE_SEQUENCE_LENGTH),
            args: Vec::with_capacity(8),
            value_start: 0,
            osc_code: 0,
            arg_closed: false,
        }
    }

    /// True when no sequence is in progress
    pub fn is_idle(&self) -> bool {
        self.state == ParserState::FirstEsc
    }

    /// Drop any partially buffered sequence
    pub fn reset(&mut self) {
        self.state = ParserState::FirstEsc;
        self.buffer.clear();
        self.args.clear();
        self.value_start = 0;
        self.osc_code = 0;
        self.arg_closed = false;
    }

    /// Feed a single byte to the parser
    pub fn feed<S>(&mut self, byte: u8, sink: &mut S, out: &mut dyn Write) -> io::Result<()>
    where
        S: CommandSink + ?Sized,
    {
        if self.state == ParserState::FirstEsc {
            if byte == ESC {
                self.buffer.push(byte);
                self.state = ParserState::SecondEsc;
                return Ok(());
            }
            return sink.write_text(out, &[byte]);
        }

        self.buffer.push(byte);

        let outcome = match self.state {
            ParserState::FirstEsc => Outcome::Pending,
            ParserState::SecondEsc => self.second_esc(byte),
            ParserState::NextArg => self.next_arg(byte),
            ParserState::IntArgEnd => self.int_arg_end(byte),
            ParserState::StrArgEnd => self.str_arg_end(byte),
            ParserState::OscCommand => self.osc_command(byte),
            ParserState::OscCommandEnd => self.osc_command_end(byte),
            ParserState::OscParam => self.osc_param(byte),
            ParserState::WaitSt => self.wait_st(byte),
        };

        match outcome {
            Outcome::Pending => {
                if self.buffer.len() >= MAX_ESCAPE_SEQUENCE_LENGTH {
                    tracing::debug!(
                        "Discarding unterminated escape sequence after {} bytes",
                        self.buffer.len()
                    );
                    self.reset();
                }
                Ok(())
            }
            Outcome::Malformed => self.flush(out),
            Outcome::Complete(commands) => self.execute(commands, sink, out),
        }
    }

    fn second_esc(&mut self, byte: u8) -> Outcome {
        match byte {
            CSI_CHAR => {
                self.state = ParserState::NextArg;
                Outcome::Pending
            }
            OSC_CHAR => {
                self.state = ParserState::OscCommand;
                Outcome::Pending
            }
            _ => Outcome::Malformed,
        }
    }

    fn next_arg(&mut self, byte: u8) -> Outcome {
        if self.arg_closed {
            self.arg_closed = false;
            match byte {
                b';' => return Outcome::Pending,
                b'"' | b'0'..=b'9' | b'?' | b'=' => return Outcome::Malformed,
                _ => return self.finish_csi(byte),
            }
        }

        match byte {
            b'"' => {
                self.value_start = self.buffer.len();
                self.state = ParserState::StrArgEnd;
                Outcome::Pending
            }
            b'0'..=b'9' => {
                self.value_start = self.buffer.len() - 1;
                self.state = ParserState::IntArgEnd;
                Outcome::Pending
            }
            b';' => {
                self.args.push(Arg::Empty);
                Outcome::Pending
            }
            b'?' | b'=' => {
                self.args.push(Arg::Marker(byte as char));
                Outcome::Pending
            }
            _ => self.finish_csi(byte),
        }
    }

    fn int_arg_end(&mut self, byte: u8) -> Outcome {
        if byte.is_ascii_digit() {
            return Outcome::Pending;
        }

        let end = self.buffer.len() - 1;
        let value = parse_decimal(&self.buffer[self.value_start..end]);
        self.args.push(Arg::Int(value));

        if byte == b';' {
            self.state = ParserState::NextArg;
            Outcome::Pending
        } else {
            self.finish_csi(byte)
        }
    }

    fn str_arg_end(&mut self, byte: u8) -> Outcome {
        if byte != b'"' {
            return Outcome::Pending;
        }

        let end = self.buffer.len() - 1;
        let value = String::from_utf8_lossy(&self.buffer[self.value_start..end]).into_owned();
        self.args.push(Arg::Str(value));
        self.arg_closed = true;
        self.state = ParserState::NextArg;
        Outcome::Pending
    }

    fn osc_command(&mut self, byte: u8) -> Outcome {
        if byte.is_ascii_digit() {
            self.value_start = self.buffer.len() - 1;
            self.state = ParserState::OscCommandEnd;
            Outcome::Pending
        } else {
            Outcome::Malformed
        }
    }

    fn osc_command_end(&mut self, byte: u8) -> Outcome {
        match byte {
            b'0'..=b'9' => Outcome::Pending,
            b';' => {
                let end = self.buffer.len() - 1;
                self.osc_code = parse_decimal(&self.buffer[self.value_start..end]);
                self.value_start = self.buffer.len();
                self.state = ParserState::OscParam;
                Outcome::Pending
            }
            _ => Outcome::Malformed,
        }
    }

    fn osc_param(&mut self, byte: u8) -> Outcome {
        match byte {
            BEL => {
                let end = self.buffer.len() - 1;
                self.finish_osc(end)
            }
            ESC => {
                self.state = ParserState::WaitSt;
                Outcome::Pending
            }
            _ => Outcome::Pending,
        }
    }

    fn wait_st(&mut self, byte: u8) -> Outcome {
        match byte {
            ST_CHAR => {
                let end = self.buffer.len() - 2;
                self.finish_osc(end)
            }
            BEL => {
                let end = self.buffer.len() - 1;
                self.finish_osc(end)
            }
            ESC => Outcome::Pending,
            _ => {
                // The ESC was part of the parameter text
                self.state = ParserState::OscParam;
                Outcome::Pending
            }
        }
    }

    fn finish_osc(&mut self, end: usize) -> Outcome {
        let params = String::from_utf8_lossy(&self.buffer[self.value_start..end]).into_owned();
        Outcome::Complete(vec![AnsiCommand::OperatingSystemCommand(self.osc_code, params)])
    }

    fn finish_csi(&mut self, letter: u8) -> Outcome {
        match self.decode_csi(letter) {
            Some(commands) => Outcome::Complete(commands),
            None => Outcome::Malformed,
        }
    }

    /// Map a final byte and the collected arguments to commands.
    /// `None` means the sequence is not one we understand.
    fn decode_csi(&self, letter: u8) -> Option<Vec<AnsiCommand>> {
        let command = match letter {
            b'A' => AnsiCommand::CursorMove(Direction::Up, self.count_arg()?),
            b'B' => AnsiCommand::CursorMove(Direction::Down, self.count_arg()?),
            b'C' => AnsiCommand::CursorMove(Direction::Right, self.count_arg()?),
            b'D' => AnsiCommand::CursorMove(Direction::Left, self.count_arg()?),
            b'E' => AnsiCommand::CursorLine(Direction::Down, self.count_arg()?),
            b'F' => AnsiCommand::CursorLine(Direction::Up, self.count_arg()?),
            b'G' => AnsiCommand::CursorToColumn(self.int_arg(0, 1)?),
            b'H' | b'f' => AnsiCommand::CursorTo(self.int_arg(0, 1)?, self.int_arg(1, 1)?),
            b'J' => AnsiCommand::EraseScreen(EraseMode::from(self.int_arg(0, 0)?)),
            b'K' => AnsiCommand::EraseLine(EraseMode::from(self.int_arg(0, 0)?)),
            b'S' => AnsiCommand::Scroll(Direction::Up, self.count_arg()?),
            b'T' => AnsiCommand::Scroll(Direction::Down, self.count_arg()?),
            b's' => AnsiCommand::SaveCursor,
            b'u' => AnsiCommand::RestoreCursor,
            b'm' => return self.decode_sgr(),
            b'a'..=b'z' | b'A'..=b'Z' => {
                AnsiCommand::UnknownExtension(letter as char, self.args.clone())
            }
            _ => return None,
        };
        Some(vec![command])
    }

    fn decode_sgr(&self) -> Option<Vec<AnsiCommand>> {
        let mut commands = Vec::with_capacity(self.args.len().max(1));

        for arg in &self.args {
            let value = match arg {
                Arg::Empty => continue,
                Arg::Int(value) => *value,
                Arg::Str(_) | Arg::Marker(_) => return None,
            };

            commands.push(match value {
                30..=37 => AnsiCommand::SetForeground((value - 30) as u8),
                40..=47 => AnsiCommand::SetBackground((value - 40) as u8),
                sgr::DEFAULT_FOREGROUND => AnsiCommand::DefaultForeground,
                sgr::DEFAULT_BACKGROUND => AnsiCommand::DefaultBackground,
                sgr::RESET => AnsiCommand::AttributeReset,
                _ => AnsiCommand::SetAttribute(value),
            });
        }

        if commands.is_empty() {
            commands.push(AnsiCommand::AttributeReset);
        }
        Some(commands)
    }

    /// Integer argument at `index`, `default` when omitted
    fn int_arg(&self, index: usize, default: u32) -> Option<u32> {
        match self.args.get(index) {
            None | Some(Arg::Empty) => Some(default),
            Some(Arg::Int(value)) => Some(*value),
            Some(Arg::Str(_)) | Some(Arg::Marker(_)) => None,
        }
    }

    /// Movement count: first argument, at least 1
    fn count_arg(&self) -> Option<u32> {
        self.int_arg(0, 1).map(|n| n.max(1))
    }

    fn execute<S>(&mut self, commands: Vec<AnsiCommand>, sink: &mut S, out: &mut dyn Write) -> io::Result<()>
    where
        S: CommandSink + ?Sized,
    {
        let mut rejected = false;

        for command in &commands {
            match sink.dispatch(out, command) {
                Ok(()) => {}
                Err(SinkError::Unsupported) => rejected = true,
                Err(SinkError::Io(e)) => {
                    self.reset();
                    return Err(e);
                }
            }
        }

        if rejected {
            return self.flush(out);
        }
        self.reset();
        Ok(())
    }

    /// Write the buffered sequence through unchanged and start over
    fn flush(&mut self, out: &mut dyn Write) -> io::Result<()> {
        let result = out.write_all(&self.buffer);
        self.reset();
        result
    }
}

fn parse_decimal(digits: &[u8]) -> u32 {
    digits.iter().fold(0u32, |acc, d| {
        acc.saturating_mul(10).saturating_add(u32::from(d - b'0'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::command::{Passthrough, RecordingSink, SinkResult};

    fn run(input: &[u8]) -> (Vec<AnsiCommand>, Vec<u8>) {
        let mut parser = EscapeParser::new();
        let mut sink = RecordingSink::default();
        let mut out = Vec::new();
        for byte in input {
            parser.feed(*byte, &mut sink, &mut out).unwrap();
        }
        (sink.commands, out)
    }

    #[test]
    fn test_plain_bytes_pass_through() {
        let input: Vec<u8> = (0u8..=255).filter(|b| *b != ESC).collect();
        let (commands, out) = run(&input);
        assert!(commands.is_empty());
        assert_eq!(out, input);
    }

    #[test]
    fn test_cursor_movement_defaults() {
        let (commands, out) = run(b"\x1b[A\x1b[3B\x1b[;C\x1b[0D");
        assert_eq!(
            commands,
            vec![
                AnsiCommand::CursorMove(Direction::Up, 1),
                AnsiCommand::CursorMove(Direction::Down, 3),
                AnsiCommand::CursorMove(Direction::Right, 1),
                AnsiCommand::CursorMove(Direction::Left, 1),
            ]
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_cursor_position() {
        let (commands, _) = run(b"\x1b[5;10H\x1b[H\x1b[;7f\x1b[4f\x1b[12G\x1b[2E\x1b[F");
        assert_eq!(
            commands,
            vec![
                AnsiCommand::CursorTo(5, 10),
                AnsiCommand::CursorTo(1, 1),
                AnsiCommand::CursorTo(1, 7),
                AnsiCommand::CursorTo(4, 1),
                AnsiCommand::CursorToColumn(12),
                AnsiCommand::CursorLine(Direction::Down, 2),
                AnsiCommand::CursorLine(Direction::Up, 1),
            ]
        );
    }

    #[test]
    fn test_erase_defaults_to_forward() {
        let (commands, _) = run(b"\x1b[J\x1b[0J\x1b[2J\x1b[K\x1b[1K\x1b[3J");
        assert_eq!(
            commands,
            vec![
                AnsiCommand::EraseScreen(EraseMode::ToEnd),
                AnsiCommand::EraseScreen(EraseMode::ToEnd),
                AnsiCommand::EraseScreen(EraseMode::All),
                AnsiCommand::EraseLine(EraseMode::ToEnd),
                AnsiCommand::EraseLine(EraseMode::ToBeginning),
                AnsiCommand::EraseScreen(EraseMode::Other(3)),
            ]
        );
    }

    #[test]
    fn test_scroll_and_save_restore() {
        let (commands, _) = run(b"\x1b[S\x1b[4T\x1b[s\x1b[u");
        assert_eq!(
            commands,
            vec![
                AnsiCommand::Scroll(Direction::Up, 1),
                AnsiCommand::Scroll(Direction::Down, 4),
                AnsiCommand::SaveCursor,
                AnsiCommand::RestoreCursor,
            ]
        );
    }

    #[test]
    fn test_sgr_sequence() {
        let (commands, out) = run(b"\x1b[1m\x1b[31m\x1b[0m");
        assert_eq!(
            commands,
            vec![
                AnsiCommand::SetAttribute(sgr::BOLD),
                AnsiCommand::SetForeground(1),
                AnsiCommand::AttributeReset,
            ]
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_sgr_multiple_arguments() {
        let (commands, _) = run(b"\x1b[1;32;44;39;49;7m\x1b[m\x1b[;m");
        assert_eq!(
            commands,
            vec![
                AnsiCommand::SetAttribute(1),
                AnsiCommand::SetForeground(2),
                AnsiCommand::SetBackground(4),
                AnsiCommand::DefaultForeground,
                AnsiCommand::DefaultBackground,
                AnsiCommand::SetAttribute(7),
                AnsiCommand::AttributeReset,
                AnsiCommand::AttributeReset,
            ]
        );
    }

    #[test]
    fn test_unknown_extension_surfaces() {
        let (commands, out) = run(b"\x1b[?25h\x1b[=3;\"x\"z");
        assert_eq!(
            commands,
            vec![
                AnsiCommand::UnknownExtension('h', vec![Arg::Marker('?'), Arg::Int(25)]),
                AnsiCommand::UnknownExtension(
                    'z',
                    vec![Arg::Marker('='), Arg::Int(3), Arg::Str("x".to_string())]
                ),
            ]
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_unrecognized_final_byte_is_flushed() {
        let (commands, out) = run(b"a\x1b[2~b");
        assert!(commands.is_empty());
        assert_eq!(out, b"a\x1b[2~b");
    }

    #[test]
    fn test_malformed_escape_is_flushed() {
        let (commands, out) = run(b"x\x1b(By\x1b]zq");
        assert!(commands.is_empty());
        assert_eq!(out, b"x\x1b(By\x1b]zq");
    }

    #[test]
    fn test_non_integer_argument_is_malformed() {
        let (commands, out) = run(b"\x1b[?1A\x1b[\"s\"m");
        assert!(commands.is_empty());
        assert_eq!(out, b"\x1b[?1A\x1b[\"s\"m");
    }

    #[test]
    fn test_osc_terminators() {
        let (commands, out) = run(b"\x1b]0;my title\x07\x1b]52;c;Zm9v\x1b\\after");
        assert_eq!(
            commands,
            vec![
                AnsiCommand::OperatingSystemCommand(0, "my title".to_string()),
                AnsiCommand::OperatingSystemCommand(52, "c;Zm9v".to_string()),
            ]
        );
        assert_eq!(out, b"after");
    }

    #[test]
    fn test_osc_escape_inside_params() {
        let (commands, _) = run(b"\x1b]2;a\x1bb\x07");
        assert_eq!(
            commands,
            vec![AnsiCommand::OperatingSystemCommand(2, "a\x1bb".to_string())]
        );
    }

    #[test]
    fn test_osc_bel_after_escape_terminates() {
        let (commands, out) = run(b"\x1b]0;a\x1b\x07rest");
        assert_eq!(
            commands,
            vec![AnsiCommand::OperatingSystemCommand(0, "a\x1b".to_string())]
        );
        assert_eq!(out, b"rest");
    }

    #[test]
    fn test_osc_repeated_escape_still_awaits_terminator() {
        let (commands, out) = run(b"\x1b]2;a\x1b\x1b\\z");
        assert_eq!(
            commands,
            vec![AnsiCommand::OperatingSystemCommand(2, "a\x1b".to_string())]
        );
        assert_eq!(out, b"z");
    }

    #[test]
    fn test_overlong_sequence_is_discarded() {
        let mut input = b"\x1b[".to_vec();
        input.extend(std::iter::repeat(b'1').take(MAX_ESCAPE_SEQUENCE_LENGTH));
        input.extend_from_slice(b"ok\x1b[2A");

        let (commands, out) = run(&input);

        // ESC [ plus 98 digits fill the buffer; the last 2 digits are plain text again
        let mut expected = vec![b'1'; 2];
        expected.extend_from_slice(b"ok");
        assert_eq!(out, expected);
        assert_eq!(commands, vec![AnsiCommand::CursorMove(Direction::Up, 2)]);
    }

    #[test]
    fn test_unterminated_osc_is_discarded() {
        let mut input = b"\x1b]0;".to_vec();
        input.extend(std::iter::repeat(b't').take(200));
        let (commands, out) = run(&input);

        assert!(commands.is_empty());
        assert_eq!(out.len(), 200 - (MAX_ESCAPE_SEQUENCE_LENGTH - 4));
        assert!(out.iter().all(|b| *b == b't'));
    }

    #[test]
    fn test_large_numbers_saturate() {
        let (commands, _) = run(b"\x1b[99999999999999999999A");
        assert_eq!(commands, vec![AnsiCommand::CursorMove(Direction::Up, u32::MAX)]);
    }

    struct RejectingSink;

    impl CommandSink for RejectingSink {
        fn unknown_extension(&mut self, _out: &mut dyn Write, _letter: char, _args: &[Arg]) -> SinkResult {
            Err(SinkError::Unsupported)
        }
    }

    #[test]
    fn test_unsupported_command_passes_raw_bytes() {
        let mut parser = EscapeParser::new();
        let mut out = Vec::new();
        for byte in b"\x1b[?1049h\x1b[2J!" {
            parser.feed(*byte, &mut RejectingSink, &mut out).unwrap();
        }
        assert_eq!(out, b"\x1b[?1049h!");
    }

    #[test]
    fn test_passthrough_strips_everything_recognized() {
        let mut parser = EscapeParser::new();
        let mut out = Vec::new();
        for byte in b"\x1b[1;31mred\x1b[0m \x1b]0;t\x07plain" {
            parser.feed(*byte, &mut Passthrough, &mut out).unwrap();
        }
        assert_eq!(out, b"red plain");
        assert!(parser.is_idle());
    }
}
