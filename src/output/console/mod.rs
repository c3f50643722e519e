//! Console API emulation of ANSI sequences
//!
//! Legacy Windows consoles print escape sequences as garbage. This sink
//! replays each decoded command as calls against the live screen buffer
//! instead. The native calls sit behind [`ConsoleBackend`]; the Win32
//! implementation lives in [`win32`].
//!
//! # Attribute word
//!
//! ```text
//! bit  7  6  5  4 | 3  2  1  0
//!      I  R  G  B | I  R  G  B
//!      background | foreground
//! ```

#[cfg(windows)]
pub mod win32;

use std::io::{self, Write};

use bitflags::bitflags;

use super::command::{sgr, CommandSink, Direction, EraseMode, SinkResult};

bitflags! {
    /// Bits of a console character attribute word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConsoleAttributes: u16 {
        const FOREGROUND_BLUE = 0x0001;
        const FOREGROUND_GREEN = 0x0002;
        const FOREGROUND_RED = 0x0004;
        const FOREGROUND_INTENSITY = 0x0008;
        const BACKGROUND_BLUE = 0x0010;
        const BACKGROUND_GREEN = 0x0020;
        const BACKGROUND_RED = 0x0040;
        const BACKGROUND_INTENSITY = 0x0080;
    }
}

const FOREGROUND_MASK: u16 = 0x000F;
const BACKGROUND_MASK: u16 = 0x00F0;
const COLOR_MASK: u16 = 0x00FF;

/// SGR color index to foreground bits (background is the same shifted left by 4)
const FOREGROUND_COLORS: [ConsoleAttributes; 8] = [
    ConsoleAttributes::empty(),
    ConsoleAttributes::FOREGROUND_RED,
    ConsoleAttributes::FOREGROUND_GREEN,
    ConsoleAttributes::FOREGROUND_RED.union(ConsoleAttributes::FOREGROUND_GREEN),
    ConsoleAttributes::FOREGROUND_BLUE,
    ConsoleAttributes::FOREGROUND_RED.union(ConsoleAttributes::FOREGROUND_BLUE),
    ConsoleAttributes::FOREGROUND_GREEN.union(ConsoleAttributes::FOREGROUND_BLUE),
    ConsoleAttributes::FOREGROUND_RED
        .union(ConsoleAttributes::FOREGROUND_GREEN)
        .union(ConsoleAttributes::FOREGROUND_BLUE),
];

fn foreground_bits(color: u8) -> u16 {
    FOREGROUND_COLORS[usize::from(color & 0x07)].bits()
}

fn background_bits(color: u8) -> u16 {
    foreground_bits(color) << 4
}

/// Swap the foreground and background nibbles, keeping the high byte
pub fn swap_colors(attributes: u16) -> u16 {
    let fg = (attributes & FOREGROUND_MASK) << 4;
    let bg = (attributes & BACKGROUND_MASK) >> 4;
    (attributes & !COLOR_MASK) | fg | bg
}

/// Character cell coordinate, 0-based
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coord {
    pub x: i16,
    pub y: i16,
}

impl Coord {
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

/// Inclusive rectangle of character cells
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

impl Rect {
    pub fn width(&self) -> i32 {
        i32::from(self.right) - i32::from(self.left) + 1
    }

    pub fn height(&self) -> i32 {
        i32::from(self.bottom) - i32::from(self.top) + 1
    }
}

/// Point-in-time read of the screen buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenSnapshot {
    pub cursor: Coord,
    /// Visible window inside the buffer
    pub window: Rect,
    /// Whole buffer size in cells
    pub size: Coord,
    pub attributes: u16,
}

/// The native console operations the sink needs
pub trait ConsoleBackend {
    fn screen_info(&mut self) -> io::Result<ScreenSnapshot>;
    fn set_cursor_position(&mut self, position: Coord) -> io::Result<()>;
    fn set_text_attribute(&mut self, attributes: u16) -> io::Result<()>;
    fn fill_attribute(&mut self, attributes: u16, length: u32, origin: Coord) -> io::Result<()>;
    fn fill_character(&mut self, ch: char, length: u32, origin: Coord) -> io::Result<()>;
    /// Move `region` so its top-left lands on `destination`; cells uncovered
    /// inside `clip` are filled with spaces in `fill_attributes`.
    fn scroll(&mut self, region: Rect, clip: Rect, destination: Coord, fill_attributes: u16) -> io::Result<()>;
    fn set_title(&mut self, title: &str) -> io::Result<()>;
}

fn to_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

fn count_to_i32(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

fn fill_length(cells: i32) -> u32 {
    u32::try_from(cells.max(0)).unwrap_or(0)
}

/// Replays ANSI commands against a console screen buffer
#[derive(Debug)]
pub struct NativeConsoleSink<B: ConsoleBackend> {
    backend: B,
    /// Attributes in effect before any command ran
    original_attributes: u16,
    /// Current attributes, without the negative swap
    attributes: u16,
    negative: bool,
    saved_cursor: Option<Coord>,
}

impl<B: ConsoleBackend> NativeConsoleSink<B> {
    pub fn new(mut backend: B) -> io::Result<Self> {
        let info = backend.screen_info()?;
        Ok(Self {
            backend,
            original_attributes: info.attributes,
            attributes: info.attributes,
            negative: false,
            saved_cursor: None,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current attribute word, without the negative swap
    pub fn attributes(&self) -> u16 {
        self.attributes
    }

    /// Attribute word as written to the console
    pub fn effective_attributes(&self) -> u16 {
        if self.negative {
            swap_colors(self.attributes)
        } else {
            self.attributes
        }
    }

    /// Fresh screen info; pending text is flushed first so the cursor is current
    fn refresh(&mut self, out: &mut dyn Write) -> io::Result<ScreenSnapshot> {
        out.flush()?;
        self.backend.screen_info()
    }

    fn apply_attributes(&mut self, out: &mut dyn Write) -> SinkResult {
        out.flush()?;
        let attributes = self.effective_attributes();
        self.backend.set_text_attribute(attributes)?;
        Ok(())
    }

    fn set_cursor(&mut self, position: Coord) -> SinkResult {
        self.backend.set_cursor_position(position)?;
        Ok(())
    }

    /// Fill `length` cells from `origin` with spaces in the original attributes
    fn blank(&mut self, length: u32, origin: Coord) -> SinkResult {
        self.backend.fill_attribute(self.original_attributes, length, origin)?;
        self.backend.fill_character(' ', length, origin)?;
        Ok(())
    }

    fn scroll_rows(&mut self, out: &mut dyn Write, rows: i32) -> SinkResult {
        if rows == 0 {
            return Ok(());
        }

        let info = self.refresh(out)?;
        let region = Rect {
            left: 0,
            top: info.window.top,
            right: to_i16(i32::from(info.size.x) - 1),
            bottom: info.window.bottom,
        };
        let rows = rows.clamp(-info.window.height(), info.window.height());
        let destination = Coord::new(0, to_i16(i32::from(region.top) - rows));

        let fill = self.effective_attributes();
        self.backend.scroll(region, region, destination, fill)?;
        Ok(())
    }
}

impl<B: ConsoleBackend> CommandSink for NativeConsoleSink<B> {
    fn cursor_move(&mut self, out: &mut dyn Write, dir: Direction, count: u32) -> SinkResult {
        let info = self.refresh(out)?;
        let n = count_to_i32(count);
        let (x, y) = (i32::from(info.cursor.x), i32::from(info.cursor.y));
        let window = info.window;

        let position = match dir {
            Direction::Up => Coord::new(info.cursor.x, to_i16(y.saturating_sub(n).max(window.top.into()))),
            Direction::Down => Coord::new(info.cursor.x, to_i16(y.saturating_add(n).min(window.bottom.into()))),
            Direction::Right => Coord::new(to_i16(x.saturating_add(n).min(window.right.into())), info.cursor.y),
            Direction::Left => Coord::new(to_i16(x.saturating_sub(n).max(window.left.into())), info.cursor.y),
        };
        self.set_cursor(position)
    }

    fn cursor_line(&mut self, out: &mut dyn Write, dir: Direction, count: u32) -> SinkResult {
        let info = self.refresh(out)?;
        let n = count_to_i32(count);
        let y = i32::from(info.cursor.y);
        let window = info.window;

        let row = match dir {
            Direction::Up | Direction::Left => y.saturating_sub(n).max(window.top.into()),
            Direction::Down | Direction::Right => y.saturating_add(n).min(window.bottom.into()),
        };
        self.set_cursor(Coord::new(window.left, to_i16(row)))
    }

    fn cursor_to_column(&mut self, out: &mut dyn Write, col: u32) -> SinkResult {
        let info = self.refresh(out)?;
        let window = info.window;
        let x = i32::from(window.left)
            .saturating_add(count_to_i32(col))
            .saturating_sub(1)
            .clamp(window.left.into(), window.right.into());
        self.set_cursor(Coord::new(to_i16(x), info.cursor.y))
    }

    fn cursor_to(&mut self, out: &mut dyn Write, row: u32, col: u32) -> SinkResult {
        let info = self.refresh(out)?;
        let window = info.window;
        let y = i32::from(window.top)
            .saturating_add(count_to_i32(row))
            .saturating_sub(1)
            .clamp(window.top.into(), window.bottom.into());
        let x = i32::from(window.left)
            .saturating_add(count_to_i32(col))
            .saturating_sub(1)
            .clamp(window.left.into(), window.right.into());
        self.set_cursor(Coord::new(to_i16(x), to_i16(y)))
    }

    fn erase_screen(&mut self, out: &mut dyn Write, mode: EraseMode) -> SinkResult {
        let info = self.refresh(out)?;
        let row_width = i32::from(info.size.x);
        let (cx, cy) = (i32::from(info.cursor.x), i32::from(info.cursor.y));
        let top = i32::from(info.window.top);
        let bottom = i32::from(info.window.bottom);

        match mode {
            EraseMode::All => {
                let length = info.window.height() * row_width;
                self.blank(fill_length(length), Coord::new(0, info.window.top))
            }
            EraseMode::ToBeginning => {
                let length = (cy - top) * row_width + cx + 1;
                self.blank(fill_length(length), Coord::new(0, info.window.top))
            }
            EraseMode::ToEnd => {
                let length = (bottom - cy) * row_width + row_width - cx;
                self.blank(fill_length(length), info.cursor)
            }
            EraseMode::Other(_) => Ok(()),
        }
    }

    fn erase_line(&mut self, out: &mut dyn Write, mode: EraseMode) -> SinkResult {
        let info = self.refresh(out)?;
        let row_width = i32::from(info.size.x);
        let cx = i32::from(info.cursor.x);
        let line_start = Coord::new(0, info.cursor.y);

        match mode {
            EraseMode::All => self.blank(fill_length(row_width), line_start),
            EraseMode::ToBeginning => self.blank(fill_length(cx + 1), line_start),
            EraseMode::ToEnd => self.blank(fill_length(row_width - cx), info.cursor),
            EraseMode::Other(_) => Ok(()),
        }
    }

    fn scroll(&mut self, out: &mut dyn Write, dir: Direction, count: u32) -> SinkResult {
        let n = count_to_i32(count);
        match dir {
            Direction::Up | Direction::Left => self.scroll_rows(out, n),
            Direction::Down | Direction::Right => self.scroll_rows(out, -n),
        }
    }

    fn save_cursor(&mut self, out: &mut dyn Write) -> SinkResult {
        let info = self.refresh(out)?;
        self.saved_cursor = Some(info.cursor);
        Ok(())
    }

    fn restore_cursor(&mut self, out: &mut dyn Write) -> SinkResult {
        if let Some(position) = self.saved_cursor {
            out.flush()?;
            self.set_cursor(position)?;
        }
        Ok(())
    }

    fn set_attribute(&mut self, out: &mut dyn Write, code: u32) -> SinkResult {
        let intensity_fg = ConsoleAttributes::FOREGROUND_INTENSITY.bits();
        let intensity_bg = ConsoleAttributes::BACKGROUND_INTENSITY.bits();

        match code {
            90..=97 => {
                let color = foreground_bits((code - 90) as u8);
                self.attributes = (self.attributes & !FOREGROUND_MASK) | color | intensity_fg;
            }
            100..=107 => {
                let color = background_bits((code - 100) as u8);
                self.attributes = (self.attributes & !BACKGROUND_MASK) | color | intensity_bg;
            }
            sgr::BOLD => self.attributes |= intensity_fg,
            sgr::NORMAL => self.attributes &= !intensity_fg,
            // No underline on the console: shown as bright background
            sgr::UNDERLINE => self.attributes |= intensity_bg,
            sgr::UNDERLINE_OFF => self.attributes &= !intensity_bg,
            sgr::NEGATIVE_ON => self.negative = true,
            sgr::NEGATIVE_OFF => self.negative = false,
            _ => return Ok(()),
        }
        self.apply_attributes(out)
    }

    fn set_foreground(&mut self, out: &mut dyn Write, color: u8) -> SinkResult {
        self.attributes = (self.attributes & !FOREGROUND_MASK) | foreground_bits(color);
        self.apply_attributes(out)
    }

    fn set_background(&mut self, out: &mut dyn Write, color: u8) -> SinkResult {
        self.attributes = (self.attributes & !BACKGROUND_MASK) | background_bits(color);
        self.apply_attributes(out)
    }

    fn default_foreground(&mut self, out: &mut dyn Write) -> SinkResult {
        self.attributes = (self.attributes & !FOREGROUND_MASK) | (self.original_attributes & FOREGROUND_MASK);
        self.apply_attributes(out)
    }

    fn default_background(&mut self, out: &mut dyn Write) -> SinkResult {
        self.attributes = (self.attributes & !BACKGROUND_MASK) | (self.original_attributes & BACKGROUND_MASK);
        self.apply_attributes(out)
    }

    fn attribute_reset(&mut self, out: &mut dyn Write) -> SinkResult {
        self.attributes = (self.attributes & !COLOR_MASK) | (self.original_attributes & COLOR_MASK);
        self.negative = false;
        self.apply_attributes(out)
    }

    fn operating_system_command(&mut self, out: &mut dyn Write, code: u32, params: &str) -> SinkResult {
        match code {
            0 | 2 => {
                out.flush()?;
                self.backend.set_title(params)?;
            }
            _ => tracing::trace!("Ignoring OSC {} on native console", code),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::AnsiWriter;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Cursor(Coord),
        Attribute(u16),
        FillAttribute(u16, u32, Coord),
        FillCharacter(char, u32, Coord),
        Scroll(Rect, Coord, u16),
        Title(String),
    }

    /// 80x300 buffer showing rows 100..=124, cursor at (10, 110)
    #[derive(Debug)]
    struct FakeConsole {
        info: ScreenSnapshot,
        calls: Vec<Call>,
    }

    impl FakeConsole {
        fn new() -> Self {
            Self {
                info: ScreenSnapshot {
                    cursor: Coord::new(10, 110),
                    window: Rect { left: 0, top: 100, right: 79, bottom: 124 },
                    size: Coord::new(80, 300),
                    attributes: 0x0007,
                },
                calls: Vec::new(),
            }
        }
    }

    impl ConsoleBackend for FakeConsole {
        fn screen_info(&mut self) -> io::Result<ScreenSnapshot> {
            Ok(self.info)
        }

        fn set_cursor_position(&mut self, position: Coord) -> io::Result<()> {
            self.info.cursor = position;
            self.calls.push(Call::Cursor(position));
            Ok(())
        }

        fn set_text_attribute(&mut self, attributes: u16) -> io::Result<()> {
            self.info.attributes = attributes;
            self.calls.push(Call::Attribute(attributes));
            Ok(())
        }

        fn fill_attribute(&mut self, attributes: u16, length: u32, origin: Coord) -> io::Result<()> {
            self.calls.push(Call::FillAttribute(attributes, length, origin));
            Ok(())
        }

        fn fill_character(&mut self, ch: char, length: u32, origin: Coord) -> io::Result<()> {
            self.calls.push(Call::FillCharacter(ch, length, origin));
            Ok(())
        }

        fn scroll(&mut self, region: Rect, clip: Rect, destination: Coord, fill_attributes: u16) -> io::Result<()> {
            assert_eq!(region, clip);
            self.calls.push(Call::Scroll(region, destination, fill_attributes));
            Ok(())
        }

        fn set_title(&mut self, title: &str) -> io::Result<()> {
            self.calls.push(Call::Title(title.to_string()));
            Ok(())
        }
    }

    fn replay(input: &[u8]) -> (Vec<u8>, NativeConsoleSink<FakeConsole>) {
        let sink = NativeConsoleSink::new(FakeConsole::new()).unwrap();
        let mut writer = AnsiWriter::new(Vec::new(), sink);
        writer.write_all(input).unwrap();
        writer.into_parts()
    }

    fn calls(sink: &NativeConsoleSink<FakeConsole>) -> &[Call] {
        &sink.backend().calls
    }

    #[test]
    fn test_swap_colors() {
        assert_eq!(swap_colors(0x0017), 0x0071);
        assert_eq!(swap_colors(0x8C4E), 0x8CE4);
    }

    #[test]
    fn test_foreground_replaces_only_low_nibble() {
        let (out, sink) = replay(b"\x1b[44m\x1b[31mtext");
        assert_eq!(out, b"text");
        assert_eq!(calls(&sink), &[Call::Attribute(0x0017), Call::Attribute(0x0014)]);
    }

    #[test]
    fn test_negative_toggle_restores_exact_word() {
        let (_, sink) = replay(b"\x1b[32;41m\x1b[7m\x1b[27m");
        let before = 0x0042;
        assert_eq!(
            calls(&sink),
            &[
                Call::Attribute(0x0002),
                Call::Attribute(before),
                Call::Attribute(swap_colors(before)),
                Call::Attribute(before),
            ]
        );
        assert_eq!(sink.attributes(), before);
    }

    #[test]
    fn test_bright_colors_and_reset() {
        let (_, mut sink) = replay(b"\x1b[1m\x1b[91m\x1b[103m");
        assert_eq!(sink.attributes(), 0x0004 | 0x0008 | 0x0060 | 0x0080);

        let mut out = Vec::new();
        sink.attribute_reset(&mut out).unwrap();
        assert_eq!(sink.attributes(), 0x0007);
    }

    #[test]
    fn test_default_colors_come_from_original() {
        let (_, sink) = replay(b"\x1b[35;46m\x1b[39m");
        assert_eq!(sink.attributes(), 0x0007 | 0x0030);

        let (_, sink) = replay(b"\x1b[35;46m\x1b[49m");
        assert_eq!(sink.attributes(), 0x0005);
    }

    #[test]
    fn test_cursor_moves_clamp_to_window() {
        let (_, sink) = replay(b"\x1b[50A");
        assert_eq!(calls(&sink), &[Call::Cursor(Coord::new(10, 100))]);

        let (_, sink) = replay(b"\x1b[3B\x1b[500C\x1b[4D");
        assert_eq!(
            calls(&sink),
            &[
                Call::Cursor(Coord::new(10, 113)),
                Call::Cursor(Coord::new(79, 113)),
                Call::Cursor(Coord::new(75, 113)),
            ]
        );
    }

    #[test]
    fn test_cursor_to_is_one_based_and_window_relative() {
        let (_, sink) = replay(b"\x1b[1;1H\x1b[5;20f\x1b[99;999H\x1b[7G");
        assert_eq!(
            calls(&sink),
            &[
                Call::Cursor(Coord::new(0, 100)),
                Call::Cursor(Coord::new(19, 104)),
                Call::Cursor(Coord::new(79, 124)),
                Call::Cursor(Coord::new(6, 124)),
            ]
        );
    }

    #[test]
    fn test_cursor_line_moves_to_first_column() {
        let (_, sink) = replay(b"\x1b[2E\x1b[40F");
        assert_eq!(
            calls(&sink),
            &[Call::Cursor(Coord::new(0, 112)), Call::Cursor(Coord::new(0, 100))]
        );
    }

    #[test]
    fn test_erase_screen_regions() {
        let (_, sink) = replay(b"\x1b[2J");
        assert_eq!(
            calls(&sink),
            &[
                Call::FillAttribute(0x0007, 25 * 80, Coord::new(0, 100)),
                Call::FillCharacter(' ', 25 * 80, Coord::new(0, 100)),
            ]
        );

        let (_, sink) = replay(b"\x1b[1J");
        assert_eq!(calls(&sink)[0], Call::FillAttribute(0x0007, 10 * 80 + 11, Coord::new(0, 100)));

        let (_, sink) = replay(b"\x1b[J");
        assert_eq!(calls(&sink)[1], Call::FillCharacter(' ', 14 * 80 + 70, Coord::new(10, 110)));
    }

    #[test]
    fn test_erase_uses_original_attributes() {
        let (_, sink) = replay(b"\x1b[45m\x1b[K");
        assert_eq!(
            &calls(&sink)[1..],
            &[
                Call::FillAttribute(0x0007, 70, Coord::new(10, 110)),
                Call::FillCharacter(' ', 70, Coord::new(10, 110)),
            ]
        );
    }

    #[test]
    fn test_erase_line_regions() {
        let (_, sink) = replay(b"\x1b[1K\x1b[2K\x1b[3K");
        assert_eq!(
            calls(&sink),
            &[
                Call::FillAttribute(0x0007, 11, Coord::new(0, 110)),
                Call::FillCharacter(' ', 11, Coord::new(0, 110)),
                Call::FillAttribute(0x0007, 80, Coord::new(0, 110)),
                Call::FillCharacter(' ', 80, Coord::new(0, 110)),
            ]
        );
    }

    #[test]
    fn test_scroll_direction() {
        let window = Rect { left: 0, top: 100, right: 79, bottom: 124 };

        let (_, sink) = replay(b"\x1b[3S");
        assert_eq!(calls(&sink), &[Call::Scroll(window, Coord::new(0, 97), 0x0007)]);

        let (_, sink) = replay(b"\x1b[2T");
        assert_eq!(calls(&sink), &[Call::Scroll(window, Coord::new(0, 102), 0x0007)]);
    }

    #[test]
    fn test_restore_without_save_is_noop() {
        let (_, sink) = replay(b"\x1b[u");
        assert!(calls(&sink).is_empty());
    }

    #[test]
    fn test_save_and_restore_single_slot() {
        let (_, sink) = replay(b"\x1b[s\x1b[5;5H\x1b[s\x1b[10;10H\x1b[u");
        assert_eq!(calls(&sink).last(), Some(&Call::Cursor(Coord::new(4, 104))));
    }

    #[test]
    fn test_title_from_osc() {
        let (out, sink) = replay(b"\x1b]0;build\x07\x1b]7;file://x\x07done");
        assert_eq!(out, b"done");
        assert_eq!(calls(&sink), &[Call::Title("build".to_string())]);
    }
}
