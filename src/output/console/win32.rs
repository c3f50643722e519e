//! Win32 screen buffer backend

use std::io;

use windows::core::PCWSTR;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Console::{
    FillConsoleOutputAttribute, FillConsoleOutputCharacterW, GetConsoleMode, GetConsoleScreenBufferInfo,
    GetStdHandle, ScrollConsoleScreenBufferW, SetConsoleCursorPosition, SetConsoleMode, SetConsoleTextAttribute,
    SetConsoleTitleW, CHAR_INFO, CHAR_INFO_0, CONSOLE_CHARACTER_ATTRIBUTES, CONSOLE_MODE,
    CONSOLE_SCREEN_BUFFER_INFO, COORD, ENABLE_VIRTUAL_TERMINAL_PROCESSING, SMALL_RECT, STD_ERROR_HANDLE,
    STD_HANDLE, STD_OUTPUT_HANDLE,
};

use super::{ConsoleBackend, Coord, Rect, ScreenSnapshot};
use crate::output::ConsoleTarget;

fn os_error(e: windows::core::Error) -> io::Error {
    io::Error::from_raw_os_error(e.code().0 & 0xFFFF)
}

fn std_handle(target: ConsoleTarget) -> STD_HANDLE {
    match target {
        ConsoleTarget::Stdout => STD_OUTPUT_HANDLE,
        ConsoleTarget::Stderr => STD_ERROR_HANDLE,
    }
}

fn open_handle(target: ConsoleTarget) -> io::Result<HANDLE> {
    let handle = unsafe { GetStdHandle(std_handle(target)) }.map_err(os_error)?;
    if handle.is_invalid() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "no console attached"));
    }
    Ok(handle)
}

/// Turn on native VT processing for `target`. Returns false on consoles
/// older than Windows 10, which need emulation instead.
pub fn enable_virtual_terminal(target: ConsoleTarget) -> bool {
    let Ok(handle) = open_handle(target) else {
        return false;
    };

    unsafe {
        let mut mode = CONSOLE_MODE::default();
        if GetConsoleMode(handle, &mut mode).is_err() {
            return false;
        }
        SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING).is_ok()
    }
}

fn to_coord(c: Coord) -> COORD {
    COORD { X: c.x, Y: c.y }
}

fn to_small_rect(r: Rect) -> SMALL_RECT {
    SMALL_RECT {
        Left: r.left,
        Top: r.top,
        Right: r.right,
        Bottom: r.bottom,
    }
}

/// Screen buffer behind stdout or stderr
#[derive(Debug)]
pub struct Win32Console {
    handle: HANDLE,
}

// Safety: the standard handle stays valid for the life of the process and the
// console API serializes access to it
unsafe impl Send for Win32Console {}

impl Win32Console {
    pub fn open(target: ConsoleTarget) -> io::Result<Self> {
        Ok(Self {
            handle: open_handle(target)?,
        })
    }
}

impl ConsoleBackend for Win32Console {
    fn screen_info(&mut self) -> io::Result<ScreenSnapshot> {
        let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();
        unsafe { GetConsoleScreenBufferInfo(self.handle, &mut info) }.map_err(os_error)?;

        Ok(ScreenSnapshot {
            cursor: Coord::new(info.dwCursorPosition.X, info.dwCursorPosition.Y),
            window: Rect {
                left: info.srWindow.Left,
                top: info.srWindow.Top,
                right: info.srWindow.Right,
                bottom: info.srWindow.Bottom,
            },
            size: Coord::new(info.dwSize.X, info.dwSize.Y),
            attributes: info.wAttributes.0,
        })
    }

    fn set_cursor_position(&mut self, position: Coord) -> io::Result<()> {
        unsafe { SetConsoleCursorPosition(self.handle, to_coord(position)) }.map_err(os_error)
    }

    fn set_text_attribute(&mut self, attributes: u16) -> io::Result<()> {
        unsafe { SetConsoleTextAttribute(self.handle, CONSOLE_CHARACTER_ATTRIBUTES(attributes)) }.map_err(os_error)
    }

    fn fill_attribute(&mut self, attributes: u16, length: u32, origin: Coord) -> io::Result<()> {
        let mut written = 0u32;
        unsafe { FillConsoleOutputAttribute(self.handle, attributes, length, to_coord(origin), &mut written) }
            .map_err(os_error)
    }

    fn fill_character(&mut self, ch: char, length: u32, origin: Coord) -> io::Result<()> {
        let mut units = [0u16; 2];
        let unit = ch.encode_utf16(&mut units)[0];
        let mut written = 0u32;
        unsafe { FillConsoleOutputCharacterW(self.handle, unit, length, to_coord(origin), &mut written) }
            .map_err(os_error)
    }

    fn scroll(&mut self, region: Rect, clip: Rect, destination: Coord, fill_attributes: u16) -> io::Result<()> {
        let region = to_small_rect(region);
        let clip = to_small_rect(clip);
        let fill = CHAR_INFO {
            Char: CHAR_INFO_0 { UnicodeChar: u16::from(b' ') },
            Attributes: fill_attributes,
        };

        unsafe {
            ScrollConsoleScreenBufferW(
                self.handle,
                &region,
                Some(&clip as *const SMALL_RECT),
                to_coord(destination),
                &fill,
            )
        }
        .map_err(os_error)
    }

    fn set_title(&mut self, title: &str) -> io::Result<()> {
        let wide: Vec<u16> = title.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe { SetConsoleTitleW(PCWSTR(wide.as_ptr())) }.map_err(os_error)
    }
}
