//! Windows console input driver
//!
//! The input handle runs with every console mode flag cleared, so the console
//! does no line editing and no echo. Echo is done by hand on stdout.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Console::{
    GetConsoleMode, GetConsoleScreenBufferInfo, GetStdHandle, ReadConsoleInputW, SetConsoleMode,
    CONSOLE_MODE, CONSOLE_SCREEN_BUFFER_INFO, ENABLE_PROCESSED_INPUT, INPUT_RECORD, KEY_EVENT,
    STD_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};

use super::{translate_key, DriverError, Result, DEFAULT_HEIGHT, DEFAULT_WIDTH};

fn os_error(e: windows::core::Error) -> io::Error {
    io::Error::from_raw_os_error(e.code().0 & 0xFFFF)
}

fn std_handle(which: STD_HANDLE) -> Result<HANDLE> {
    let handle = unsafe { GetStdHandle(which) }.map_err(|e| DriverError::Handle(os_error(e)))?;
    if handle.is_invalid() {
        return Err(DriverError::NotATerminal);
    }
    Ok(handle)
}

/// Console input handle in raw mode
#[derive(Debug)]
pub struct WindowsDriver {
    input: HANDLE,
    output: HANDLE,
    original_mode: CONSOLE_MODE,
    echo: AtomicBool,
    /// Serializes read-modify-write of the console mode
    mode_lock: Mutex<()>,
}

// Safety: standard handles stay valid for the life of the process and the
// console API may be called on them from any thread
unsafe impl Send for WindowsDriver {}
unsafe impl Sync for WindowsDriver {}

impl WindowsDriver {
    pub fn open() -> Result<Self> {
        let input = std_handle(STD_INPUT_HANDLE)?;
        let output = std_handle(STD_OUTPUT_HANDLE)?;

        let mut original_mode = CONSOLE_MODE::default();
        // Fails when stdin is a pipe or file
        unsafe { GetConsoleMode(input, &mut original_mode) }.map_err(|_| DriverError::NotATerminal)?;

        unsafe { SetConsoleMode(input, CONSOLE_MODE(0)) }
            .map_err(|e| DriverError::Attributes(os_error(e)))?;

        Ok(Self {
            input,
            output,
            original_mode,
            echo: AtomicBool::new(false),
            mode_lock: Mutex::new(()),
        })
    }

    fn window_size(&self) -> Option<(u16, u16)> {
        let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();
        if let Err(e) = unsafe { GetConsoleScreenBufferInfo(self.output, &mut info) } {
            tracing::debug!("GetConsoleScreenBufferInfo failed: {}", e);
            return None;
        }

        let window = info.srWindow;
        let cols = i32::from(window.Right) - i32::from(window.Left) + 1;
        let rows = i32::from(window.Bottom) - i32::from(window.Top) + 1;
        Some((u16::try_from(rows).ok()?, u16::try_from(cols).ok()?)).filter(|(r, c)| *r > 0 && *c > 0)
    }

    pub fn width(&self) -> u16 {
        self.window_size().map_or(DEFAULT_WIDTH, |(_, cols)| cols)
    }

    pub fn height(&self) -> u16 {
        self.window_size().map_or(DEFAULT_HEIGHT, |(rows, _)| rows)
    }

    /// Console modes cannot echo without line input, so echo is ours to do
    pub fn set_echo_enabled(&self, enabled: bool) {
        self.echo.store(enabled, Ordering::SeqCst);
    }

    pub fn set_interrupt_enabled(&self, enabled: bool) {
        let _guard = self.mode_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut mode = CONSOLE_MODE::default();
        if let Err(e) = unsafe { GetConsoleMode(self.input, &mut mode) } {
            tracing::error!("Failed to get console mode: {}", e);
            return;
        }

        let mode = if enabled {
            mode | ENABLE_PROCESSED_INPUT
        } else {
            mode & !ENABLE_PROCESSED_INPUT
        };

        if let Err(e) = unsafe { SetConsoleMode(self.input, mode) } {
            tracing::error!("Can not set console mode: {}", e);
        }
    }

    pub fn restore(&self) -> Result<()> {
        unsafe { SetConsoleMode(self.input, self.original_mode) }.map_err(|e| DriverError::Restore(os_error(e)))
    }

    /// Next key-down character
    fn read_key(&self) -> Option<char> {
        let mut records = [INPUT_RECORD::default()];
        loop {
            let mut count = 0u32;
            if let Err(e) = unsafe { ReadConsoleInputW(self.input, &mut records, &mut count) } {
                tracing::debug!("ReadConsoleInputW failed: {}", e);
                return None;
            }

            for record in records.iter().take(count as usize) {
                if record.EventType as u32 != KEY_EVENT as u32 {
                    continue;
                }

                let key = unsafe { record.Event.KeyEvent };
                let unit = unsafe { key.uChar.UnicodeChar };
                if let Some(ch) = translate_key(key.bKeyDown.as_bool(), unit) {
                    return Some(ch);
                }
            }
        }
    }

    pub fn read_char(&self) -> Option<char> {
        let ch = self.read_key()?;

        if self.echo.load(Ordering::SeqCst) {
            let mut out = io::stdout().lock();
            let result = if ch == '\n' {
                writeln!(out)
            } else {
                write!(out, "{}", ch)
            };
            if let Err(e) = result.and_then(|_| out.flush()) {
                tracing::debug!("Echo failed: {}", e);
            }
        }

        Some(ch)
    }
}
