//! rawcon - raw keyboard input and ANSI-aware output for terminals
//!
//! rawcon works the same on POSIX ttys, macOS terminals, and the Windows
//! console, and degrades gracefully when stdin or stdout is not a terminal.
//!
//! # Input
//!
//! [`input::Terminal`] switches the terminal to unbuffered mode and lets any
//! number of threads block for the next keystroke or the next line:
//!
//! ```no_run
//! use rawcon::{Config, Terminal};
//!
//! let config = Config::load();
//! let terminal = Terminal::open(&config);
//! if let Some(key) = terminal.read() {
//!     println!("pressed {:?}", key);
//! }
//! terminal.shutdown();
//! ```
//!
//! # Output
//!
//! [`output::AnsiWriter`] decodes escape sequences on their way to a stream
//! and hands them to a [`output::CommandSink`]. That is how sequences are
//! stripped for pipes, rendered as HTML, or replayed through the console API
//! on Windows consoles without VT support.
//!
//! ```
//! assert_eq!(rawcon::output::strip_ansi(b"\x1b[1mbold\x1b[0m"), b"bold");
//! ```

pub mod config;
pub mod input;
pub mod output;

pub use config::Config;
pub use input::{Terminal, TerminalType};
pub use output::{console_writer, AnsiWriter, CommandSink, ConsoleTarget};
