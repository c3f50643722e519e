pub mod driver;
pub mod line_buffered;
pub mod multiplexer;
pub mod terminal;

pub use driver::{DriverError, InputSource, RawModeDriver, DEFAULT_HEIGHT, DEFAULT_WIDTH};
pub use line_buffered::LineBufferedTerminal;
pub use multiplexer::{printable_width, spawn_reader, InputMultiplexer};
pub use terminal::{detect, HostOs, Terminal, TerminalReader, TerminalType, UnknownTerminalType};
