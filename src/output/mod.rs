pub mod command;
pub mod console;
pub mod html;
pub mod parser;
pub mod stream;

pub use command::{AnsiCommand, Arg, CommandSink, Direction, EraseMode, Passthrough, SinkError, SinkResult};
pub use console::{ConsoleBackend, NativeConsoleSink};
pub use html::HtmlSink;
pub use parser::EscapeParser;
pub use stream::{console_writer, output_mode, strip_ansi, AnsiWriter, ConsoleTarget, OutputMode, RESET_CODE};
