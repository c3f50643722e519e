//! rawcon - exercise raw terminal input and ANSI output from the command line
//!
//! ```text
//! rawcon                  # Show each key as it is pressed, q to quit
//! rawcon --line           # Echo lines back until an empty line
//! rawcon --password       # Read a line without echo
//! rawcon --strip < log    # Remove escape sequences from stdin
//! rawcon --html < log     # Render colored stdin as HTML
//! ```

use std::env;
use std::io::{self, Read, Write};

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rawcon::config::{config_dir, Config};
use rawcon::input::{Terminal, TerminalType};
use rawcon::output::{console_writer, AnsiWriter, ConsoleTarget, HtmlSink, Passthrough, RESET_CODE};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Keys,
    Lines,
    Password,
    Strip,
    Html,
}

struct Args {
    mode: Mode,
    terminal_type: Option<TerminalType>,
    enable_ansi: Option<bool>,
    force_enable_ansi: bool,
    save_config: bool,
}

fn print_version() {
    eprintln!("rawcon {}", VERSION);
}

fn print_help() {
    eprintln!("rawcon {} - raw terminal input and ANSI-aware output", VERSION);
    eprintln!();
    eprintln!("Usage: rawcon [OPTIONS]");
    eprintln!();
    eprintln!("Modes:");
    eprintln!("  (default)             Show each key as it is pressed, q to quit");
    eprintln!("  -l, --line            Echo lines back until an empty line");
    eprintln!("  -p, --password        Read one line with echo off");
    eprintln!("  --strip               Copy stdin to stdout without escape sequences");
    eprintln!("  --html                Copy stdin to stdout as HTML");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -t, --terminal <TYPE> AUTO, UNIX, MACOS, WINDOWS or NONE");
    eprintln!("  --no-ansi             Strip escape sequences from output");
    eprintln!("  --force-ansi          Write escape sequences even to pipes");
    eprintln!("  --save-config         Write the effective settings to the config file");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.rawcon/config.toml (RAWCON_TERMINAL overrides terminal_type)");
    eprintln!("Log file:      ~/.rawcon/rawcon.log (level from RUST_LOG)");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args {
        mode: Mode::Keys,
        terminal_type: None,
        enable_ansi: None,
        force_enable_ansi: false,
        save_config: false,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-l" | "--line" => parsed.mode = Mode::Lines,
            "-p" | "--password" => parsed.mode = Mode::Password,
            "--strip" => parsed.mode = Mode::Strip,
            "--html" => parsed.mode = Mode::Html,
            "-t" | "--terminal" => {
                i += 1;
                let value = args.get(i).ok_or("Missing terminal type")?;
                parsed.terminal_type = Some(value.parse().map_err(|e| format!("{}", e))?);
            }
            "--no-ansi" => parsed.enable_ansi = Some(false),
            "--force-ansi" => parsed.force_enable_ansi = true,
            "--save-config" => parsed.save_config = true,
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn init_logging() {
    let log_path = config_dir()
        .map(|dir| dir.join("rawcon.log"))
        .unwrap_or_else(|| std::path::PathBuf::from("rawcon.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Show every key with its code until `q`
fn run_keys(terminal: &Terminal, out: &mut dyn Write) -> io::Result<()> {
    writeln!(
        out,
        "\x1b[1m{}\x1b[0m terminal, {}x{}. Press keys, \x1b[33mq\x1b[0m quits.",
        terminal.kind(),
        terminal.width(),
        terminal.height()
    )?;
    out.flush()?;

    while let Some(ch) = terminal.read() {
        if ch == 'q' {
            break;
        }
        writeln!(out, "\r\x1b[36m{:?}\x1b[0m = {}", ch, u32::from(ch))?;
        out.flush()?;
    }
    Ok(())
}

fn run_lines(terminal: &Terminal, out: &mut dyn Write) -> io::Result<()> {
    loop {
        write!(out, "\x1b[32m>\x1b[0m ")?;
        out.flush()?;

        let line = terminal.read_line_string();
        if line.is_empty() || line == "\n" {
            return Ok(());
        }
        writeln!(out, "\r\x1b[2K{}", line)?;
    }
}

fn run_password(terminal: &Terminal, out: &mut dyn Write) -> io::Result<()> {
    write!(out, "Password: ")?;
    out.flush()?;

    let password = terminal.read_password();
    writeln!(out)?;
    writeln!(out, "Read {} characters", password.len())?;
    out.write_all(RESET_CODE)?;
    out.flush()
}

fn copy_stdin<W: Write>(mut writer: W) -> io::Result<W> {
    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input)?;
    writer.write_all(&input)?;
    writer.flush()?;
    Ok(writer)
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("rawcon {} starting...", VERSION);

    let mut config = Config::load();
    if let Some(kind) = args.terminal_type {
        config.terminal_type = kind;
    }
    if let Some(enabled) = args.enable_ansi {
        config.enable_ansi = enabled;
    }
    config.force_enable_ansi |= args.force_enable_ansi;

    if args.save_config {
        config.save().map_err(anyhow::Error::msg)?;
        info!("Configuration saved");
    }

    match args.mode {
        Mode::Strip => {
            copy_stdin(AnsiWriter::new(io::stdout(), Passthrough)).context("Failed to strip stdin")?;
        }
        Mode::Html => {
            let (mut out, mut sink) = copy_stdin(AnsiWriter::new(io::stdout(), HtmlSink::new()))
                .context("Failed to render stdin")?
                .into_parts();
            sink.finish(&mut out)?;
            out.flush()?;
        }
        Mode::Keys | Mode::Lines | Mode::Password => {
            let terminal = Terminal::open(&config);
            let mut out = console_writer(ConsoleTarget::Stdout, &config);

            let result = match args.mode {
                Mode::Keys => run_keys(&terminal, &mut out),
                Mode::Lines => run_lines(&terminal, &mut out),
                _ => run_password(&terminal, &mut out),
            };

            terminal.shutdown();
            result.context("Terminal I/O failed")?;
        }
    }

    info!("rawcon exiting");
    Ok(())
}
