//! vtgrid - run a shell through the vtgrid terminal engine
//!
//! The shell's output is parsed into events and applied to a cell grid,
//! which is drawn onto the host terminal.
//!
//! # Quick Start
//!
//! ```text
//! vtgrid                  # Run $SHELL
//! vtgrid -s /bin/bash     # Run a specific shell
//! vtgrid --events         # Print parser events instead of drawing
//! vtgrid --dump -- -c ls  # Print the final screen on exit
//! ```

mod ui;

use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use crossterm::terminal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vtgrid::config::Config;
use vtgrid::core::session::Session;
use vtgrid::core::term::Parser;
use vtgrid::core::terminal::Terminal;

use crate::ui::Renderer;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Delay between frames
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct CliOptions {
    /// Shell command, overrides the config file
    shell: Option<String>,
    /// Config file to use instead of ~/.vtgrid/config.toml
    config_path: Option<PathBuf>,
    /// Print parser events instead of drawing the grid
    events: bool,
    /// Print the visible grid after the shell exits
    dump: bool,
    /// Arguments after `--`, passed to the shell
    args: Vec<String>,
}

impl CliOptions {
    fn apply(&self, config: &mut Config) {
        if let Some(ref shell) = self.shell {
            config.shell = Some(shell.clone());
        }
        if !self.args.is_empty() {
            config.args = self.args.clone();
        }
    }
}

fn print_version() {
    eprintln!("vtgrid {}", VERSION);
}

fn print_help() {
    eprintln!("vtgrid {} - terminal emulation engine", VERSION);
    eprintln!();
    eprintln!("Usage: vtgrid [OPTIONS] [-- SHELL_ARGS...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <CMD>     Shell to run (default: config, $SHELL, /bin/sh)");
    eprintln!("  -c, --config <PATH>   Config file (default: ~/.vtgrid/config.toml)");
    eprintln!("      --events          Print parser events instead of drawing");
    eprintln!("      --dump            Print the screen after the shell exits");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Log file: ~/.vtgrid/vtgrid.log (level from config, RUST_LOG overrides)");
}

fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut i = 0;

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
            "-s" | "--shell" => {
                i += 1;
                let shell = args.get(i).ok_or("Missing shell argument")?;
                options.shell = Some(shell.clone());
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("Missing config path")?;
                options.config_path = Some(PathBuf::from(path));
            }
            "--events" => options.events = true,
            "--dump" => options.dump = true,
            "--" => {
                options.args = args[i + 1..].to_vec();
                break;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

fn init_logging(config: &Config) {
    let log_path = Config::data_dir()
        .map(|dir| dir.join("vtgrid.log"))
        .unwrap_or_else(|| PathBuf::from("vtgrid.log"));

    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    // Open log file (append mode)
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let mut config = match cli.config_path {
        Some(ref path) => {
            Config::load_from(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::load(),
    };
    cli.apply(&mut config);

    init_logging(&config);
    info!("vtgrid {} starting", VERSION);

    let result = if cli.events {
        run_events(&config)
    } else {
        run_terminal(&config, cli.dump)
    };
    if let Err(ref e) = result {
        error!("{:#}", e);
    }
    result
}

/// Raw mode for the lifetime of the value.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Copy our stdin to the shell until either side closes.
fn spawn_input_forwarder(session: Session) -> io::Result<()> {
    thread::Builder::new()
        .name("vtgrid-stdin".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = session.write_all(&buf[..n]) {
                            debug!("input forwarding stopped: {}", e);
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

/// Trace mode: print every parser event, one per line.
fn run_events(config: &Config) -> anyhow::Result<()> {
    let shell = config.shell();
    let mut options = config.session_options();
    if let Ok((cols, rows)) = Renderer::size() {
        options.rows = rows;
        options.cols = cols;
    }

    let session = Session::open_with(&shell, &config.args, &options)
        .with_context(|| format!("failed to start {}", shell))?;
    let mut parser = Parser::with_options(session.clone(), session.cancel_token(), config.parser_options())
        .context("failed to start parser")?;

    let raw = RawMode::enable()?;
    spawn_input_forwarder(session.clone())?;

    let stdout = io::stdout();
    for event in parser.events() {
        let mut out = stdout.lock();
        write!(out, "{}\r\n", event)?;
        out.flush()?;
    }

    parser.join();
    drop(raw);
    session.close();
    info!("shell exited");
    Ok(())
}

/// Default mode: draw the grid onto the host terminal.
fn run_terminal(config: &Config, dump: bool) -> anyhow::Result<()> {
    let size = Renderer::size().unwrap_or((config.pty.cols, config.pty.rows));
    let mut options = config.terminal_options();
    options.window_width = u32::from(size.0) * config.cell.width;
    options.window_height = u32::from(size.1) * config.cell.height;
    // The frame loop resizes grid and pty together.
    options.session.follow_window_size = false;

    let shell = config.shell();
    let mut terminal =
        Terminal::open_with(&shell, &config.args, &options).with_context(|| format!("failed to start {}", shell))?;

    let mut renderer = Renderer::new();
    renderer.init()?;
    spawn_input_forwarder(terminal.session().clone())?;

    let mut result = frame_loop(&terminal, &mut renderer, config, size);
    if result.is_ok() {
        // Let the pipeline apply the shell's last output before the final frame.
        result = match terminal.wait() {
            Ok(_) => renderer.render(&mut terminal.grid().lock()).map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
    }

    renderer.cleanup()?;
    terminal.close();
    result?;

    if dump {
        let grid = terminal.grid();
        let grid = grid.lock();
        let mut stdout = io::stdout().lock();
        for line in grid.text() {
            writeln!(stdout, "{}", line)?;
        }
    }
    info!("shell exited");
    Ok(())
}

fn frame_loop(terminal: &Terminal, renderer: &mut Renderer, config: &Config, mut size: (u16, u16)) -> anyhow::Result<()> {
    let grid = terminal.grid();
    loop {
        let exited = terminal.session().try_wait()?.is_some();

        if let Ok(now) = Renderer::size() {
            if now != size {
                size = now;
                debug!(cols = now.0, rows = now.1, "host terminal resized");
                terminal.resize_window(
                    u32::from(now.0) * config.cell.width,
                    u32::from(now.1) * config.cell.height,
                )?;
            }
        }

        renderer.render(&mut grid.lock())?;
        if exited {
            return Ok(());
        }
        thread::sleep(FRAME_INTERVAL);
    }
}
