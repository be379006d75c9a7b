//! Terminal pipeline
//!
//! Wires a [`Session`] to a [`Grid`]:
//!
//! ```text
//! shell ──> Session ──> Parser (reader thread) ──> queue ──> consumer ──> Grid
//!              ^                                                │
//!              └──────────── device reports ────────────────────┘
//! ```
//!
//! The consumer is the only writer of the grid. Readers (a renderer, the
//! `--dump` driver) lock the shared handle.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use portable_pty::ExitStatus;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::session::{self, Session, SessionError, SessionOptions};
use super::term::grid::Grid;
use super::term::parser::{Parser, ParserOptions};
use super::term::queue::EventReceiver;
use crate::config::Config;

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to start pipeline thread: {0}")]
    Thread(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, TerminalError>;

#[derive(Debug, Clone)]
pub struct TerminalOptions {
    pub session: SessionOptions,
    pub parser: ParserOptions,
    /// Window size in pixels
    pub window_width: u32,
    pub window_height: u32,
    /// Cell size in pixels
    pub cell_width: u32,
    pub cell_height: u32,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            parser: ParserOptions::default(),
            window_width: 1024,
            window_height: 768,
            cell_width: 10,
            cell_height: 20,
        }
    }
}

pub struct Terminal {
    session: Session,
    parser: Parser,
    grid: Arc<Mutex<Grid>>,
    consumer: Option<JoinHandle<()>>,
    cell_width: u32,
    cell_height: u32,
}

impl Terminal {
    /// Start the configured shell.
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with(&config.shell(), &config.args, &config.terminal_options())
    }

    pub fn open_with(shell: &str, args: &[String], options: &TerminalOptions) -> Result<Self> {
        let grid = Grid::new(
            options.window_width,
            options.window_height,
            options.cell_width,
            options.cell_height,
        );

        // Start the shell at the grid's size when the window holds any cells.
        let mut session_options = options.session.clone();
        let (rows, cols) = grid.size();
        if rows > 0 && cols > 0 {
            session_options.rows = clamp_u16(rows);
            session_options.cols = clamp_u16(cols);
        }

        let session = Session::open_with(shell, args, &session_options)?;
        let parser = Parser::with_options(session.clone(), session.cancel_token(), options.parser)
            .map_err(TerminalError::Thread)?;
        let grid = Arc::new(Mutex::new(grid));

        let consumer = {
            let events = parser.events().clone();
            let grid = grid.clone();
            let session = session.clone();
            thread::Builder::new()
                .name("vtgrid-consumer".to_string())
                .spawn(move || consume(events, grid, session))
                .map_err(TerminalError::Thread)?
        };

        info!(shell, rows, cols, "terminal opened");
        Ok(Self {
            session,
            parser,
            grid,
            consumer: Some(consumer),
            cell_width: options.cell_width,
            cell_height: options.cell_height,
        })
    }

    /// Send input to the shell.
    pub fn write(&self, data: &[u8]) -> session::Result<()> {
        self.session.write_all(data)
    }

    /// Resize the grid for a new window size and the pty to match.
    pub fn resize_window(&self, width: u32, height: u32) -> session::Result<()> {
        let (rows, cols) = {
            let mut grid = self.grid.lock();
            grid.resize(width, height, self.cell_width, self.cell_height);
            grid.size()
        };
        if rows == 0 || cols == 0 {
            debug!(width, height, "window too small for a single cell");
            return Ok(());
        }
        self.session.resize(clamp_u16(rows), clamp_u16(cols))
    }

    /// Shared handle to the grid.
    pub fn grid(&self) -> Arc<Mutex<Grid>> {
        self.grid.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Wait for the shell to exit and for its output to be applied.
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.session.wait()?;
        self.join();
        Ok(status)
    }

    /// Kill the shell and stop the pipeline. Idempotent.
    pub fn close(&mut self) {
        self.session.close();
        self.parser.close();
        self.join();
    }

    fn join(&mut self) {
        self.parser.join();
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                warn!("event consumer panicked");
            }
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.close();
    }
}

fn consume(events: EventReceiver, grid: Arc<Mutex<Grid>>, session: Session) {
    for event in &events {
        let response = grid.lock().apply(&event);
        if let Some(response) = response {
            if let Err(e) = session.write_all(&response.to_bytes()) {
                debug!("dropping device report: {}", e);
            }
        }
    }
    debug!("event consumer finished");
}

fn clamp_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}
