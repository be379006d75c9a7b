//! vtgrid - terminal emulation engine
//!
//! Runs a shell under a pseudo-terminal, parses its output with a VT500
//! style state machine and applies the resulting events to a cell grid.
//!
//! ```no_run
//! use vtgrid::config::Config;
//! use vtgrid::core::terminal::Terminal;
//!
//! let mut terminal = Terminal::open(&Config::default())?;
//! terminal.write(b"echo hello\nexit\n")?;
//! terminal.wait()?;
//! println!("{:?}", terminal.grid().lock().text());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod core;

pub use crate::config::Config;
pub use crate::core::session::{Session, SessionError, SessionOptions};
pub use crate::core::term::{Event, EventKind, Grid, Parser, VtParser};
pub use crate::core::terminal::{Terminal, TerminalError, TerminalOptions};
