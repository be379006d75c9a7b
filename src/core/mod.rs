//! Core terminal emulation components.
//!
//! - **cancel**: shared cancellation token for every background thread
//! - **pty**: pseudo-terminal allocation and child process control
//! - **signals**: window-size and termination signal forwarders
//! - **session**: a shell under a pty with its own cancellation lifecycle
//! - **term**: escape sequence parser, event queue and cell grid
//! - **terminal**: the pipeline wiring a session to a grid
//!
//! # Architecture
//!
//! ```text
//! Terminal
//! ├── Session (shell under a pty, forwarders)
//! ├── Parser (reader thread) ──> event queue
//! └── consumer thread ──> Grid (cells, cursor, viewport)
//! ```

pub mod cancel;
pub mod pty;
pub mod session;
pub mod signals;
pub mod term;
pub mod terminal;
