//! Escape sequence parsing and the cell grid it drives.
//!
//! - **table**: parser states, actions and the pure transition function
//! - **event**: owned snapshots of dispatched actions
//! - **queue**: bounded, ordered event queue with close semantics
//! - **parser**: byte-at-a-time machine and its reader thread
//! - **grid**: cell buffer, viewport and dirty tracking

pub mod event;
pub mod grid;
pub mod parser;
pub mod queue;
pub mod table;

pub use event::{Event, EventKind};
pub use grid::{AttrFlags, Cell, Color, Cursor, Grid, Response, ViewMode};
pub use parser::{EventSink, Parser, ParserOptions, VtParser};
pub use queue::{EventReceiver, EventSender};
pub use table::{transition, Action, ParserState};
