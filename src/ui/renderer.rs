//! Terminal renderer using crossterm
//!
//! Draws a [`Grid`] onto the host terminal. Each frame only the dirty cells
//! of the visible view are written. The cursor is redrawn whenever it moved
//! or changed visibility, even if no cell did.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen, LeaveAlternateScreen},
};

use vtgrid::core::term::{AttrFlags, Cell, Cursor, Grid, ViewMode};

/// Terminal renderer
#[derive(Default)]
pub struct Renderer {
    /// Whether the terminal has been initialized
    initialized: bool,
    /// Cursor as last drawn
    cursor: Option<Cursor>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter raw mode and the alternate screen.
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        self.initialized = true;
        self.cursor = None;
        Ok(())
    }

    /// Restore the host terminal.
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        self.cursor = None;

        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            ResetColor,
            SetAttribute(Attribute::Reset),
            Show,
            EnableLineWrap,
            LeaveAlternateScreen
        );
        let _ = stdout.flush();

        terminal::disable_raw_mode()
    }

    /// Draw one frame to stdout.
    pub fn render(&mut self, grid: &mut Grid) -> io::Result<()> {
        let stdout = io::stdout();
        let mut stdout = io::BufWriter::with_capacity(65536, stdout.lock());
        self.render_to(&mut stdout, grid)?;
        stdout.flush()
    }

    /// Host terminal size as `(cols, rows)`.
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    /// Write the dirty cells of `grid` and place the cursor.
    pub fn render_to<W: Write>(&mut self, out: &mut W, grid: &mut Grid) -> io::Result<()> {
        let cursor = grid.cursor();
        if grid.is_clean() && self.cursor == Some(cursor) {
            return Ok(());
        }

        // Synchronized update
        write!(out, "\x1b[?2026h")?;
        queue!(out, Hide)?;

        let mut result = Ok(());
        let mut last: Option<(usize, usize)> = None;
        grid.get_view(ViewMode::Dirty, |row, col, cell| {
            if result.is_err() {
                return;
            }
            result = draw_cell(out, row, col, cell, last);
            last = Some((row, col));
        });
        result?;

        queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;
        let (rows, cols) = grid.size();
        if !cursor.hidden && rows > 0 && cols > 0 {
            let col = cursor.col.min(cols - 1);
            queue!(out, MoveTo(to_u16(col), to_u16(cursor.row)), Show)?;
        }
        self.cursor = Some(cursor);

        write!(out, "\x1b[?2026l")
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

fn draw_cell<W: Write>(out: &mut W, row: usize, col: usize, cell: &Cell, last: Option<(usize, usize)>) -> io::Result<()> {
    // Consecutive cells need no cursor movement.
    let adjacent = matches!(last, Some((r, c)) if r == row && c + 1 == col);
    if !adjacent {
        queue!(out, MoveTo(to_u16(col), to_u16(row)))?;
    }
    apply_attrs(out, cell)?;
    queue!(out, Print(cell.rune))
}

fn apply_attrs<W: Write>(out: &mut W, cell: &Cell) -> io::Result<()> {
    queue!(out, SetAttribute(Attribute::Reset))?;

    let styles = [
        (AttrFlags::BOLD, Attribute::Bold),
        (AttrFlags::DIM, Attribute::Dim),
        (AttrFlags::ITALIC, Attribute::Italic),
        (AttrFlags::UNDERLINE, Attribute::Underlined),
        (AttrFlags::BLINK, Attribute::SlowBlink),
        (AttrFlags::INVERSE, Attribute::Reverse),
        (AttrFlags::HIDDEN, Attribute::Hidden),
        (AttrFlags::STRIKETHROUGH, Attribute::CrossedOut),
    ];
    for (flag, attribute) in styles {
        if cell.attrs.contains(flag) {
            queue!(out, SetAttribute(attribute))?;
        }
    }

    queue!(
        out,
        SetForegroundColor(cell.fg.to_crossterm()),
        SetBackgroundColor(cell.bg.to_crossterm())
    )
}

fn to_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}
