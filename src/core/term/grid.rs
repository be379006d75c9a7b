//! Cell grid
//!
//! A flat, growable buffer of cells looked at through a `rows` x `cols`
//! window. Lines scrolled off the top stay in the buffer as scroll-back and
//! the buffer never shrinks. The cursor addresses the bottom `rows` lines
//! (the live region); `view_offset` picks which lines are visible.

use bitflags::bitflags;
use tracing::{debug, warn};

use super::event::{Event, EventKind};

/// Longest OSC payload kept; the rest is dropped.
const MAX_OSC_LEN: usize = 4096;
const TAB_WIDTH: usize = 8;

/// Color definition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        match self {
            Color::Default => crossterm::style::Color::Reset,
            Color::Indexed(n) => crossterm::style::Color::AnsiValue(*n),
            Color::Rgb(r, g, b) => crossterm::style::Color::Rgb { r: *r, g: *g, b: *b },
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub rune: char,
    pub fg: Color,
    pub bg: Color,
    pub attrs: AttrFlags,
    dirty: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            rune: ' ',
            fg: Color::Default,
            bg: Color::Default,
            attrs: AttrFlags::empty(),
            dirty: false,
        }
    }
}

impl Cell {
    /// Changed since the last dirty-only view?
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn with_pen(rune: char, pen: &Pen) -> Self {
        Self {
            rune,
            fg: pen.fg,
            bg: pen.bg,
            attrs: pen.attrs,
            dirty: false,
        }
    }
}

/// Attributes applied to newly written cells (set by SGR).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Pen {
    fg: Color,
    bg: Color,
    attrs: AttrFlags,
}

/// Cursor position inside the live region.
///
/// `col` equals `cols` right after the last column was written; the next
/// printed character wraps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
    pub hidden: bool,
}

/// Response that needs to be sent back to the PTY
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(usize, usize),
    /// Operating status report: ESC [ 0 n
    Status,
    DeviceAttributes,
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::Status => b"\x1b[0n".to_vec(),
            // VT220
            Response::DeviceAttributes => b"\x1b[?62;c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewMode {
    /// Every visible cell
    All,
    /// Only dirty visible cells; each is cleaned after the visit
    Dirty,
}

pub struct Grid {
    rows: usize,
    cols: usize,
    cell_width: u32,
    cell_height: u32,
    cells: Vec<Cell>,
    cursor: Cursor,
    saved: Option<(Cursor, Pen)>,
    pen: Pen,
    view_offset: usize,
    dirty: usize,
    title: String,
    osc: Option<Vec<u8>>,
    /// Window background behind the cells
    pub background: Color,
}

impl Grid {
    /// A grid sized for a `width` x `height` pixel window.
    pub fn new(width: u32, height: u32, cell_width: u32, cell_height: u32) -> Self {
        let mut grid = Self {
            rows: 0,
            cols: 0,
            cell_width: 0,
            cell_height: 0,
            cells: Vec::new(),
            cursor: Cursor::default(),
            saved: None,
            pen: Pen::default(),
            view_offset: 0,
            dirty: 0,
            title: String::new(),
            osc: None,
            background: Color::Rgb(0, 0, 0),
        };
        grid.resize(width, height, cell_width, cell_height);
        grid
    }

    /// `(rows, cols)`
    pub fn size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// `(width, height)` of one cell in pixels
    pub fn cell_size(&self) -> (u32, u32) {
        (self.cell_width, self.cell_height)
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn view_offset(&self) -> usize {
        self.view_offset
    }

    /// Lines held by the buffer, scroll-back included.
    pub fn total_lines(&self) -> usize {
        if self.cols == 0 {
            0
        } else {
            self.cells.len() / self.cols
        }
    }

    /// Length of the backing buffer in cells.
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == 0
    }

    /// Recompute rows and columns for a new window size. The backing buffer
    /// grows as needed and never shrinks; the view snaps to the live region
    /// and is marked dirty.
    pub fn resize(&mut self, width: u32, height: u32, cell_width: u32, cell_height: u32) {
        if cell_width == 0 || cell_height == 0 {
            warn!(cell_width, cell_height, "ignoring resize with an empty cell size");
            return;
        }

        self.cell_width = cell_width;
        self.cell_height = cell_height;
        self.rows = (height / cell_height) as usize;
        self.cols = (width / cell_width) as usize;

        if self.cols > 0 {
            let wanted = self.cells.len().max(self.rows * self.cols);
            let padded = wanted.div_ceil(self.cols) * self.cols;
            self.cells.resize(padded, Cell::default());
        }

        self.cursor.row = self.cursor.row.min(self.rows.saturating_sub(1));
        self.cursor.col = self.cursor.col.min(self.cols.saturating_sub(1));
        self.view_offset = self.live_top();
        self.mark_view_dirty();
        debug!(rows = self.rows, cols = self.cols, cells = self.cells.len(), "grid resized");
    }

    /// Show the most recent `rows` lines.
    pub fn reset_view_offset(&mut self) {
        let top = self.live_top();
        if self.view_offset != top {
            self.view_offset = top;
            self.mark_view_dirty();
        }
    }

    /// Move the view by `delta` lines (negative is back in history),
    /// clamped to the buffer.
    pub fn scroll(&mut self, delta: isize) {
        if self.cols == 0 {
            return;
        }
        let max = self.live_top() as isize;
        let target = (self.view_offset as isize).saturating_add(delta).clamp(0, max) as usize;
        if target != self.view_offset {
            self.view_offset = target;
            self.mark_view_dirty();
        }
    }

    /// Visit visible cells in row-major order as `(row, col, cell)`.
    ///
    /// In [`ViewMode::Dirty`] only dirty cells are visited and each is
    /// cleaned after its visit. Dirty cells outside the view are cleaned
    /// too, so the grid is clean when this returns.
    pub fn get_view<F>(&mut self, mode: ViewMode, mut visit: F)
    where
        F: FnMut(usize, usize, &Cell),
    {
        let cols = self.cols;
        let start = self.view_offset * cols;
        let end = start + self.rows * cols;

        for idx in start..end {
            let cell = &mut self.cells[idx];
            if mode == ViewMode::Dirty && !cell.dirty {
                continue;
            }
            let offset = idx - start;
            visit(offset / cols, offset % cols, cell);
            if mode == ViewMode::Dirty {
                cell.dirty = false;
                self.dirty -= 1;
            }
        }

        if mode == ViewMode::Dirty && self.dirty > 0 {
            for cell in self.cells.iter_mut() {
                cell.dirty = false;
            }
            self.dirty = 0;
        }
    }

    /// Visible line `row`.
    pub fn line(&self, row: usize) -> Option<&[Cell]> {
        if row >= self.rows {
            return None;
        }
        let start = (self.view_offset + row) * self.cols;
        self.cells.get(start..start + self.cols)
    }

    /// Visible lines as text, trailing blanks trimmed.
    pub fn text(&self) -> Vec<String> {
        (0..self.rows)
            .filter_map(|row| self.line(row))
            .map(|line| {
                let s: String = line.iter().map(|c| c.rune).collect();
                s.trim_end().to_string()
            })
            .collect()
    }

    /// Apply one parser event. Returns a report when the event asks the
    /// terminal to answer.
    pub fn apply(&mut self, event: &Event) -> Option<Response> {
        let osc = self.osc.take();

        match event.kind {
            EventKind::Print => self.print(event.rune()),
            EventKind::Execute => self.execute(event.byte),
            EventKind::CsiDispatch => return self.csi_dispatch(event),
            EventKind::EscDispatch => {
                if event.final_byte == Some(b'\\') && event.intermediates.is_empty() {
                    // ESC \ is the string terminator.
                    if let Some(payload) = osc {
                        self.osc_dispatch(&payload);
                    }
                } else {
                    self.esc_dispatch(event);
                }
            }
            EventKind::OscStart => self.osc = Some(Vec::new()),
            EventKind::OscPut => {
                if let Some(mut payload) = osc {
                    if payload.len() < MAX_OSC_LEN {
                        payload.push(event.byte);
                    }
                    self.osc = Some(payload);
                }
            }
            EventKind::OscEnd => {
                if let Some(payload) = osc {
                    self.osc_dispatch(&payload);
                }
            }
            EventKind::Hook => debug!(final_byte = ?event.final_byte, "ignoring DCS string"),
            EventKind::Put | EventKind::Unhook => {}
        }
        None
    }

    fn live_top(&self) -> usize {
        self.total_lines().saturating_sub(self.rows)
    }

    fn index(&self, row: usize, col: usize) -> usize {
        (self.live_top() + row) * self.cols + col
    }

    fn has_area(&self) -> bool {
        self.rows > 0 && self.cols > 0
    }

    /// Cursor column with a pending wrap folded back onto the last column.
    fn cursor_col(&self) -> usize {
        self.cursor.col.min(self.cols.saturating_sub(1))
    }

    fn touch(&mut self, idx: usize) {
        let cell = &mut self.cells[idx];
        if !cell.dirty {
            cell.dirty = true;
            self.dirty += 1;
        }
    }

    fn put(&mut self, idx: usize, mut cell: Cell) {
        cell.dirty = self.cells[idx].dirty;
        self.cells[idx] = cell;
        self.touch(idx);
    }

    fn mark_view_dirty(&mut self) {
        let start = self.view_offset * self.cols;
        let end = (start + self.rows * self.cols).min(self.cells.len());
        for idx in start..end {
            self.touch(idx);
        }
    }

    fn blank(&self) -> Cell {
        Cell {
            bg: self.pen.bg,
            ..Cell::default()
        }
    }

    fn erase(&mut self, start: usize, end: usize) {
        let blank = self.blank();
        for idx in start..end.min(self.cells.len()) {
            self.put(idx, blank);
        }
    }

    fn print(&mut self, rune: char) {
        if !self.has_area() {
            return;
        }
        if self.cursor.col >= self.cols {
            self.cursor.col = 0;
            self.linefeed();
        }
        let idx = self.index(self.cursor.row, self.cursor.col);
        let cell = Cell::with_pen(rune, &self.pen);
        self.put(idx, cell);
        self.cursor.col += 1;
    }

    fn execute(&mut self, byte: u8) {
        if !self.has_area() {
            return;
        }
        match byte {
            b'\n' | 0x0B | 0x0C => self.linefeed(),
            b'\r' => self.cursor.col = 0,
            0x08 => self.cursor.col = self.cursor_col().saturating_sub(1),
            b'\t' => {
                let next = (self.cursor_col() / TAB_WIDTH + 1) * TAB_WIDTH;
                self.cursor.col = next.min(self.cols - 1);
            }
            0x07 => {}
            // IND, NEL, RI
            0x84 => self.linefeed(),
            0x85 => {
                self.cursor.col = 0;
                self.linefeed();
            }
            0x8D => self.reverse_index(),
            _ => debug!(byte, "ignoring control"),
        }
    }

    /// Move down one line, scrolling the live region at the last row.
    fn linefeed(&mut self) {
        self.cursor.col = self.cursor_col();
        if self.cursor.row + 1 < self.rows {
            self.cursor.row += 1;
            return;
        }

        let following = self.view_offset == self.live_top();
        let len = self.cells.len() + self.cols;
        let blank = self.blank();
        self.cells.resize(len, blank);
        if following {
            self.view_offset = self.live_top();
            self.mark_view_dirty();
        }
    }

    /// Move up one line, pushing the live region down at the top row.
    fn reverse_index(&mut self) {
        if self.cursor.row > 0 {
            self.cursor.row -= 1;
            return;
        }
        let top = self.index(0, 0);
        let end = top + self.rows * self.cols;
        for idx in (top + self.cols..end).rev() {
            let cell = self.cells[idx - self.cols];
            self.put(idx, cell);
        }
        self.erase(top, top + self.cols);
    }

    fn reset(&mut self) {
        self.pen = Pen::default();
        self.cursor = Cursor::default();
        self.saved = None;
        self.title.clear();
        if self.has_area() {
            let top = self.index(0, 0);
            self.erase(top, top + self.rows * self.cols);
        }
        self.reset_view_offset();
    }

    fn save_cursor(&mut self) {
        self.saved = Some((self.cursor, self.pen));
    }

    fn restore_cursor(&mut self) {
        let (cursor, pen) = self.saved.unwrap_or_default();
        self.pen = pen;
        self.cursor.row = cursor.row.min(self.rows.saturating_sub(1));
        self.cursor.col = cursor.col.min(self.cols.saturating_sub(1));
    }

    fn move_to(&mut self, row: usize, col: usize) {
        self.cursor.row = row.min(self.rows.saturating_sub(1));
        self.cursor.col = col.min(self.cols.saturating_sub(1));
    }

    fn esc_dispatch(&mut self, event: &Event) {
        if !event.intermediates.is_empty() {
            debug!(sequence = ?event.raw, "ignoring ESC sequence");
            return;
        }
        match event.final_byte {
            Some(b'7') => self.save_cursor(),
            Some(b'8') => self.restore_cursor(),
            Some(b'c') => self.reset(),
            Some(b'D') if self.has_area() => self.linefeed(),
            Some(b'E') if self.has_area() => {
                self.cursor.col = 0;
                self.linefeed();
            }
            Some(b'M') if self.has_area() => self.reverse_index(),
            _ => debug!(sequence = ?event.raw, "ignoring ESC sequence"),
        }
    }

    fn csi_dispatch(&mut self, event: &Event) -> Option<Response> {
        let marker = event.private_marker();
        let plain = event.intermediates.iter().all(|b| matches!(b, 0x3C..=0x3F));
        let final_byte = event.final_byte?;
        if !plain {
            debug!(sequence = ?event.raw, "ignoring CSI sequence");
            return None;
        }

        let n = |idx: usize| event.param_or(idx, 1) as usize;
        let row = self.cursor.row;
        let col = self.cursor_col();

        match (marker, final_byte) {
            (None, b'A') => self.move_to(row.saturating_sub(n(0)), col),
            (None, b'B' | b'e') => self.move_to(row.saturating_add(n(0)), col),
            (None, b'C' | b'a') => self.move_to(row, col.saturating_add(n(0))),
            (None, b'D') => self.move_to(row, col.saturating_sub(n(0))),
            (None, b'E') => self.move_to(row.saturating_add(n(0)), 0),
            (None, b'F') => self.move_to(row.saturating_sub(n(0)), 0),
            (None, b'G' | b'`') => self.move_to(row, n(0) - 1),
            (None, b'H' | b'f') => self.move_to(n(0) - 1, n(1) - 1),
            (None, b'd') => self.move_to(n(0) - 1, col),
            (None, b'J') => self.erase_in_display(event.param_or(0, 0)),
            (None, b'K') => self.erase_in_line(event.param_or(0, 0)),
            (None, b'X') => {
                if self.has_area() {
                    let start = self.index(row, col);
                    let end = self.index(row, 0) + self.cols;
                    self.erase(start, (start + n(0)).min(end));
                }
            }
            (None, b'm') => self.sgr(&event.numeric_params()),
            (None, b's') => self.save_cursor(),
            (None, b'u') => self.restore_cursor(),
            (None, b'n') => match event.param_or(0, 0) {
                5 => return Some(Response::Status),
                6 => return Some(Response::CursorPosition(row + 1, col + 1)),
                _ => {}
            },
            (None, b'c') if event.param_or(0, 0) == 0 => return Some(Response::DeviceAttributes),
            (Some(b'>'), b'c') => return Some(Response::SecondaryDeviceAttributes),
            (Some(b'?'), b'h' | b'l') => {
                let enable = final_byte == b'h';
                for mode in event.numeric_params() {
                    match mode {
                        25 => self.cursor.hidden = !enable,
                        _ => debug!(mode, enable, "ignoring private mode"),
                    }
                }
            }
            _ => debug!(sequence = ?event.raw, "ignoring CSI sequence"),
        }
        None
    }

    fn erase_in_display(&mut self, mode: u16) {
        if !self.has_area() {
            return;
        }
        let top = self.index(0, 0);
        let bottom = top + self.rows * self.cols;
        let here = self.index(self.cursor.row, self.cursor_col());
        match mode {
            0 => self.erase(here, bottom),
            1 => self.erase(top, here + 1),
            2 | 3 => self.erase(top, bottom),
            _ => {}
        }
    }

    fn erase_in_line(&mut self, mode: u16) {
        if !self.has_area() {
            return;
        }
        let start = self.index(self.cursor.row, 0);
        let end = start + self.cols;
        let here = start + self.cursor_col();
        match mode {
            0 => self.erase(here, end),
            1 => self.erase(start, here + 1),
            2 => self.erase(start, end),
            _ => {}
        }
    }

    fn sgr(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.pen = Pen::default();
            return;
        }

        let pen = &mut self.pen;
        let mut iter = params.iter().copied();
        while let Some(param) = iter.next() {
            match param {
                0 => *pen = Pen::default(),
                1 => pen.attrs |= AttrFlags::BOLD,
                2 => pen.attrs |= AttrFlags::DIM,
                3 => pen.attrs |= AttrFlags::ITALIC,
                4 => pen.attrs |= AttrFlags::UNDERLINE,
                5 => pen.attrs |= AttrFlags::BLINK,
                7 => pen.attrs |= AttrFlags::INVERSE,
                8 => pen.attrs |= AttrFlags::HIDDEN,
                9 => pen.attrs |= AttrFlags::STRIKETHROUGH,

                22 => pen.attrs &= !(AttrFlags::BOLD | AttrFlags::DIM),
                23 => pen.attrs &= !AttrFlags::ITALIC,
                24 => pen.attrs &= !AttrFlags::UNDERLINE,
                25 => pen.attrs &= !AttrFlags::BLINK,
                27 => pen.attrs &= !AttrFlags::INVERSE,
                28 => pen.attrs &= !AttrFlags::HIDDEN,
                29 => pen.attrs &= !AttrFlags::STRIKETHROUGH,

                30..=37 => pen.fg = Color::Indexed((param - 30) as u8),
                38 => {
                    if let Some(color) = extended_color(&mut iter) {
                        pen.fg = color;
                    }
                }
                39 => pen.fg = Color::Default,
                40..=47 => pen.bg = Color::Indexed((param - 40) as u8),
                48 => {
                    if let Some(color) = extended_color(&mut iter) {
                        pen.bg = color;
                    }
                }
                49 => pen.bg = Color::Default,
                90..=97 => pen.fg = Color::Indexed((param - 90 + 8) as u8),
                100..=107 => pen.bg = Color::Indexed((param - 100 + 8) as u8),
                _ => debug!(param, "ignoring SGR parameter"),
            }
        }
    }

    fn osc_dispatch(&mut self, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        match text.split_once(';') {
            Some(("0" | "1" | "2", title)) => self.title = title.to_string(),
            _ => debug!(payload = %text, "ignoring OSC string"),
        }
    }
}

/// `5;n` (256 colors) or `2;r;g;b` after a 38/48.
fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    match iter.next()? {
        5 => iter.next().map(|n| Color::Indexed(n as u8)),
        2 => {
            let r = iter.next().unwrap_or(0) as u8;
            let g = iter.next().unwrap_or(0) as u8;
            let b = iter.next().unwrap_or(0) as u8;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}
