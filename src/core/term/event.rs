//! Parser events
//!
//! An [`Event`] is an owned snapshot of one dispatched action. The parser
//! builds a fresh value for every dispatch, so nothing queued ever aliases
//! the parser's in-progress buffers.

use std::fmt;

/// Which dispatching action produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Print,
    Execute,
    CsiDispatch,
    EscDispatch,
    Hook,
    Put,
    Unhook,
    OscStart,
    OscPut,
    OscEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Print => "print",
            EventKind::Execute => "execute",
            EventKind::CsiDispatch => "csi.dispatch",
            EventKind::EscDispatch => "esc.dispatch",
            EventKind::Hook => "hook",
            EventKind::Put => "put",
            EventKind::Unhook => "unhook",
            EventKind::OscStart => "osc.start",
            EventKind::OscPut => "osc.put",
            EventKind::OscEnd => "osc.end",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// The byte that triggered the dispatch
    pub byte: u8,
    /// Character carried by the event. For a UTF-8 print this is the
    /// decoded code point, otherwise `byte` as Latin-1.
    pub ch: char,
    /// Parameter bytes in arrival order (`0-9`, `:`, `;`)
    pub params: Vec<u8>,
    /// Intermediate and private-marker bytes in arrival order
    pub intermediates: Vec<u8>,
    /// Final byte of a CSI/ESC/DCS header
    pub final_byte: Option<u8>,
    /// Bytes seen since the parser last reset, including `byte`
    pub raw: Vec<u8>,
}

impl Event {
    /// An event that carries only its triggering byte.
    pub fn single(kind: EventKind, byte: u8) -> Self {
        Self {
            kind,
            byte,
            ch: char::from(byte),
            params: Vec::new(),
            intermediates: Vec::new(),
            final_byte: None,
            raw: vec![byte],
        }
    }

    /// A print of a decoded multi-byte character. `raw` holds its UTF-8
    /// bytes, or the invalid bytes it replaces.
    pub fn print(ch: char, raw: &[u8]) -> Self {
        let byte = raw.last().copied().unwrap_or(b'?');
        Self {
            raw: raw.to_vec(),
            ch,
            ..Self::single(EventKind::Print, byte)
        }
    }

    /// The character to print.
    pub fn rune(&self) -> char {
        self.ch
    }

    /// Decode the parameter bytes as decimal numbers separated by `;` or
    /// `:`. Empty fields decode as 0 and values saturate at `u16::MAX`.
    pub fn numeric_params(&self) -> Vec<u16> {
        if self.params.is_empty() {
            return Vec::new();
        }

        let mut values = Vec::with_capacity(4);
        let mut current: u16 = 0;
        for &b in &self.params {
            match b {
                b'0'..=b'9' => {
                    current = current.saturating_mul(10).saturating_add(u16::from(b - b'0'));
                }
                _ => {
                    values.push(current);
                    current = 0;
                }
            }
        }
        values.push(current);
        values
    }

    /// Parameter `index`, with 0 and missing both meaning `default`.
    pub fn param_or(&self, index: usize, default: u16) -> u16 {
        match self.numeric_params().get(index).copied() {
            Some(0) | None => default,
            Some(v) => v,
        }
    }

    /// Private marker (`<`, `=`, `>`, `?`) collected at the start of a CSI.
    pub fn private_marker(&self) -> Option<u8> {
        self.intermediates
            .iter()
            .copied()
            .find(|b| matches!(b, 0x3C..=0x3F))
    }

    pub fn has_intermediate(&self, byte: u8) -> bool {
        self.intermediates.contains(&byte)
    }
}

fn quote(ch: Option<char>) -> String {
    match ch {
        Some(c) => format!("{:?}", c.to_string()),
        None => "\"\"".to_string(),
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "] {:<12}: v={:<6} F={:<6} P={:?} I={:?}",
            self.kind.as_str(),
            quote(Some(self.ch)),
            quote(self.final_byte.map(char::from)),
            self.params,
            self.intermediates
        )
    }
}
