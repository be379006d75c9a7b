//! VT500-style parser transition table
//!
//! The table is a pure function of `(state, byte)`. A handful of bytes
//! (CAN, SUB, ESC and the C1 controls) are resolved before the per-state
//! rules so any sequence can be abandoned from any state. Anything that has
//! no rule leaves the state alone and is ignored, which keeps the function
//! total over all 256 byte values.

use std::fmt;

/// Parser state. Exactly one is current at a time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    OscString,
    DcsEntry,
    DcsParam,
    DcsIntermediate,
    DcsPassthrough,
    DcsIgnore,
    SosPmApcString,
}

impl ParserState {
    pub const ALL: [ParserState; 14] = [
        ParserState::Ground,
        ParserState::Escape,
        ParserState::EscapeIntermediate,
        ParserState::CsiEntry,
        ParserState::CsiParam,
        ParserState::CsiIntermediate,
        ParserState::CsiIgnore,
        ParserState::OscString,
        ParserState::DcsEntry,
        ParserState::DcsParam,
        ParserState::DcsIntermediate,
        ParserState::DcsPassthrough,
        ParserState::DcsIgnore,
        ParserState::SosPmApcString,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParserState::Ground => "ground",
            ParserState::Escape => "escape",
            ParserState::EscapeIntermediate => "escape-intermediate",
            ParserState::CsiEntry => "csi-entry",
            ParserState::CsiParam => "csi-param",
            ParserState::CsiIntermediate => "csi-intermediate",
            ParserState::CsiIgnore => "csi-ignore",
            ParserState::OscString => "osc-string",
            ParserState::DcsEntry => "dcs-entry",
            ParserState::DcsParam => "dcs-param",
            ParserState::DcsIntermediate => "dcs-intermediate",
            ParserState::DcsPassthrough => "dcs-passthrough",
            ParserState::DcsIgnore => "dcs-ignore",
            ParserState::SosPmApcString => "sos-pm-apc",
        }
    }
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with the byte that caused a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Reset parameters and intermediates for a new sequence
    Clear,
    /// Append to intermediates
    Collect,
    /// Append to parameters
    Param,
    Print,
    Execute,
    Put,
    Hook,
    Unhook,
    OscStart,
    OscPut,
    OscEnd,
    CsiDispatch,
    EscDispatch,
    /// Consume the byte with no effect
    Ignore,
}

impl Action {
    /// Does this action hand an event to the queue?
    pub fn dispatches(&self) -> bool {
        !matches!(
            self,
            Action::Clear | Action::Collect | Action::Param | Action::Ignore
        )
    }
}

/// Byte classes used by the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteClass {
    /// 0x00-0x17, 0x19, 0x1C-0x1F
    C0,
    /// CAN (0x18) and SUB (0x1A)
    Cancel,
    /// 0x1B
    Escape,
    /// 0x20-0x2F
    Intermediate,
    /// 0x30-0x3B: digits, `:` and `;`
    Param,
    /// 0x3C-0x3F: `<`, `=`, `>`, `?`
    Private,
    /// 0x40-0x7E
    Final,
    /// 0x7F
    Delete,
    /// 0x80-0x9F
    C1,
    /// 0xA0-0xFF
    High,
}

pub fn classify(byte: u8) -> ByteClass {
    match byte {
        0x18 | 0x1A => ByteClass::Cancel,
        0x1B => ByteClass::Escape,
        0x00..=0x1F => ByteClass::C0,
        0x20..=0x2F => ByteClass::Intermediate,
        0x30..=0x3B => ByteClass::Param,
        0x3C..=0x3F => ByteClass::Private,
        0x40..=0x7E => ByteClass::Final,
        0x7F => ByteClass::Delete,
        0x80..=0x9F => ByteClass::C1,
        0xA0..=0xFF => ByteClass::High,
    }
}

const ST: u8 = 0x9C;
const BEL: u8 = 0x07;

/// Compute the next state and the action for `byte`.
pub fn transition(state: ParserState, byte: u8) -> (ParserState, Action) {
    if let Some(next) = anywhere(state, byte) {
        return next;
    }
    per_state(state, byte).unwrap_or((state, Action::Ignore))
}

/// Transitions that apply no matter which state is current.
fn anywhere(state: ParserState, byte: u8) -> Option<(ParserState, Action)> {
    use ParserState::*;

    let next = match byte {
        0x18 | 0x1A => (Ground, Action::Execute),
        0x1B => (Escape, Action::Clear),
        0x90 => (DcsEntry, Action::Clear),
        0x9B => (CsiEntry, Action::Clear),
        0x9D => (OscString, Action::OscStart),
        0x98 | 0x9E | 0x9F => (SosPmApcString, Action::Ignore),
        ST => match state {
            OscString => (Ground, Action::OscEnd),
            DcsPassthrough => (Ground, Action::Unhook),
            _ => (Ground, Action::Ignore),
        },
        0x80..=0x9F => (Ground, Action::Execute),
        _ => return None,
    };
    Some(next)
}

fn per_state(state: ParserState, byte: u8) -> Option<(ParserState, Action)> {
    use ByteClass as B;
    use ParserState::*;

    let class = classify(byte);
    let next = match state {
        Ground => match class {
            B::C0 => (Ground, Action::Execute),
            B::Intermediate | B::Param | B::Private | B::Final | B::High => (Ground, Action::Print),
            _ => return None,
        },

        Escape => match (class, byte) {
            (B::C0, _) => (Escape, Action::Execute),
            (B::Intermediate, _) => (EscapeIntermediate, Action::Collect),
            (_, b'[') => (CsiEntry, Action::Clear),
            (_, b']') => (OscString, Action::OscStart),
            (_, b'P') => (DcsEntry, Action::Clear),
            (_, b'X' | b'^' | b'_') => (SosPmApcString, Action::Ignore),
            (B::Param | B::Private | B::Final, _) => (Ground, Action::EscDispatch),
            _ => return None,
        },

        EscapeIntermediate => match class {
            B::C0 => (EscapeIntermediate, Action::Execute),
            B::Intermediate => (EscapeIntermediate, Action::Collect),
            B::Param | B::Private | B::Final => (Ground, Action::EscDispatch),
            _ => return None,
        },

        CsiEntry => match class {
            B::C0 => (CsiEntry, Action::Execute),
            B::Intermediate => (CsiIntermediate, Action::Collect),
            B::Param => (CsiParam, Action::Param),
            B::Private => (CsiParam, Action::Collect),
            B::Final => (Ground, Action::CsiDispatch),
            _ => return None,
        },

        CsiParam => match class {
            B::C0 => (CsiParam, Action::Execute),
            B::Param => (CsiParam, Action::Param),
            B::Private => (CsiIgnore, Action::Ignore),
            B::Intermediate => (CsiIntermediate, Action::Collect),
            B::Final => (Ground, Action::CsiDispatch),
            _ => return None,
        },

        CsiIntermediate => match class {
            B::C0 => (CsiIntermediate, Action::Execute),
            B::Intermediate => (CsiIntermediate, Action::Collect),
            B::Param | B::Private => (CsiIgnore, Action::Ignore),
            B::Final => (Ground, Action::CsiDispatch),
            _ => return None,
        },

        CsiIgnore => match class {
            B::C0 => (CsiIgnore, Action::Execute),
            B::Final => (Ground, Action::Ignore),
            _ => return None,
        },

        OscString => match (class, byte) {
            (_, BEL) => (Ground, Action::OscEnd),
            (B::Intermediate | B::Param | B::Private | B::Final | B::High, _) => {
                (OscString, Action::OscPut)
            }
            _ => return None,
        },

        DcsEntry => match class {
            B::Intermediate => (DcsIntermediate, Action::Collect),
            B::Param => (DcsParam, Action::Param),
            B::Private => (DcsParam, Action::Collect),
            B::Final => (DcsPassthrough, Action::Hook),
            _ => return None,
        },

        DcsParam => match class {
            B::Param => (DcsParam, Action::Param),
            B::Private => (DcsIgnore, Action::Ignore),
            B::Intermediate => (DcsIntermediate, Action::Collect),
            B::Final => (DcsPassthrough, Action::Hook),
            _ => return None,
        },

        DcsIntermediate => match class {
            B::Intermediate => (DcsIntermediate, Action::Collect),
            B::Param | B::Private => (DcsIgnore, Action::Ignore),
            B::Final => (DcsPassthrough, Action::Hook),
            _ => return None,
        },

        DcsPassthrough => match class {
            B::C0 | B::Intermediate | B::Param | B::Private | B::Final | B::High => {
                (DcsPassthrough, Action::Put)
            }
            _ => return None,
        },

        DcsIgnore | SosPmApcString => return None,
    };
    Some(next)
}
