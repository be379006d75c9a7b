//! VT sequence parser
//!
//! [`VtParser`] runs the transition table one byte at a time and turns
//! dispatching actions into [`Event`]s. [`Parser`] wraps it in a reader
//! thread that pulls bytes from a source (normally a [`Session`]) and pushes
//! events onto a bounded queue.
//!
//! [`Session`]: crate::core::session::Session

use std::io::{self, Read};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::event::{Event, EventKind};
use super::queue::{self, EventReceiver, EventSender};
use super::table::{transition, Action, ParserState};
use crate::core::cancel::CancellationToken;

/// Where dispatched events go.
pub trait EventSink {
    fn dispatch(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn dispatch(&mut self, event: Event) {
        self.push(event);
    }
}

impl EventSink for EventSender {
    fn dispatch(&mut self, event: Event) {
        self.push(event);
    }
}

/// Buffers of the sequence currently being assembled.
#[derive(Default)]
struct Sequence {
    params: Vec<u8>,
    intermediates: Vec<u8>,
    raw: Vec<u8>,
}

impl Sequence {
    fn clear(&mut self) {
        self.params.clear();
        self.intermediates.clear();
    }

    fn reset(&mut self) {
        self.clear();
        self.raw.clear();
    }

    /// Move the buffers into an event and start over.
    fn finish(&mut self, kind: EventKind, byte: u8, final_byte: Option<u8>) -> Event {
        Event {
            kind,
            byte,
            ch: char::from(byte),
            params: std::mem::take(&mut self.params),
            intermediates: std::mem::take(&mut self.intermediates),
            final_byte,
            raw: std::mem::take(&mut self.raw),
        }
    }
}

/// A UTF-8 code point being assembled outside the transition table.
///
/// Continuation bytes overlap the C1 range, so once a lead byte is seen in
/// ground or inside an OSC string the rest of the code point bypasses
/// [`transition`].
#[derive(Default)]
struct Utf8 {
    buf: [u8; 4],
    len: usize,
    need: usize,
}

impl Utf8 {
    fn is_pending(&self) -> bool {
        self.need > 0
    }

    fn start(&mut self, lead: u8, need: usize) {
        self.buf[0] = lead;
        self.len = 1;
        self.need = need;
    }

    /// Append a continuation byte. Returns true once the code point is
    /// complete.
    fn push(&mut self, byte: u8) -> bool {
        self.buf[self.len] = byte;
        self.len += 1;
        self.len == self.need
    }

    fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Decode what has been collected. Overlong forms, surrogates and
    /// truncated sequences decode as U+FFFD.
    fn decode(&self) -> char {
        std::str::from_utf8(self.bytes())
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER)
    }

    fn clear(&mut self) {
        self.len = 0;
        self.need = 0;
    }
}

/// Length of the UTF-8 sequence started by `lead`.
fn utf8_len(lead: u8) -> Option<usize> {
    match lead {
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

fn is_continuation(byte: u8) -> bool {
    matches!(byte, 0x80..=0xBF)
}

/// Byte-at-a-time escape sequence state machine.
///
/// Holds no reference to its input, so a sequence split across two reads
/// resumes exactly where it stopped. Text in ground is decoded as UTF-8.
#[derive(Default)]
pub struct VtParser {
    state: ParserState,
    seq: Sequence,
    utf8: Utf8,
}

impl VtParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feed one byte and return the action that was performed.
    pub fn feed<S: EventSink + ?Sized>(&mut self, byte: u8, sink: &mut S) -> Action {
        match self.state {
            ParserState::Ground => {
                if let Some(action) = self.feed_text(byte, sink) {
                    return action;
                }
            }
            ParserState::OscString => {
                if let Some(action) = self.feed_osc_text(byte, sink) {
                    return action;
                }
            }
            _ => {}
        }

        let (next, action) = transition(self.state, byte);
        self.seq.raw.push(byte);
        self.act(action, byte, sink);
        self.state = next;

        if next == ParserState::OscString && action == Action::OscPut {
            if let Some(need) = utf8_len(byte) {
                self.utf8.start(byte, need);
            }
        }

        // Nothing is in flight on the ground state.
        if next == ParserState::Ground {
            self.seq.reset();
        }
        action
    }

    /// Feed every byte of `bytes` in order.
    pub fn advance<S: EventSink + ?Sized>(&mut self, bytes: &[u8], sink: &mut S) {
        for &byte in bytes {
            self.feed(byte, sink);
        }
    }

    /// UTF-8 decoding in ground. Returns `None` when `byte` belongs to the
    /// transition table.
    fn feed_text<S: EventSink + ?Sized>(&mut self, byte: u8, sink: &mut S) -> Option<Action> {
        if self.utf8.is_pending() {
            if is_continuation(byte) {
                if !self.utf8.push(byte) {
                    return Some(Action::Ignore);
                }
                sink.dispatch(Event::print(self.utf8.decode(), self.utf8.bytes()));
                self.utf8.clear();
                return Some(Action::Print);
            }
            // Truncated: replace what was collected, then handle `byte`.
            sink.dispatch(Event::print(char::REPLACEMENT_CHARACTER, self.utf8.bytes()));
            self.utf8.clear();
        }

        match byte {
            0xC2..=0xF4 => {
                if let Some(need) = utf8_len(byte) {
                    self.utf8.start(byte, need);
                }
                Some(Action::Ignore)
            }
            // Stray continuation bytes and bytes that never start a code point.
            0xA0..=0xC1 | 0xF5..=0xFF => {
                sink.dispatch(Event::print(char::REPLACEMENT_CHARACTER, &[byte]));
                Some(Action::Print)
            }
            _ => None,
        }
    }

    /// Continuation bytes of a code point inside an OSC string are payload,
    /// even when they fall in the C1 range.
    fn feed_osc_text<S: EventSink + ?Sized>(&mut self, byte: u8, sink: &mut S) -> Option<Action> {
        if !self.utf8.is_pending() {
            return None;
        }
        if !is_continuation(byte) {
            self.utf8.clear();
            return None;
        }
        if self.utf8.push(byte) {
            self.utf8.clear();
        }
        self.seq.raw.push(byte);
        sink.dispatch(Event::single(EventKind::OscPut, byte));
        Some(Action::OscPut)
    }

    fn act<S: EventSink + ?Sized>(&mut self, action: Action, byte: u8, sink: &mut S) {
        match action {
            Action::Clear => self.seq.clear(),
            Action::Collect => self.seq.intermediates.push(byte),
            Action::Param => self.seq.params.push(byte),
            Action::Ignore => {}

            Action::CsiDispatch => sink.dispatch(self.seq.finish(EventKind::CsiDispatch, byte, Some(byte))),
            Action::EscDispatch => sink.dispatch(self.seq.finish(EventKind::EscDispatch, byte, Some(byte))),
            Action::Hook => sink.dispatch(self.seq.finish(EventKind::Hook, byte, Some(byte))),
            Action::Unhook => sink.dispatch(self.seq.finish(EventKind::Unhook, byte, None)),
            Action::OscEnd => sink.dispatch(self.seq.finish(EventKind::OscEnd, byte, None)),

            Action::OscStart => {
                self.seq.clear();
                sink.dispatch(Event::single(EventKind::OscStart, byte));
            }
            // Controls executed inside a sequence leave it intact.
            Action::Print => sink.dispatch(Event::single(EventKind::Print, byte)),
            Action::Execute => sink.dispatch(Event::single(EventKind::Execute, byte)),
            Action::Put => sink.dispatch(Event::single(EventKind::Put, byte)),
            Action::OscPut => sink.dispatch(Event::single(EventKind::OscPut, byte)),
        }
    }
}

/// Tuning for [`Parser`].
#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    pub queue_capacity: usize,
    pub read_buffer_size: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            queue_capacity: queue::DEFAULT_CAPACITY,
            read_buffer_size: 4096,
        }
    }
}

/// A [`VtParser`] driven by a dedicated reader thread.
pub struct Parser {
    events: EventReceiver,
    sender: EventSender,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Parser {
    /// Start reading `source`. Parsing stops at end of stream, on a read
    /// error, or when `cancel` fires.
    pub fn new<R>(source: R, cancel: &CancellationToken) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        Self::with_options(source, cancel, ParserOptions::default())
    }

    pub fn with_options<R>(source: R, cancel: &CancellationToken, options: ParserOptions) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let cancel = cancel.child_token();
        let (sender, events) = queue::bounded_with_parent(options.queue_capacity, &cancel);

        let worker = {
            let sender = sender.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("vtgrid-reader".to_string())
                .spawn(move || read_loop(source, sender, cancel, options.read_buffer_size))?
        };

        Ok(Self {
            events,
            sender,
            cancel,
            worker: Some(worker),
        })
    }

    /// The ordered event stream.
    pub fn events(&self) -> &EventReceiver {
        &self.events
    }

    /// Stop parsing and close the queue. Events already queued can still
    /// be drained. The reader thread exits after its current read returns.
    pub fn close(&self) {
        self.cancel.cancel();
        self.sender.close();
    }

    /// Wait for the reader thread to exit.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("parser reader thread panicked");
            }
        }
    }
}

impl Drop for Parser {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop<R: Read>(mut source: R, mut sender: EventSender, cancel: CancellationToken, buffer_size: usize) {
    let mut parser = VtParser::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];

    while !cancel.is_cancelled() {
        match source.read(&mut buffer) {
            Ok(0) => {
                debug!("parser source reached end of stream");
                break;
            }
            Ok(n) => {
                parser.advance(&buffer[..n], &mut sender);
                if sender.is_closed() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("parser source read failed: {}", e);
                break;
            }
        }
    }

    if parser.state() != ParserState::Ground {
        debug!(state = %parser.state(), "input ended inside a sequence");
    }
    sender.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(bytes: &[u8]) -> Vec<Event> {
        let mut parser = VtParser::new();
        let mut events = Vec::new();
        parser.advance(bytes, &mut events);
        events
    }

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_csi_sgr_walkthrough() {
        let mut parser = VtParser::new();
        let mut events = Vec::new();
        let mut states = vec![parser.state()];
        for &b in b"\x1b[31m" {
            parser.feed(b, &mut events);
            states.push(parser.state());
        }
        assert_eq!(
            states,
            vec![
                ParserState::Ground,
                ParserState::Escape,
                ParserState::CsiEntry,
                ParserState::CsiParam,
                ParserState::CsiParam,
                ParserState::Ground,
            ]
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::CsiDispatch);
        assert_eq!(events[0].final_byte, Some(b'm'));
        assert_eq!(events[0].params, b"31");
        assert_eq!(events[0].raw, b"\x1b[31m");
    }

    #[test]
    fn test_printable_text_stays_ground() {
        let mut parser = VtParser::new();
        let mut events = Vec::new();
        for b in 0x20..=0x7Eu8 {
            parser.feed(b, &mut events);
            assert_eq!(parser.state(), ParserState::Ground);
        }
        assert_eq!(events.len(), 0x7F - 0x20);
        assert!(events.iter().all(|e| e.kind == EventKind::Print));
    }

    #[test]
    fn test_split_sequence_resumes() {
        let mut parser = VtParser::new();
        let mut split = Vec::new();
        parser.advance(b"\x1b[", &mut split);
        assert!(split.is_empty());
        parser.advance(b"31m", &mut split);
        assert_eq!(split, parse(b"\x1b[31m"));
    }

    #[test]
    fn test_private_mode_collects_marker() {
        let events = parse(b"\x1b[?25l");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].private_marker(), Some(b'?'));
        assert_eq!(events[0].numeric_params(), vec![25]);
        assert_eq!(events[0].final_byte, Some(b'l'));
    }

    #[test]
    fn test_execute_inside_csi_keeps_params() {
        let events = parse(b"\x1b[3\n1m");
        assert_eq!(kinds(&events), vec![EventKind::Execute, EventKind::CsiDispatch]);
        assert_eq!(events[0].byte, b'\n');
        assert_eq!(events[1].params, b"31");
    }

    #[test]
    fn test_escape_aborts_sequence() {
        let events = parse(b"\x1b[12\x1b[1m");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].params, b"1");
    }

    #[test]
    fn test_cancel_aborts_sequence() {
        let events = parse(b"\x1b[12\x18A");
        assert_eq!(kinds(&events), vec![EventKind::Execute, EventKind::Print]);
        assert_eq!(events[0].byte, 0x18);
    }

    #[test]
    fn test_esc_dispatch_with_intermediate() {
        let events = parse(b"\x1b(B");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::EscDispatch);
        assert_eq!(events[0].intermediates, b"(");
        assert_eq!(events[0].final_byte, Some(b'B'));
    }

    #[test]
    fn test_osc_title_bel() {
        let events = parse(b"\x1b]0;hi\x07");
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::OscStart,
                EventKind::OscPut,
                EventKind::OscPut,
                EventKind::OscPut,
                EventKind::OscPut,
                EventKind::OscEnd,
            ]
        );
        assert_eq!(events.last().unwrap().raw, b"\x1b]0;hi\x07");
    }

    #[test]
    fn test_osc_string_terminator_via_esc() {
        let events = parse(b"\x1b]2;t\x1b\\");
        assert_eq!(events.last().unwrap().kind, EventKind::EscDispatch);
        assert_eq!(events.last().unwrap().final_byte, Some(b'\\'));
    }

    #[test]
    fn test_dcs_hook_put_unhook() {
        let events = parse(b"\x901$qab\x9c");
        assert_eq!(
            kinds(&events),
            vec![EventKind::Hook, EventKind::Put, EventKind::Put, EventKind::Unhook]
        );
        assert_eq!(events[0].params, b"1");
        assert_eq!(events[0].intermediates, b"$");
        assert_eq!(events[0].final_byte, Some(b'q'));
        assert_eq!(events[3].raw, b"ab\x9c");
    }

    #[test]
    fn test_malformed_csi_is_ignored() {
        let events = parse(b"\x1b[1?2mX");
        assert_eq!(kinds(&events), vec![EventKind::Print]);
        assert_eq!(events[0].byte, b'X');
    }

    #[test]
    fn test_sos_string_is_discarded() {
        let events = parse(b"\x1bXsecret\x9cok");
        assert_eq!(kinds(&events), vec![EventKind::Print, EventKind::Print]);
    }

    #[test]
    fn test_unterminated_sequence_emits_nothing() {
        let mut parser = VtParser::new();
        let mut events = Vec::new();
        parser.advance(b"\x1b[1;2", &mut events);
        assert!(events.is_empty());
        assert_eq!(parser.state(), ParserState::CsiParam);
    }

    fn text(events: &[Event]) -> String {
        events
            .iter()
            .filter(|e| e.kind == EventKind::Print)
            .map(|e| e.rune())
            .collect()
    }

    #[test]
    fn test_utf8_prints_one_event_per_char() {
        let events = parse("❯ ls é".as_bytes());
        assert_eq!(kinds(&events), vec![EventKind::Print; 6]);
        assert_eq!(text(&events), "❯ ls é");
        assert_eq!(events[0].raw, "❯".as_bytes());
    }

    #[test]
    fn test_utf8_continuation_is_not_c1() {
        // U+275F contains 0x9D (OSC) and U+0153 contains 0x93.
        let mut parser = VtParser::new();
        let mut events = Vec::new();
        parser.advance("❯œ".as_bytes(), &mut events);
        assert_eq!(parser.state(), ParserState::Ground);
        assert_eq!(text(&events), "❯œ");
    }

    #[test]
    fn test_utf8_split_mid_char() {
        let bytes = "é❯😀".as_bytes();
        for cut in 0..=bytes.len() {
            let mut parser = VtParser::new();
            let mut split = Vec::new();
            parser.advance(&bytes[..cut], &mut split);
            parser.advance(&bytes[cut..], &mut split);
            assert_eq!(split, parse(bytes), "cut at {}", cut);
        }
        assert_eq!(text(&parse(bytes)), "é❯😀");
    }

    #[test]
    fn test_invalid_utf8_prints_replacement() {
        // Stray continuation, lone invalid lead, truncated by ASCII, truncated by ESC.
        let events = parse(b"\xA9a\xFFb\xE2\x9Dc\xC3\x1b[mZ");
        assert_eq!(text(&events), "\u{FFFD}a\u{FFFD}b\u{FFFD}c\u{FFFD}Z");
        assert_eq!(events[4].raw, b"\xE2\x9D");
        assert!(events.iter().any(|e| e.kind == EventKind::CsiDispatch));
    }

    #[test]
    fn test_surrogate_encoding_prints_replacement() {
        assert_eq!(text(&parse(b"\xED\xA0\x80")), "\u{FFFD}");
    }

    #[test]
    fn test_c1_controls_still_work_in_ground() {
        let events = parse(b"\x9b1mX");
        assert_eq!(kinds(&events), vec![EventKind::CsiDispatch, EventKind::Print]);
    }

    #[test]
    fn test_osc_utf8_payload_is_kept() {
        let mut parser = VtParser::new();
        let mut events = Vec::new();
        parser.advance("\x1b]2;❯ œ\x07".as_bytes(), &mut events);
        assert_eq!(parser.state(), ParserState::Ground);
        let payload: Vec<u8> = events
            .iter()
            .filter(|e| e.kind == EventKind::OscPut)
            .map(|e| e.byte)
            .collect();
        assert_eq!(payload, "2;❯ œ".as_bytes());
        assert_eq!(events.last().unwrap().kind, EventKind::OscEnd);
    }

    #[test]
    fn test_parser_thread_delivers_in_order() {
        let source = std::io::Cursor::new(b"ab\x1b[2Jc".to_vec());
        let cancel = CancellationToken::new();
        let mut parser = Parser::with_options(
            source,
            &cancel,
            ParserOptions {
                queue_capacity: 2,
                read_buffer_size: 3,
            },
        )
        .unwrap();
        let events: Vec<Event> = parser.events().iter().collect();
        parser.join();
        assert_eq!(
            kinds(&events),
            vec![EventKind::Print, EventKind::Print, EventKind::CsiDispatch, EventKind::Print]
        );
        assert_eq!(events[2].final_byte, Some(b'J'));
    }

    #[test]
    fn test_parser_close_ends_stream() {
        struct Endless;
        impl Read for Endless {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                std::thread::sleep(std::time::Duration::from_millis(1));
                buf[0] = b'x';
                Ok(1)
            }
        }

        let cancel = CancellationToken::new();
        let mut parser = Parser::new(Endless, &cancel).unwrap();
        assert!(parser.events().recv().is_some());
        parser.close();
        while parser.events().recv().is_some() {}
        parser.join();
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_parent_cancel_stops_parser() {
        let cancel = CancellationToken::new();
        let mut parser = Parser::new(std::io::repeat(b'y'), &cancel).unwrap();
        cancel.cancel();
        while parser.events().recv().is_some() {}
        parser.join();
    }

    proptest! {
        #[test]
        fn prop_split_anywhere_is_equivalent(bytes in proptest::collection::vec(any::<u8>(), 0..256), cut in 0usize..256) {
            let cut = cut.min(bytes.len());
            let whole = parse(&bytes);

            let mut parser = VtParser::new();
            let mut split = Vec::new();
            parser.advance(&bytes[..cut], &mut split);
            parser.advance(&bytes[cut..], &mut split);

            prop_assert_eq!(whole, split);
        }

        #[test]
        fn prop_events_follow_byte_order(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            // Tag each dispatch with the index of the byte that caused it.
            let mut parser = VtParser::new();
            let mut positions = Vec::new();
            for (i, &b) in bytes.iter().enumerate() {
                let mut events = Vec::new();
                parser.feed(b, &mut events);
                // A truncated code point is flushed ahead of the byte that cut it.
                prop_assert!(events.len() <= 2);
                positions.extend(events.iter().map(|_| i));
            }
            prop_assert!(positions.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(positions.len(), parse(&bytes).len());
        }

        #[test]
        fn prop_printable_ascii_prints_each_byte(text in "[ -~]{0,200}") {
            let events = parse(text.as_bytes());
            prop_assert_eq!(events.len(), text.len());
            for (ev, b) in events.iter().zip(text.bytes()) {
                prop_assert_eq!(ev.kind, EventKind::Print);
                prop_assert_eq!(ev.byte, b);
            }
        }
    }
}
