//! Bounded, ordered event queue between the parser and its consumer.
//!
//! `push` blocks while the queue is full. Once the queue is closed, `push`
//! does nothing and the receiver keeps yielding whatever was already queued
//! before it reports the end of the stream.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::event::Event;
use crate::core::cancel::CancellationToken;

pub const DEFAULT_CAPACITY: usize = 256;

/// Create a queue holding at most `capacity` events.
pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
    with_token(capacity, CancellationToken::new())
}

/// Like [`bounded`], but the queue also closes when `parent` is cancelled.
pub fn bounded_with_parent(capacity: usize, parent: &CancellationToken) -> (EventSender, EventReceiver) {
    with_token(capacity, parent.child_token())
}

fn with_token(capacity: usize, closed: CancellationToken) -> (EventSender, EventReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        EventSender {
            tx,
            closed: closed.clone(),
        },
        EventReceiver { rx, closed },
    )
}

/// Producer half.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Event>,
    closed: CancellationToken,
}

impl EventSender {
    /// Queue `event`, waiting for room if the queue is full. Returns false
    /// if the queue was closed, in which case the event is discarded.
    pub fn push(&self, event: Event) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        crossbeam_channel::select! {
            send(self.tx, event) -> res => res.is_ok(),
            recv(self.closed.cancelled()) -> _ => false,
        }
    }

    /// Close the queue. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Consumer half.
#[derive(Clone)]
pub struct EventReceiver {
    rx: Receiver<Event>,
    closed: CancellationToken,
}

impl EventReceiver {
    /// Next event in order. Blocks while the queue is open and empty;
    /// `None` once it is closed and drained.
    pub fn recv(&self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {
                    if self.closed.is_cancelled() {
                        return None;
                    }
                }
            }

            crossbeam_channel::select! {
                recv(self.rx) -> msg => return msg.ok(),
                // Closed: loop around and drain what is left.
                recv(self.closed.cancelled()) -> _ => {}
            }
        }
    }

    /// Next event if one is ready.
    pub fn try_recv(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Close the queue from the consumer side.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.rx.capacity()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { receiver: self }
    }
}

pub struct Iter<'a> {
    receiver: &'a EventReceiver,
}

impl Iterator for Iter<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.receiver.recv()
    }
}

impl<'a> IntoIterator for &'a EventReceiver {
    type Item = Event;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::event::EventKind;
    use std::thread;
    use std::time::Duration;

    fn print(b: u8) -> Event {
        Event::single(EventKind::Print, b)
    }

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = bounded(8);
        for b in b"abc" {
            assert!(tx.push(print(*b)));
        }
        tx.close();
        let bytes: Vec<u8> = rx.iter().map(|e| e.byte).collect();
        assert_eq!(bytes, b"abc");
    }

    #[test]
    fn test_push_after_close_is_noop() {
        let (tx, rx) = bounded(4);
        tx.close();
        assert!(!tx.push(print(b'x')));
        assert!(rx.recv().is_none());
    }

    #[test]
    fn test_drains_before_ending() {
        let (tx, rx) = bounded(4);
        tx.push(print(b'1'));
        tx.push(print(b'2'));
        tx.close();
        assert_eq!(rx.recv().map(|e| e.byte), Some(b'1'));
        assert_eq!(rx.recv().map(|e| e.byte), Some(b'2'));
        assert!(rx.recv().is_none());
    }

    #[test]
    fn test_push_blocks_when_full() {
        let (tx, rx) = bounded(1);
        assert!(tx.push(print(b'a')));

        let producer = {
            let tx = tx.clone();
            thread::spawn(move || tx.push(print(b'b')))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        assert_eq!(rx.recv().map(|e| e.byte), Some(b'a'));
        assert!(producer.join().unwrap());
        assert_eq!(rx.recv().map(|e| e.byte), Some(b'b'));
    }

    #[test]
    fn test_close_unblocks_full_push() {
        let (tx, _rx) = bounded(1);
        tx.push(print(b'a'));
        let producer = {
            let tx = tx.clone();
            thread::spawn(move || tx.push(print(b'b')))
        };
        thread::sleep(Duration::from_millis(20));
        tx.close();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn test_close_wakes_idle_consumer() {
        let (tx, rx) = bounded(4);
        let consumer = thread::spawn(move || rx.iter().count());
        thread::sleep(Duration::from_millis(20));
        tx.close();
        assert_eq!(consumer.join().unwrap(), 0);
    }

    #[test]
    fn test_parent_cancellation_closes_queue() {
        let parent = CancellationToken::new();
        let (tx, rx) = bounded_with_parent(4, &parent);
        parent.cancel();
        assert!(tx.is_closed());
        assert!(rx.recv().is_none());
    }

    #[test]
    fn test_capacity() {
        let (_tx, rx) = bounded(DEFAULT_CAPACITY);
        assert_eq!(rx.capacity(), Some(256));
        assert!(rx.is_empty());
    }
}
