//! Lossy progress event bus
//!
//! A single buffered channel of [`Event`] shared by every mailbox worker.
//! Production is non-blocking: if the consumer is slow and the buffer is
//! full, new events are silently dropped. This is safe because `done` is
//! always absolute, never a delta — a dropped event is corrected by the
//! next one the same worker emits.

use tokio::sync::mpsc;

/// Minimum event channel buffer size, per the engine's construction contract
pub const MIN_EVENT_BUFFER: usize = 128;

/// A single progress event
#[derive(Debug, Clone)]
pub enum Event {
    /// A mailbox worker has begun
    MailboxStart { mailbox: String },
    /// Absolute progress for a mailbox: `done` out of `total`
    MailboxProgress {
        mailbox: String,
        total: usize,
        done: usize,
    },
    /// A mailbox worker has finished, successfully or not
    MailboxDone {
        mailbox: String,
        error: Option<String>,
    },
}

impl Event {
    /// Mailbox name this event refers to
    pub fn mailbox(&self) -> &str {
        match self {
            Self::MailboxStart { mailbox }
            | Self::MailboxProgress { mailbox, .. }
            | Self::MailboxDone { mailbox, .. } => mailbox,
        }
    }
}

/// Producer half of the event bus
///
/// Cloned once per worker; all clones share the same bounded channel.
#[derive(Clone)]
pub struct EventSender(mpsc::Sender<Event>);

impl EventSender {
    /// Emit an event, dropping it silently if the channel is full
    pub fn emit(&self, event: Event) {
        // try_send is the whole point: a full buffer means a slow UI, and we'd
        // rather keep copying than block a worker on rendering.
        let _ = self.0.try_send(event);
    }
}

/// Consumer half of the event bus
pub type EventReceiver = mpsc::Receiver<Event>;

/// Build a bounded event channel with at least [`MIN_EVENT_BUFFER`] slots
pub fn channel(buffer: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(buffer.max(MIN_EVENT_BUFFER));
    (EventSender(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::{channel, Event};

    #[test]
    fn full_buffer_drops_new_events_without_blocking() {
        let (tx, mut rx) = channel(1);
        tx.emit(Event::MailboxStart {
            mailbox: "INBOX".to_owned(),
        });
        // Buffer capacity 1 is already full; this emit must be dropped, not block.
        tx.emit(Event::MailboxStart {
            mailbox: "Archive".to_owned(),
        });
        let first = rx.try_recv().expect("first event should be queued");
        assert_eq!(first.mailbox(), "INBOX");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_enforces_minimum_buffer() {
        let (tx, _rx) = channel(0);
        for _ in 0..200 {
            tx.emit(Event::MailboxStart {
                mailbox: "INBOX".to_owned(),
            });
        }
    }
}
