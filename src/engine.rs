//! Mailbox synchronization engine
//!
//! Drives a concurrent, resumable, UID-ordered copy of messages between two
//! IMAP accounts. Each mailbox is handled by its own worker task bounded by
//! a semaphore; a cancellation watchdog tears down both connections on
//! request so no worker is left parked in blocking I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::events::{self, Event, EventReceiver, EventSender};
use crate::imap::{self, ImapSession, SearchCriteria};
use crate::state::State;

/// Run-wide options shared by every mailbox worker
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Perform SELECT/FETCH but never APPEND, and never mutate state
    pub dry_run: bool,
    /// Only fetch messages with INTERNALDATE on or after this date
    pub since: Option<DateTime<FixedOffset>>,
    /// Max mailboxes processed in parallel; values `<= 0` are coerced to 1
    pub concurrency: usize,
    /// Suppress per-message log output
    pub quiet: bool,
    /// Treat the resume high-water mark as 0, regardless of stored state
    pub ignore_state: bool,
    /// Source mailbox name -> destination mailbox name; unmapped names pass through
    pub map: HashMap<String, String>,
}

impl Options {
    fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    fn destination_name(&self, source: &str) -> String {
        self.map.get(source).cloned().unwrap_or_else(|| source.to_owned())
    }
}

/// The concurrent, resumable mailbox copy driver
pub struct MailboxSyncer {
    src: Arc<Mutex<ImapSession>>,
    dst: Arc<Mutex<ImapSession>>,
    state: Arc<State>,
    options: Options,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
}

impl MailboxSyncer {
    /// Build a syncer from two already-authenticated sessions
    pub fn new(src: ImapSession, dst: ImapSession, state: Arc<State>, options: Options) -> Self {
        let (events_tx, events_rx) = events::channel(events::MIN_EVENT_BUFFER);
        Self {
            src: Arc::new(Mutex::new(src)),
            dst: Arc::new(Mutex::new(dst)),
            state,
            options,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Take the event receiver
    ///
    /// Returns `None` if already taken; a syncer has exactly one consumer.
    pub fn events(&mut self) -> Option<EventReceiver> {
        self.events_rx.take()
    }

    /// Run every mailbox to completion, returning the aggregated error list
    ///
    /// Spawns one worker per mailbox (bounded by `options.concurrency`) and
    /// a watchdog that logs both sessions out if `cancel` fires, unblocking
    /// any worker parked in IMAP I/O.
    pub async fn sync_all(&self, cancel: CancellationToken, mailboxes: &[String]) -> Vec<AppError> {
        let semaphore = Arc::new(Semaphore::new(self.options.effective_concurrency()));
        let errors: Arc<Mutex<Vec<AppError>>> = Arc::new(Mutex::new(Vec::new()));

        let watchdog = {
            let src = Arc::clone(&self.src);
            let dst = Arc::clone(&self.dst);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                warn!("cancellation requested, tearing down IMAP sessions");
                imap::logout(&mut *src.lock().await).await;
                imap::logout(&mut *dst.lock().await).await;
            })
        };

        let mut handles = Vec::with_capacity(mailboxes.len());
        for mailbox in mailboxes {
            let permit = Arc::clone(&semaphore);
            let src = Arc::clone(&self.src);
            let dst = Arc::clone(&self.dst);
            let state = Arc::clone(&self.state);
            let options = self.options.clone();
            let events = self.events_tx.clone();
            let cancel = cancel.clone();
            let errors = Arc::clone(&errors);
            let mailbox = mailbox.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                if let Err(err) =
                    sync_mailbox(&src, &dst, &state, &options, &events, &cancel, &mailbox).await
                {
                    errors.lock().await.push(AppError::protocol(&mailbox, err));
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        cancel.cancel();
        let _ = watchdog.await;

        Arc::try_unwrap(errors)
            .unwrap_or_else(|_| unreachable!("all worker tasks have been joined"))
            .into_inner()
    }
}

/// Per-mailbox worker: setup phase, then streaming copy phase
async fn sync_mailbox(
    src: &Arc<Mutex<ImapSession>>,
    dst: &Arc<Mutex<ImapSession>>,
    state: &Arc<State>,
    options: &Options,
    events: &EventSender,
    cancel: &CancellationToken,
    mailbox: &str,
) -> Result<(), String> {
    events.emit(Event::MailboxStart {
        mailbox: mailbox.to_owned(),
    });

    let dst_name = options.destination_name(mailbox);

    if !options.dry_run {
        imap::ensure_mailbox(&mut *dst.lock().await, &dst_name)
            .await
            .map_err(|e| e.to_string())?;
    }

    imap::select(&mut *src.lock().await, mailbox, true)
        .await
        .map_err(|e| e.to_string())?;

    let min_uid = if options.ignore_state { 0 } else { state.get_max_uid(mailbox) };
    let criteria = SearchCriteria {
        since: options.since,
        min_uid: Some(min_uid),
        unseen_only: false,
    };

    let uids = {
        let mut guard = src.lock().await;
        imap::uid_search(&mut guard, mailbox, criteria)
            .await
            .map_err(|e| e.to_string())?
    };

    if uids.is_empty() {
        events.emit(Event::MailboxDone {
            mailbox: mailbox.to_owned(),
            error: None,
        });
        return Ok(());
    }

    let total = uids.len();
    events.emit(Event::MailboxProgress {
        mailbox: mailbox.to_owned(),
        total,
        done: 0,
    });

    let mut done = 0usize;
    let result = copy_messages(
        src, dst, state, options, events, cancel, mailbox, &dst_name, &uids, total, &mut done,
    )
    .await;

    events.emit(Event::MailboxDone {
        mailbox: mailbox.to_owned(),
        error: result.as_ref().err().cloned(),
    });
    result
}

#[allow(clippy::too_many_arguments)]
async fn copy_messages(
    src: &Arc<Mutex<ImapSession>>,
    dst: &Arc<Mutex<ImapSession>>,
    state: &Arc<State>,
    options: &Options,
    events: &EventSender,
    cancel: &CancellationToken,
    mailbox: &str,
    dst_name: &str,
    uids: &[u32],
    total: usize,
    done: &mut usize,
) -> Result<(), String> {
    let mut src_guard = src.lock().await;
    let stream = imap::uid_fetch(&mut src_guard, mailbox, uids)
        .await
        .map_err(|e| e.to_string())?;
    tokio::pin!(stream);

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err("cancelled".to_owned()),
            item = stream.next() => item,
        };
        let Some(fetched) = next else { break };
        let fetched = fetched.map_err(|e| e.to_string())?;

        let Some(body) = fetched.body else {
            if !options.quiet {
                warn!(mailbox, uid = fetched.uid, "message had no body literal, skipping");
            }
            continue;
        };

        if options.dry_run {
            *done += 1;
            events.emit(Event::MailboxProgress {
                mailbox: mailbox.to_owned(),
                total,
                done: *done,
            });
            continue;
        }

        {
            let mut dst_guard = dst.lock().await;
            imap::select(&mut dst_guard, dst_name, false)
                .await
                .map_err(|e| e.to_string())?;
            imap::append(&mut dst_guard, dst_name, &fetched.flags, fetched.internal_date, &body)
                .await
                .map_err(|e| e.to_string())?;
        }

        state.set_max_uid(mailbox, fetched.uid);
        *done += 1;
        events.emit(Event::MailboxProgress {
            mailbox: mailbox.to_owned(),
            total,
            done: *done,
        });
        if !options.quiet {
            info!(mailbox, uid = fetched.uid, "copied message");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Options;

    #[test]
    fn concurrency_zero_or_negative_coerces_to_one() {
        let options = Options {
            concurrency: 0,
            ..Options::default()
        };
        assert_eq!(options.effective_concurrency(), 1);
    }

    #[test]
    fn destination_name_uses_map_or_passes_through() {
        let mut options = Options::default();
        options.map.insert("INBOX".to_owned(), "Imported".to_owned());
        assert_eq!(options.destination_name("INBOX"), "Imported");
        assert_eq!(options.destination_name("Archive"), "Archive");
    }
}
