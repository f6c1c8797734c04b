//! Mbox -> IMAP copy pipeline
//!
//! Streams messages out of an mbox archive and APPENDs each to a destination
//! mailbox, checkpointing the byte offset in [`State`] after every success
//! so an interrupted run resumes without re-sending already-copied mail.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::engine::Options;
use crate::errors::AppResult;
use crate::events::{Event, EventSender};
use crate::imap::{self, ImapSession};
use crate::mbox::{internal_date_for, MboxReader};
use crate::state::{mbox_offset_key, State};

/// Copy every unread-so-far message in `mbox_path` into `destination`
///
/// Persists `state_path` after every successful `APPEND`, not just at the
/// end of the run, so a crash mid-file resumes from the last delivered
/// message instead of re-sending the whole mbox.
///
/// # Errors
///
/// Returns `Io` for file failures, `Protocol` for IMAP failures.
pub async fn copy_mbox_to_imap(
    dst: &mut ImapSession,
    mbox_path: &Path,
    destination: &str,
    state: &Arc<State>,
    state_path: &Path,
    options: &Options,
    events: &EventSender,
) -> AppResult<()> {
    let label = mbox_path.display().to_string();
    events.emit(Event::MailboxStart {
        mailbox: label.clone(),
    });

    let key = mbox_offset_key(mbox_path, destination);
    let start_offset = if options.ignore_state { 0 } else { state.get_mbox_offset(&key) as u64 };

    let total = {
        let file = File::open(mbox_path)?;
        let mut counter = MboxReader::new(file, start_offset)?;
        counter.count_remaining_messages()?
    };
    events.emit(Event::MailboxProgress {
        mailbox: label.clone(),
        total,
        done: 0,
    });

    if !options.dry_run {
        imap::ensure_mailbox(dst, destination).await?;
    }

    let file = File::open(mbox_path)?;
    let mut reader = MboxReader::new(file, start_offset)?;
    let mut done = 0usize;
    let mut offset = start_offset as i64;

    let result = drain(
        &mut reader, dst, destination, state, state_path, options, events, &label, &key, total,
        &mut done, &mut offset,
    )
    .await;

    if !options.dry_run {
        state.set_mbox_offset(&key, offset.max(reader.tell() as i64));
        state.save(state_path)?;
    }

    events.emit(Event::MailboxDone {
        mailbox: label,
        error: result.as_ref().err().map(ToString::to_string),
    });
    result
}

#[allow(clippy::too_many_arguments)]
async fn drain(
    reader: &mut MboxReader<File>,
    dst: &mut ImapSession,
    destination: &str,
    state: &Arc<State>,
    state_path: &Path,
    options: &Options,
    events: &EventSender,
    label: &str,
    key: &str,
    total: usize,
    done: &mut usize,
    offset: &mut i64,
) -> AppResult<()> {
    while let Some(message) = reader.next_message()? {
        if options.dry_run {
            *done += 1;
            events.emit(Event::MailboxProgress {
                mailbox: label.to_owned(),
                total,
                done: *done,
            });
            continue;
        }

        let date = internal_date_for(&message.raw);
        imap::select(dst, destination, false).await?;
        imap::append(dst, destination, &[], Some(date), &message.raw).await?;

        *offset = (*offset).max(message.offset_after as i64);
        state.set_mbox_offset(key, *offset);
        state.save(state_path)?;
        *done += 1;
        events.emit(Event::MailboxProgress {
            mailbox: label.to_owned(),
            total,
            done: *done,
        });
        if !options.quiet {
            info!(mbox = label, destination, "appended message from mbox");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::mbox_offset_key;
    use std::path::Path;

    #[test]
    fn offset_key_is_stable_for_same_inputs() {
        let a = mbox_offset_key(Path::new("/tmp/archive.mbox"), "Archive/2024");
        let b = mbox_offset_key(Path::new("/tmp/archive.mbox"), "Archive/2024");
        assert_eq!(a, b);
    }
}
