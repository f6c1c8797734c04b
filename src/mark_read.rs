//! Mark-read command
//!
//! For each mailbox: `UID SEARCH` for unseen messages matching the shared
//! filters/since options, then `UID STORE +FLAGS (\Seen)` in one batch.

use crate::engine::Options;
use crate::errors::{AppError, AppResult};
use crate::imap::{self, ImapSession, SearchCriteria};

/// Outcome for a single mailbox
#[derive(Debug, Clone)]
pub struct MailboxResult {
    pub mailbox: String,
    pub marked: usize,
}

/// Mark unseen messages `\Seen` across `mailboxes`
///
/// Per-mailbox failures are collected rather than aborting the whole run.
///
/// # Errors
///
/// Never returns `Err` directly; per-mailbox errors are reported in the
/// second element of the returned tuple.
pub async fn run(
    session: &mut ImapSession,
    mailboxes: &[String],
    options: &Options,
) -> AppResult<(Vec<MailboxResult>, Vec<AppError>)> {
    let mut results = Vec::new();
    let mut errors = Vec::new();

    for mailbox in mailboxes {
        match mark_one(session, mailbox, options).await {
            Ok(marked) => results.push(MailboxResult {
                mailbox: mailbox.clone(),
                marked,
            }),
            Err(e) => errors.push(AppError::protocol(mailbox, e)),
        }
    }

    Ok((results, errors))
}

async fn mark_one(session: &mut ImapSession, mailbox: &str, options: &Options) -> AppResult<usize> {
    imap::select(session, mailbox, false).await?;
    let unseen = imap::uid_search(
        session,
        mailbox,
        SearchCriteria {
            since: options.since,
            min_uid: None,
            unseen_only: true,
        },
    )
    .await?;
    if unseen.is_empty() || options.dry_run {
        return Ok(unseen.len());
    }
    imap::uid_store(session, mailbox, &unseen, true, "\\Seen").await?;
    Ok(unseen.len())
}
