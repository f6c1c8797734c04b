//! Delete command
//!
//! `UID SEARCH` matching messages, report a count, require explicit
//! confirmation, then `UID STORE +FLAGS (\Deleted)`; `--expunge` additionally
//! issues `EXPUNGE`.

use crate::engine::Options;
use crate::errors::{AppError, AppResult};
use crate::imap::{self, ImapSession, SearchCriteria};

/// Per-mailbox count of messages matched for deletion
#[derive(Debug, Clone)]
pub struct MailboxMatch {
    pub mailbox: String,
    pub uids: Vec<u32>,
}

/// Find messages matching `options` in each mailbox, without deleting anything
///
/// # Errors
///
/// Returns `Protocol` for SEARCH failures.
pub async fn preview(
    session: &mut ImapSession,
    mailboxes: &[String],
    options: &Options,
) -> AppResult<Vec<MailboxMatch>> {
    let mut matches = Vec::with_capacity(mailboxes.len());
    for mailbox in mailboxes {
        imap::select(session, mailbox, false).await?;
        let uids = imap::uid_search(
            session,
            mailbox,
            SearchCriteria {
                since: options.since,
                min_uid: None,
                unseen_only: false,
            },
        )
        .await?;
        matches.push(MailboxMatch {
            mailbox: mailbox.clone(),
            uids,
        });
    }
    Ok(matches)
}

/// Mark every UID in `matches` `\Deleted`, optionally expunging afterward
///
/// Caller is responsible for obtaining confirmation (`--yes` or an
/// interactive prompt) before calling this.
///
/// # Errors
///
/// Never returns `Err`; per-mailbox failures are collected.
pub async fn apply(
    session: &mut ImapSession,
    matches: &[MailboxMatch],
    expunge: bool,
) -> Vec<AppError> {
    let mut errors = Vec::new();
    for m in matches {
        if m.uids.is_empty() {
            continue;
        }
        if let Err(e) = delete_one(session, m, expunge).await {
            errors.push(AppError::protocol(&m.mailbox, e));
        }
    }
    errors
}

async fn delete_one(session: &mut ImapSession, m: &MailboxMatch, expunge: bool) -> AppResult<()> {
    imap::select(session, &m.mailbox, false).await?;
    imap::uid_store(session, &m.mailbox, &m.uids, true, "\\Deleted").await?;
    if expunge {
        imap::expunge(session, &m.mailbox).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::MailboxMatch;

    #[test]
    fn empty_match_set_is_a_noop_marker() {
        let m = MailboxMatch {
            mailbox: "Trash".to_owned(),
            uids: vec![],
        };
        assert!(m.uids.is_empty());
    }
}
