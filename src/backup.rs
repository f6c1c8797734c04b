//! IMAP -> filesystem backup command
//!
//! Structurally a simplified copy: list+filter mailboxes, then for each one
//! run the same SEARCH+FETCH loop shape as the sync engine's Phase B, but
//! write to disk instead of APPENDing to a destination mailbox. Resume
//! reuses `mail_max_uid`, since the destination here is conceptually "this
//! machine" rather than a mailbox with its own offset model.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tracing::info;

use crate::engine::Options;
use crate::errors::{AppError, AppResult};
use crate::imap::{self, ImapSession, SearchCriteria};
use crate::state::State;

/// On-disk layout for a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFormat {
    /// One file per message, named `<uid>.eml`, under `<dest>/<mailbox>/`
    MaildirLike,
    /// A single append-only mbox file per mailbox: `<dest>/<mailbox>.mbox`
    Mbox,
}

/// Back up every message in `mailboxes` to `dest_dir`
///
/// # Errors
///
/// Returns `Io` for filesystem failures, `Protocol` for IMAP failures.
pub async fn run(
    session: &mut ImapSession,
    dest_dir: &Path,
    mailboxes: &[String],
    format: BackupFormat,
    state: &Arc<State>,
    options: &Options,
) -> AppResult<Vec<AppError>> {
    let mut errors = Vec::new();
    for mailbox in mailboxes {
        if let Err(err) = backup_one(session, dest_dir, mailbox, format, state, options).await {
            errors.push(AppError::protocol(mailbox, err));
        }
    }
    Ok(errors)
}

async fn backup_one(
    session: &mut ImapSession,
    dest_dir: &Path,
    mailbox: &str,
    format: BackupFormat,
    state: &Arc<State>,
    options: &Options,
) -> AppResult<()> {
    imap::select(session, mailbox, true).await?;

    let min_uid = if options.ignore_state { 0 } else { state.get_max_uid(mailbox) };
    let uids = imap::uid_search(
        session,
        mailbox,
        SearchCriteria {
            since: options.since,
            min_uid: Some(min_uid),
            unseen_only: false,
        },
    )
    .await?;
    if uids.is_empty() {
        return Ok(());
    }

    let stream = imap::uid_fetch(session, mailbox, &uids).await?;
    tokio::pin!(stream);

    let target = mailbox_target(dest_dir, mailbox, format)?;
    let mut appended = 0usize;

    while let Some(fetched) = stream.next().await {
        let fetched = fetched?;
        let Some(body) = fetched.body else { continue };

        match format {
            BackupFormat::MaildirLike => {
                let path = target.join(format!("{}.eml", fetched.uid));
                fs::write(&path, &body)?;
            }
            BackupFormat::Mbox => {
                append_mbox_entry(&target, &body)?;
            }
        }

        if !options.dry_run {
            state.set_max_uid(mailbox, fetched.uid);
        }
        appended += 1;
    }

    if !options.quiet {
        info!(mailbox, appended, "backed up mailbox");
    }
    Ok(())
}

fn mailbox_target(dest_dir: &Path, mailbox: &str, format: BackupFormat) -> AppResult<PathBuf> {
    match format {
        BackupFormat::MaildirLike => {
            let dir = dest_dir.join(sanitize_path_component(mailbox));
            fs::create_dir_all(&dir)?;
            Ok(dir)
        }
        BackupFormat::Mbox => {
            fs::create_dir_all(dest_dir)?;
            Ok(dest_dir.join(format!("{}.mbox", sanitize_path_component(mailbox))))
        }
    }
}

fn append_mbox_entry(path: &Path, body: &[u8]) -> AppResult<()> {
    use std::io::Write as _;
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "From - {}", chrono::Utc::now().format("%a %b %e %H:%M:%S %Y"))?;
    file.write_all(body)?;
    if !body.ends_with(b"\n") {
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Replace path separators in a mailbox name so it's safe as a filesystem component
fn sanitize_path_component(mailbox: &str) -> String {
    mailbox.replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::sanitize_path_component;

    #[test]
    fn sanitizes_hierarchy_delimiter() {
        assert_eq!(sanitize_path_component("Archive/2024"), "Archive_2024");
        assert_eq!(sanitize_path_component("INBOX"), "INBOX");
    }
}
