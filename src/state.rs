//! Durable resume state
//!
//! A process-shared, mutex-protected record of the high-water UID per
//! source mailbox and the byte offset per mbox-file/destination pair.
//! Persisted as a single indented JSON object with owner-only permissions
//! (mode `0600`) so credentials-adjacent resume data isn't world-readable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::errors::AppResult;

/// On-disk representation of [`State`]
///
/// Unknown keys are ignored on load (forward compatibility); missing keys
/// default to empty maps.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    mail_max_uid: HashMap<String, u32>,
    #[serde(default)]
    mbox_offsets: HashMap<String, i64>,
}

/// Durable resume state, shared across all mailbox workers
///
/// All accessors lock the same mutex; mutation never fails. I/O errors are
/// only ever observed through [`State::load`] and [`State::save`].
#[derive(Debug)]
pub struct State {
    inner: Mutex<StateDocument>,
}

impl State {
    /// Load state from `path`
    ///
    /// Returns an empty, initialized state if `path` is absent or empty.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file exists but cannot be read, or isn't valid
    /// JSON.
    pub fn load(path: &Path) -> AppResult<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    inner: Mutex::new(StateDocument::default()),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self {
                inner: Mutex::new(StateDocument::default()),
            });
        }
        let document: StateDocument = serde_json::from_slice(&bytes)?;
        Ok(Self {
            inner: Mutex::new(document),
        })
    }

    /// Persist the current state snapshot to `path`
    ///
    /// A no-op when `path` is empty. Writes indented JSON with mode `0600`
    /// on Unix. Concurrent mutation during serialization is safe: the
    /// mutex guard covers the whole encode, so the file always reflects a
    /// consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be written.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let json = serde_json::to_vec_pretty(&*guard)?;
        drop(guard);
        write_owner_only(path, &json)?;
        Ok(())
    }

    /// Highest UID successfully APPENDed for mailbox `mailbox`, or 0
    pub fn get_max_uid(&self, mailbox: &str) -> u32 {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .mail_max_uid
            .get(mailbox)
            .copied()
            .unwrap_or(0)
    }

    /// Raise the high-water UID for `mailbox` to `max(existing, uid)`
    pub fn set_max_uid(&self, mailbox: &str, uid: u32) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let entry = guard.mail_max_uid.entry(mailbox.to_owned()).or_insert(0);
        *entry = (*entry).max(uid);
    }

    /// Stored byte offset for composite key `key`, or 0
    pub fn get_mbox_offset(&self, key: &str) -> i64 {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .mbox_offsets
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Overwrite the byte offset for `key`
    ///
    /// Callers are responsible for ensuring monotonicity (see
    /// [`mbox_offset_key`] and the mbox copy pipeline's `max(cur, end)`
    /// rule).
    pub fn set_mbox_offset(&self, key: &str, offset: i64) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.mbox_offsets.insert(key.to_owned(), offset);
    }
}

/// Composite key for `mbox_offsets`: `"mbox:<abs-path>|dst:<destination>"`
pub fn mbox_offset_key(mbox_path: &Path, destination: &str) -> String {
    let abs = std::fs::canonicalize(mbox_path).unwrap_or_else(|_| mbox_path.to_path_buf());
    format!("mbox:{}|dst:{destination}", abs.display())
}

#[cfg(unix)]
fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write as _;
    use std::os::unix::fs::OpenOptionsExt as _;

    let tmp_path = tmp_path_for(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = tmp_path_for(path);
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::{mbox_offset_key, State};
    use std::path::Path;

    #[test]
    fn load_missing_file_yields_empty_state() {
        let state = State::load(Path::new("/nonexistent/does-not-exist.json")).unwrap();
        assert_eq!(state.get_max_uid("INBOX"), 0);
        assert_eq!(state.get_mbox_offset("mbox:/a|dst:B"), 0);
    }

    #[test]
    fn set_max_uid_is_max_monotone() {
        let state = State::load(Path::new("/nonexistent/does-not-exist.json")).unwrap();
        state.set_max_uid("INBOX", 7);
        state.set_max_uid("INBOX", 5);
        assert_eq!(state.get_max_uid("INBOX"), 7);
        state.set_max_uid("INBOX", 9);
        assert_eq!(state.get_max_uid("INBOX"), 9);
    }

    #[test]
    fn save_then_load_round_trips_both_maps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = State::load(&path).unwrap();
        state.set_max_uid("INBOX", 42);
        state.set_max_uid("Archive/2024", 100);
        state.set_mbox_offset("mbox:/home/u/b.mbox|dst:Archive/2024", 10_485_760);
        state.save(&path).unwrap();

        let reloaded = State::load(&path).unwrap();
        assert_eq!(reloaded.get_max_uid("INBOX"), 42);
        assert_eq!(reloaded.get_max_uid("Archive/2024"), 100);
        assert_eq!(
            reloaded.get_mbox_offset("mbox:/home/u/b.mbox|dst:Archive/2024"),
            10_485_760
        );
    }

    #[test]
    fn save_is_noop_for_empty_path() {
        let state = State::load(Path::new("")).unwrap();
        state.set_max_uid("INBOX", 3);
        state.save(Path::new("")).unwrap();
    }

    #[test]
    fn unknown_keys_in_state_file_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"mail_max_uid":{"INBOX":5},"mbox_offsets":{},"future_field":"ignored"}"#,
        )
        .unwrap();
        let state = State::load(&path).unwrap();
        assert_eq!(state.get_max_uid("INBOX"), 5);
    }

    #[test]
    fn mbox_offset_key_uses_absolute_path_and_destination() {
        let key = mbox_offset_key(Path::new("relative.mbox"), "Archive/2024");
        assert!(key.starts_with("mbox:"));
        assert!(key.ends_with("|dst:Archive/2024"));
    }
}
