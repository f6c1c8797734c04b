//! Connection configuration for IMAP/SMTP endpoints
//!
//! Every command resolves one or two [`MailboxEndpoint`]s from a mix of CLI
//! flags and environment variables, following the
//! `MAILSYNC_<SEGMENT>_<KEY>` convention. Passwords are never accepted in
//! plain CLI text unless the caller opts in; the preferred path is
//! `--password-command`, which shells out once and discards the child's
//! stdout after the first line, mirroring how secrets are sourced in
//! comparable tools without ever logging them.

use std::env::VarError;
use std::{env, process};

use clap::Args;
use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// How the adapter establishes TLS before issuing `LOGIN`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Dial a plaintext socket, then upgrade via `STARTTLS`
    StartTls,
    /// Wrap the socket in TLS immediately (the common `:993` convention)
    Implicit,
}

/// Resolved connection parameters for one side of a copy, or for SMTP submission
#[derive(Debug, Clone)]
pub struct MailboxEndpoint {
    /// Server hostname, used both for the TCP dial and the TLS SNI/verification name
    pub host: String,
    /// Server port
    pub port: u16,
    /// TLS establishment mode
    pub tls: TlsMode,
    /// Whether to verify the server's certificate chain and hostname
    pub verify_certs: bool,
    /// Login username
    pub user: String,
    /// Login password, held as a `SecretString` end to end
    pub pass: SecretString,
}

/// CLI flags describing one endpoint
///
/// Flattened twice into `copy` (as `--src-*` / `--dst-*`) and once into the
/// single-endpoint commands (`backup`, `send`, `mark-read`, `delete`).
#[derive(Debug, Args, Clone)]
pub struct EndpointArgs {
    /// Server hostname
    #[arg(long)]
    pub host: String,
    /// Server port
    #[arg(long, default_value_t = 993)]
    pub port: u16,
    /// Upgrade a plaintext connection via STARTTLS instead of implicit TLS
    #[arg(long)]
    pub starttls: bool,
    /// Skip TLS certificate verification (testing only)
    #[arg(long)]
    pub insecure: bool,
    /// Login username
    #[arg(long)]
    pub user: String,
    /// Login password, read directly from the flag (discouraged; prefer `--password-command`)
    #[arg(long)]
    pub password: Option<String>,
    /// Shell command whose first stdout line is the login password
    #[arg(long, value_name = "CMD", num_args = 1..)]
    pub password_command: Option<Vec<String>>,
    /// Environment variable segment to fall back to for the password
    /// (reads `MAILSYNC_<SEGMENT>_PASS`)
    #[arg(long, value_name = "SEGMENT")]
    pub password_env_segment: Option<String>,
}

impl EndpointArgs {
    /// Resolve CLI flags into a connected-ready [`MailboxEndpoint`]
    ///
    /// Password resolution order: `--password`, then `--password-command`,
    /// then `MAILSYNC_<segment>_PASS`. The first present source wins.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if no password source yields a value, or if
    /// `--password-command` exits non-zero or prints non-UTF-8 output.
    pub fn resolve(&self) -> AppResult<MailboxEndpoint> {
        let pass = resolve_password(
            self.password.as_deref(),
            self.password_command.as_deref(),
            self.password_env_segment.as_deref(),
        )?;
        Ok(build_endpoint(
            self.host.clone(),
            self.port,
            self.starttls,
            self.insecure,
            self.user.clone(),
            pass,
        ))
    }
}

/// Build a [`MailboxEndpoint`] from already-resolved parts
///
/// Shared by [`EndpointArgs::resolve`] and commands that need two distinct
/// endpoints (and thus two differently-prefixed flag sets) in one
/// subcommand, such as `copy`.
pub fn build_endpoint(
    host: String,
    port: u16,
    starttls: bool,
    insecure: bool,
    user: String,
    pass: String,
) -> MailboxEndpoint {
    MailboxEndpoint {
        host,
        port,
        tls: if starttls { TlsMode::StartTls } else { TlsMode::Implicit },
        verify_certs: !insecure,
        user,
        pass: SecretString::new(pass.into()),
    }
}

/// Resolve a password from the shared `--password` / `--password-command` /
/// `--password-env-segment` precedence order
///
/// # Errors
///
/// Returns `InvalidInput` if no source yields a value, or if
/// `--password-command` exits non-zero or prints non-UTF-8 output.
pub fn resolve_password(
    password: Option<&str>,
    command: Option<&[String]>,
    env_segment: Option<&str>,
) -> AppResult<String> {
    if let Some(password) = password {
        return Ok(password.to_owned());
    }
    if let Some(command) = command {
        return run_password_command(command);
    }
    if let Some(segment) = env_segment {
        return required_env(&format!("MAILSYNC_{}_PASS", sanitize_segment(segment)));
    }
    Err(AppError::invalid(
        "no password source given: use --password, --password-command, or --password-env-segment",
    ))
}

/// Run `--password-command`, returning its first stdout line
///
/// The child's output is only ever held in memory long enough to split out
/// the first line; it is never written to disk or logged.
fn run_password_command(command: &[String]) -> AppResult<String> {
    let Some((program, rest)) = command.split_first() else {
        return Err(AppError::invalid("--password-command was given no words"));
    };
    let output = process::Command::new(program)
        .args(rest)
        .output()
        .map_err(|e| AppError::InvalidInput(format!("couldn't run {program:?}: {e}")))?;
    if !output.status.success() {
        return Err(AppError::InvalidInput(format!(
            "{program:?} exited with {}",
            output.status
        )));
    }
    let stdout = String::from_utf8(output.stdout)
        .map_err(|_| AppError::InvalidInput(format!("{program:?} printed non-UTF-8 output")))?;
    stdout
        .lines()
        .next()
        .map(str::to_owned)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| AppError::InvalidInput(format!("{program:?} printed nothing")))
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        Ok(_) | Err(VarError::NotPresent) => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Sanitize an account segment to uppercase alphanumeric/underscore
fn sanitize_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for ch in seg.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

/// Whether `MAILSYNC_IMAP_TRACE` enables wire-protocol tracing
///
/// The core treats this purely as a debug lever; it never gates behavior.
pub fn imap_trace_enabled() -> bool {
    env::var("MAILSYNC_IMAP_TRACE")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::{run_password_command, sanitize_segment};

    #[test]
    fn sanitize_segment_uppercases_and_trims() {
        assert_eq!(sanitize_segment("work-east"), "WORK_EAST");
        assert_eq!(sanitize_segment("__default__"), "DEFAULT");
    }

    #[test]
    fn password_command_takes_first_line_only() {
        let command = vec![
            "printf".to_owned(),
            "hunter2\nignored\n".to_owned(),
        ];
        let password = run_password_command(&command).expect("command should succeed");
        assert_eq!(password, "hunter2");
    }

    #[test]
    fn password_command_rejects_empty_output() {
        let command = vec!["true".to_owned()];
        assert!(run_password_command(&command).is_err());
    }
}
