//! IMAP transport and session operations
//!
//! Provides timeout-bounded wrappers around `async-imap` operations used by
//! the sync engine, the mbox copy pipeline, and the ambient backup/send/
//! mark-read/delete commands. Connections support both implicit TLS and
//! plaintext-then-`STARTTLS`, selected by [`TlsMode`].

use std::sync::Arc;
use std::time::Duration;

use async_imap::types::{Fetch, Flag, Name};
use async_imap::{Client, Session};
use chrono::{DateTime, FixedOffset};
use futures::{Stream, TryStreamExt};
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::{MailboxEndpoint, TlsMode};
use crate::errors::{AppError, AppResult};

/// Socket I/O timeout applied to every IMAP round trip
const SOCKET_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for TCP connect, TLS handshake, and the initial greeting
const GREETING_TIMEOUT: Duration = Duration::from_secs(30);

/// Type alias for an authenticated IMAP session over TLS
///
/// Both TLS modes converge on the same stream type once the handshake is
/// complete, so source and destination adapters share one session type.
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Dial, authenticate, and return a ready-to-use IMAP session
///
/// Performs TCP connect, TLS (implicit or `STARTTLS` per [`TlsMode`]), and
/// `LOGIN`. If `MAILSYNC_IMAP_TRACE` is enabled, the caller is expected to
/// have initialized tracing at debug level; this function logs each phase
/// unconditionally, tracing being purely a lever, not a behavioral switch.
///
/// # Errors
///
/// - `Connect` for TCP/TLS failures
/// - `AuthFailed` if `LOGIN` is rejected
pub async fn connect(endpoint: &MailboxEndpoint) -> AppResult<ImapSession> {
    let addr = (endpoint.host.as_str(), endpoint.port);
    debug!(host = %endpoint.host, port = endpoint.port, "dialing IMAP server");

    let tcp = timeout(GREETING_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| AppError::Connect("TCP connect timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connect(format!("TCP connect failed: {e}"))))?;

    let connector = tls_connector(endpoint.verify_certs);
    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|_| AppError::InvalidInput(format!("invalid TLS hostname: {}", endpoint.host)))?;

    let tls_stream = match endpoint.tls {
        TlsMode::Implicit => {
            timeout(GREETING_TIMEOUT, connector.connect(server_name, tcp))
                .await
                .map_err(|_| AppError::Connect("TLS handshake timed out".to_owned()))
                .and_then(|r| r.map_err(|e| AppError::Connect(format!("TLS handshake failed: {e}"))))?
        }
        TlsMode::StartTls => {
            let mut plain_client = Client::new(tcp);
            timeout(
                GREETING_TIMEOUT,
                plain_client.run_command_and_check_ok("STARTTLS", None),
            )
            .await
            .map_err(|_| AppError::Connect("STARTTLS timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Connect(format!("STARTTLS failed: {e}"))))?;
            let raw = plain_client.into_inner();
            timeout(GREETING_TIMEOUT, connector.connect(server_name, raw))
                .await
                .map_err(|_| AppError::Connect("TLS handshake timed out".to_owned()))
                .and_then(|r| r.map_err(|e| AppError::Connect(format!("TLS handshake failed: {e}"))))?
        }
    };

    let client = Client::new(tls_stream);
    let pass = endpoint.pass.expose_secret();
    let session = timeout(GREETING_TIMEOUT, client.login(&endpoint.user, pass))
        .await
        .map_err(|_| AppError::AuthFailed("LOGIN timed out".to_owned()))
        .and_then(|r| r.map_err(|(e, _)| AppError::AuthFailed(e.to_string())))?;

    debug!(host = %endpoint.host, "IMAP session authenticated");
    Ok(session)
}

/// Build a `rustls` TLS connector, optionally skipping certificate verification
fn tls_connector(verify_certs: bool) -> TlsConnector {
    if verify_certs {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    } else {
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify))
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    }
}

/// Certificate verifier that accepts any certificate
///
/// Only reachable via `--insecure`; intended for talking to self-signed or
/// local test servers.
#[derive(Debug)]
struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Best-effort, idempotent logout
///
/// Errors are intentionally discarded: the socket may already be torn down
/// by the cancellation watchdog, in which case `LOGOUT` cannot succeed.
pub async fn logout(session: &mut ImapSession) {
    let _ = session.logout().await;
}

/// List every server-visible mailbox, decoding names from modified UTF-7
///
/// If the raw result doesn't contain a case-insensitive `INBOX`, one is
/// appended defensively (every IMAP server SHOULD expose it).
///
/// # Errors
///
/// Returns `Protocol` if `LIST` fails.
pub async fn list_mailboxes(session: &mut ImapSession) -> AppResult<Vec<String>> {
    let stream = timeout(SOCKET_TIMEOUT, session.list(Some(""), Some("*")))
        .await
        .map_err(|_| AppError::protocol("LIST", "timed out"))
        .and_then(|r| r.map_err(|e| AppError::protocol("LIST", e)))?;

    let names: Vec<Name> = timeout(SOCKET_TIMEOUT, stream.try_collect())
        .await
        .map_err(|_| AppError::protocol("LIST", "stream timed out"))
        .and_then(|r| r.map_err(|e| AppError::protocol("LIST", e)))?;

    let mut mailboxes: Vec<String> = names
        .iter()
        .map(|n| utf7_imap::decode_utf7_imap(n.name().to_owned()))
        .collect();

    if !mailboxes.iter().any(|m| m.eq_ignore_ascii_case("INBOX")) {
        mailboxes.push("INBOX".to_owned());
    }
    Ok(mailboxes)
}

/// Mailbox status returned by `SELECT`/`EXAMINE`
#[derive(Debug, Clone, Copy)]
pub struct MailboxStatus {
    pub uid_validity: Option<u32>,
    pub exists: u32,
}

/// `SELECT` a mailbox read-write, or `EXAMINE` it read-only
///
/// # Errors
///
/// Returns `Protocol` (tagged with `mailbox`) if the command fails.
pub async fn select(
    session: &mut ImapSession,
    mailbox: &str,
    read_only: bool,
) -> AppResult<MailboxStatus> {
    let encoded = utf7_imap::encode_utf7_imap(mailbox.to_owned());
    let selected = if read_only {
        timeout(SOCKET_TIMEOUT, session.examine(&encoded)).await
    } else {
        timeout(SOCKET_TIMEOUT, session.select(&encoded)).await
    }
    .map_err(|_| AppError::protocol(mailbox, "SELECT/EXAMINE timed out"))
    .and_then(|r| r.map_err(|e| AppError::protocol(mailbox, e)))?;

    Ok(MailboxStatus {
        uid_validity: selected.uid_validity,
        exists: selected.exists,
    })
}

/// Ensure `mailbox` exists and select it read-write
///
/// Attempts `SELECT` first; on failure issues `CREATE` then retries
/// `SELECT`.
///
/// # Errors
///
/// Returns the first enduring `Protocol` error from `CREATE` or the
/// retried `SELECT`.
pub async fn ensure_mailbox(session: &mut ImapSession, mailbox: &str) -> AppResult<()> {
    if select(session, mailbox, false).await.is_ok() {
        return Ok(());
    }
    let encoded = utf7_imap::encode_utf7_imap(mailbox.to_owned());
    timeout(SOCKET_TIMEOUT, session.create(&encoded))
        .await
        .map_err(|_| AppError::protocol(mailbox, "CREATE timed out"))
        .and_then(|r| r.map_err(|e| AppError::protocol(mailbox, e)))?;
    select(session, mailbox, false).await?;
    Ok(())
}

/// Search criteria for [`uid_search`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchCriteria {
    /// Only messages with INTERNALDATE on or after this date
    pub since: Option<DateTime<FixedOffset>>,
    /// Only UIDs strictly greater than `min_uid`
    pub min_uid: Option<u32>,
    /// Only messages without the `\Seen` flag
    pub unseen_only: bool,
}

/// Run `UID SEARCH`, returning matching UIDs in ascending order
///
/// # Errors
///
/// Returns `Protocol` (tagged with `mailbox`) if `SEARCH` fails.
pub async fn uid_search(
    session: &mut ImapSession,
    mailbox: &str,
    criteria: SearchCriteria,
) -> AppResult<Vec<u32>> {
    let mut terms = Vec::new();
    if let Some(since) = criteria.since {
        terms.push(format!("SINCE {}", since.format("%-d-%b-%Y")));
    }
    if let Some(min_uid) = criteria.min_uid {
        terms.push(format!("UID {}:*", min_uid.saturating_add(1)));
    }
    if criteria.unseen_only {
        terms.push("UNSEEN".to_owned());
    }
    let query = if terms.is_empty() {
        "ALL".to_owned()
    } else {
        terms.join(" ")
    };

    let uids = timeout(SOCKET_TIMEOUT, session.uid_search(&query))
        .await
        .map_err(|_| AppError::protocol(mailbox, "UID SEARCH timed out"))
        .and_then(|r| r.map_err(|e| AppError::protocol(mailbox, e)))?;

    let mut uids: Vec<u32> = uids
        .into_iter()
        .filter(|uid| criteria.min_uid.is_none_or(|min| *uid > min))
        .collect();
    uids.sort_unstable();
    Ok(uids)
}

/// One fetched message, streamed to the caller without buffering all of them
#[derive(Debug)]
pub struct FetchedMessage {
    pub uid: u32,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub flags: Vec<String>,
    pub body: Option<Vec<u8>>,
}

/// Issue `UID FETCH` for `uids` and return a stream of messages
///
/// Each item carries the full RFC 822 body (`BODY.PEEK[]`, which does not
/// mark the message `\Seen`), its flags, and its INTERNALDATE. Callers
/// drive the returned stream to completion before issuing another fetch on
/// the same session.
///
/// # Errors
///
/// Returns `Protocol` (tagged with `mailbox`) if `UID FETCH` fails to start.
pub async fn uid_fetch(
    session: &mut ImapSession,
    mailbox: &str,
    uids: &[u32],
) -> AppResult<impl Stream<Item = AppResult<FetchedMessage>> + '_> {
    let set = uid_set(uids);
    let mailbox_owned = mailbox.to_owned();
    let stream = timeout(
        SOCKET_TIMEOUT,
        session.uid_fetch(&set, "(UID INTERNALDATE FLAGS BODY.PEEK[])"),
    )
    .await
    .map_err(|_| AppError::protocol(&mailbox_owned, "UID FETCH timed out"))
    .and_then(|r| r.map_err(|e| AppError::protocol(&mailbox_owned, e)))?;

    Ok(stream
        .map_ok(to_fetched_message)
        .map_err(move |e| AppError::protocol(&mailbox_owned, e)))
}

fn to_fetched_message(fetch: Fetch) -> FetchedMessage {
    FetchedMessage {
        uid: fetch.uid.unwrap_or(0),
        internal_date: fetch.internal_date(),
        // Display, not Debug: `Flag::Seen` renders as `\Seen`, matching the
        // wire tokens `flag_from_token` parses back on APPEND. Debug would
        // yield `"Seen"`, which falls through to a bogus custom keyword.
        flags: fetch.flags().map(|f| format!("{f}")).collect(),
        body: fetch.body().map(<[u8]>::to_vec),
    }
}

/// Render a UID list as an IMAP sequence set, coalescing adjacent runs
///
/// E.g. `[1, 2, 3, 7]` becomes `"1:3,7"`.
pub fn uid_set(uids: &[u32]) -> String {
    let mut sorted = uids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end = iter.next().unwrap();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}:{end}"));
        }
    }
    parts.join(",")
}

/// `APPEND` a raw RFC 822 message, preserving flags and INTERNALDATE
///
/// # Errors
///
/// Returns `Protocol` (tagged with `mailbox`) if `APPEND` fails.
pub async fn append(
    session: &mut ImapSession,
    mailbox: &str,
    flags: &[String],
    internal_date: Option<DateTime<FixedOffset>>,
    content: &[u8],
) -> AppResult<()> {
    let encoded = utf7_imap::encode_utf7_imap(mailbox.to_owned());
    let flags: Vec<Flag<'_>> = flags.iter().map(|f| flag_from_token(f)).collect();
    let flags_opt = if flags.is_empty() { None } else { Some(flags.as_slice()) };

    timeout(
        SOCKET_TIMEOUT,
        session.append(&encoded, flags_opt, internal_date, content),
    )
    .await
    .map_err(|_| AppError::protocol(mailbox, "APPEND timed out"))
    .and_then(|r| r.map_err(|e| AppError::protocol(mailbox, e)))
}

fn flag_from_token(token: &str) -> Flag<'static> {
    match token {
        "\\Seen" => Flag::Seen,
        "\\Answered" => Flag::Answered,
        "\\Flagged" => Flag::Flagged,
        "\\Deleted" => Flag::Deleted,
        "\\Draft" => Flag::Draft,
        other => Flag::Custom(other.to_owned().into()),
    }
}

/// `UID STORE` a flag change (`+FLAGS.SILENT (...)` or `-FLAGS.SILENT (...)`)
///
/// # Errors
///
/// Returns `Protocol` (tagged with `mailbox`) if `STORE` fails.
pub async fn uid_store(
    session: &mut ImapSession,
    mailbox: &str,
    uids: &[u32],
    add: bool,
    flag: &str,
) -> AppResult<()> {
    let set = uid_set(uids);
    let sign = if add { '+' } else { '-' };
    let query = format!("{sign}FLAGS.SILENT ({flag})");
    let stream = timeout(SOCKET_TIMEOUT, session.uid_store(&set, &query))
        .await
        .map_err(|_| AppError::protocol(mailbox, "UID STORE timed out"))
        .and_then(|r| r.map_err(|e| AppError::protocol(mailbox, e)))?;
    let _: Vec<Fetch> = timeout(SOCKET_TIMEOUT, stream.try_collect())
        .await
        .map_err(|_| AppError::protocol(mailbox, "UID STORE stream timed out"))
        .and_then(|r| r.map_err(|e| AppError::protocol(mailbox, e)))?;
    Ok(())
}

/// `EXPUNGE` the currently selected mailbox
///
/// # Errors
///
/// Returns `Protocol` (tagged with `mailbox`) if `EXPUNGE` fails.
pub async fn expunge(session: &mut ImapSession, mailbox: &str) -> AppResult<()> {
    let stream = timeout(SOCKET_TIMEOUT, session.expunge())
        .await
        .map_err(|_| AppError::protocol(mailbox, "EXPUNGE timed out"))
        .and_then(|r| r.map_err(|e| AppError::protocol(mailbox, e)))?;
    let _: Vec<u32> = timeout(SOCKET_TIMEOUT, stream.try_collect())
        .await
        .map_err(|_| AppError::protocol(mailbox, "EXPUNGE stream timed out"))
        .and_then(|r| r.map_err(|e| AppError::protocol(mailbox, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::uid_set;

    #[test]
    fn uid_set_coalesces_adjacent_runs() {
        assert_eq!(uid_set(&[1, 2, 3, 7]), "1:3,7");
        assert_eq!(uid_set(&[5]), "5");
        assert_eq!(uid_set(&[]), "");
    }

    #[test]
    fn uid_set_sorts_and_dedups() {
        assert_eq!(uid_set(&[3, 1, 2, 1]), "1:3");
    }
}
