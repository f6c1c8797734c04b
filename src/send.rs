//! SMTP submission command
//!
//! Reads a raw RFC 822 message from a file or stdin and submits it over
//! SMTP via `lettre`, using the same `MailboxEndpoint` shape as the IMAP
//! commands for host/port/TLS/credential resolution.

use std::io::Read as _;
use std::path::Path;

use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mailparse::MailHeaderMap;
use secrecy::ExposeSecret;

use crate::config::{MailboxEndpoint, TlsMode};
use crate::errors::{AppError, AppResult};

/// Submit `raw_message` (a full RFC 822 document) to `endpoint`
///
/// The envelope sender/recipients are taken from the message's own
/// `From`/`To`/`Cc` headers; the bytes are relayed to the server untouched
/// via `SMTP`'s raw-message path rather than re-encoded through a builder.
///
/// # Errors
///
/// Returns `InvalidInput` if the message has no usable addresses,
/// `Connect` if the SMTP transport cannot be built, `Internal` if
/// submission is rejected by the server.
pub async fn send_raw(endpoint: &MailboxEndpoint, raw_message: &[u8]) -> AppResult<()> {
    let envelope = build_envelope(raw_message)?;

    let credentials = Credentials::new(endpoint.user.clone(), endpoint.pass.expose_secret().to_owned());

    let transport = match endpoint.tls {
        TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&endpoint.host)
            .map_err(|e| AppError::Connect(e.to_string()))?
            .port(endpoint.port)
            .credentials(credentials),
        TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&endpoint.host)
            .map_err(|e| AppError::Connect(e.to_string()))?
            .port(endpoint.port)
            .credentials(credentials),
    }
    .build();

    transport
        .send_raw(&envelope, raw_message)
        .await
        .map_err(|e| AppError::Internal(format!("SMTP submission failed: {e}")))?;
    Ok(())
}

fn build_envelope(raw_message: &[u8]) -> AppResult<Envelope> {
    let parsed = mailparse::parse_mail(raw_message)
        .map_err(|e| AppError::invalid(format!("not a valid RFC 822 message: {e}")))?;
    let headers = &parsed.headers;

    let from = headers
        .get_first_value("From")
        .as_deref()
        .and_then(extract_address);

    let mut to: Vec<Address> = Vec::new();
    for header in ["To", "Cc", "Bcc"] {
        for value in headers.get_all_values(header) {
            to.extend(value.split(',').filter_map(extract_address));
        }
    }
    if to.is_empty() {
        return Err(AppError::invalid("message has no To/Cc/Bcc recipients"));
    }

    Envelope::new(from, to).map_err(|e| AppError::invalid(format!("invalid envelope addresses: {e}")))
}

/// Pull a bare email address out of a `Name <addr@host>` or plain header value
fn extract_address(value: &str) -> Option<Address> {
    let trimmed = value.trim();
    let candidate = match (trimmed.find('<'), trimmed.find('>')) {
        (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
        _ => trimmed,
    };
    candidate.trim().parse().ok()
}

/// Read a raw message from `path`, or from stdin when `path` is `None`
///
/// # Errors
///
/// Returns `Io` if the file or stdin cannot be read.
pub fn read_raw_message(path: Option<&Path>) -> AppResult<Vec<u8>> {
    let mut buf = Vec::new();
    match path {
        Some(path) => {
            buf = std::fs::read(path)?;
        }
        None => {
            std::io::stdin().read_to_end(&mut buf)?;
        }
    }
    Ok(buf)
}
