//! Streaming mbox (mboxrd) reader
//!
//! Splits a flat mbox archive into individual RFC 822 messages without
//! buffering the whole file, tracking the byte offset past each message so
//! callers can checkpoint resumable progress. Messages are delimited by a
//! line beginning with exactly `From ` at column 0; `>From ` continuation
//! lines are passed through unmodified, matching mboxrd's own escaping
//! convention.

use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

use chrono::{DateTime, FixedOffset, Utc};
use mailparse::{parse_mail, MailHeaderMap};

use crate::errors::AppResult;

const FROM_LINE: &[u8] = b"From ";

/// One message read from an mbox stream
#[derive(Debug)]
pub struct MboxMessage {
    /// Raw RFC 822 bytes, excluding the `From ` separator line
    pub raw: Vec<u8>,
    /// Byte offset into the file immediately before this message's separator line
    pub offset_before: u64,
    /// Byte offset into the file immediately after this message (start of the next, or EOF)
    pub offset_after: u64,
}

/// Streaming reader over an mbox file, starting at a given byte offset
pub struct MboxReader<R> {
    inner: BufReader<R>,
    pos: u64,
    pending_line: Option<Vec<u8>>,
}

impl<R: Read + Seek> MboxReader<R> {
    /// Open a reader positioned at `start_offset`
    ///
    /// # Errors
    ///
    /// Returns `Io` if seeking fails.
    pub fn new(mut inner: R, start_offset: u64) -> AppResult<Self> {
        inner.seek(SeekFrom::Start(start_offset))?;
        Ok(Self {
            inner: BufReader::new(inner),
            pos: start_offset,
            pending_line: None,
        })
    }

    /// Read the next message, or `None` at end of file
    ///
    /// # Errors
    ///
    /// Returns `Io` for read failures.
    pub fn next_message(&mut self) -> AppResult<Option<MboxMessage>> {
        let offset_before = self.pos;
        let mut first_line = match self.pending_line.take() {
            Some(line) => line,
            None => match self.read_line()? {
                Some(line) => line,
                None => return Ok(None),
            },
        };
        if !is_from_line(&first_line) {
            // Defensive: a non-`From ` line at a checkpointed offset means the
            // file was rewritten underneath us. Skip forward to the next
            // separator rather than misinterpreting arbitrary bytes as a message.
            loop {
                match self.read_line()? {
                    Some(line) if is_from_line(&line) => {
                        first_line = line;
                        break;
                    }
                    Some(_) => continue,
                    None => return Ok(None),
                }
            }
        }

        let mut raw = Vec::new();
        loop {
            match self.read_line()? {
                Some(line) if is_from_line(&line) => {
                    self.pending_line = Some(line);
                    break;
                }
                Some(line) => raw.extend_from_slice(&line),
                None => break,
            }
        }

        let offset_after = self.pos;
        Ok(Some(MboxMessage {
            raw,
            offset_before,
            offset_after,
        }))
    }

    /// Count remaining `From ` separator lines without consuming messages
    ///
    /// Used to size progress bars; the reader is left at the offset it
    /// started from when this call returns.
    ///
    /// # Errors
    ///
    /// Returns `Io` for read/seek failures.
    pub fn count_remaining_messages(&mut self) -> AppResult<usize> {
        let start = self.pos;
        let mut count = 0;
        while let Some(line) = self.read_line()? {
            if is_from_line(&line) {
                count += 1;
            }
        }
        self.inner.seek(SeekFrom::Start(start))?;
        self.pos = start;
        self.pending_line = None;
        Ok(count)
    }

    /// Current byte offset
    pub fn tell(&self) -> u64 {
        self.pos
    }

    fn read_line(&mut self) -> AppResult<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.pos += n as u64;
        Ok(Some(buf))
    }
}

fn is_from_line(line: &[u8]) -> bool {
    line.starts_with(FROM_LINE)
}

/// Resolve the INTERNALDATE to use for an APPENDed message
///
/// Tries, in order: the `Date` header, `Resent-Date`, `Delivery-date`, the
/// earliest timestamp parseable from any `Received:` header, and finally
/// the current wall-clock time.
pub fn internal_date_for(raw: &[u8]) -> DateTime<FixedOffset> {
    let Ok(parsed) = parse_mail(raw) else {
        return now();
    };
    let headers = &parsed.headers;

    for name in ["Date", "Resent-Date", "Delivery-date"] {
        if let Some(value) = headers.get_first_value(name) {
            if let Some(date) = parse_date(&value) {
                return date;
            }
        }
    }

    let mut earliest: Option<DateTime<FixedOffset>> = None;
    for received in headers.get_all_values("Received") {
        if let Some(date) = received.rsplit(';').next().and_then(parse_date) {
            earliest = Some(match earliest {
                Some(current) if current <= date => current,
                _ => date,
            });
        }
    }
    earliest.unwrap_or_else(now)
}

fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .or_else(|| mailparse::dateparse(value.trim()).ok().and_then(from_unix))
}

fn from_unix(secs: i64) -> Option<DateTime<FixedOffset>> {
    DateTime::from_timestamp(secs, 0).map(|dt| dt.with_timezone(&FixedOffset::east_opt(0).unwrap()))
}

fn now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&FixedOffset::east_opt(0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::{internal_date_for, MboxReader};
    use std::io::Cursor;

    fn sample_mbox() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"From alice@example.com Mon Jan  1 00:00:00 2024\n");
        data.extend_from_slice(b"Date: Mon, 1 Jan 2024 00:00:00 +0000\n");
        data.extend_from_slice(b"Subject: first\n\n");
        data.extend_from_slice(b"body one\n");
        data.extend_from_slice(b"From bob@example.com Tue Jan  2 00:00:00 2024\n");
        data.extend_from_slice(b"Date: Tue, 2 Jan 2024 00:00:00 +0000\n");
        data.extend_from_slice(b"Subject: second\n\n");
        data.extend_from_slice(b"body two\n");
        data
    }

    #[test]
    fn splits_two_messages_and_tracks_offsets() {
        let data = sample_mbox();
        let mut reader = MboxReader::new(Cursor::new(data.clone()), 0).unwrap();

        let first = reader.next_message().unwrap().unwrap();
        assert_eq!(first.offset_before, 0);
        assert!(String::from_utf8_lossy(&first.raw).contains("Subject: first"));

        let second = reader.next_message().unwrap().unwrap();
        assert_eq!(second.offset_before, first.offset_after);
        assert!(String::from_utf8_lossy(&second.raw).contains("Subject: second"));
        assert_eq!(second.offset_after, data.len() as u64);

        assert!(reader.next_message().unwrap().is_none());
    }

    #[test]
    fn resumes_from_a_mid_file_offset() {
        let data = sample_mbox();
        let split_at = data
            .windows(FROM_LINE_MARKER.len())
            .enumerate()
            .filter(|(_, w)| *w == FROM_LINE_MARKER)
            .nth(1)
            .map(|(i, _)| i as u64)
            .unwrap();

        let mut reader = MboxReader::new(Cursor::new(data), split_at).unwrap();
        let message = reader.next_message().unwrap().unwrap();
        assert!(String::from_utf8_lossy(&message.raw).contains("Subject: second"));
        assert!(reader.next_message().unwrap().is_none());
    }

    const FROM_LINE_MARKER: &[u8] = b"From bob@example.com";

    #[test]
    fn count_remaining_messages_does_not_move_the_cursor() {
        let data = sample_mbox();
        let mut reader = MboxReader::new(Cursor::new(data), 0).unwrap();
        assert_eq!(reader.count_remaining_messages().unwrap(), 2);
        assert_eq!(reader.tell(), 0);
        assert!(reader.next_message().unwrap().is_some());
    }

    #[test]
    fn date_header_takes_priority_over_received() {
        let raw = b"Date: Mon, 1 Jan 2024 00:00:00 +0000\r\nReceived: from a; Tue, 2 Jan 2024 00:00:00 +0000\r\n\r\nbody";
        let date = internal_date_for(raw);
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2024-01-01");
    }

    #[test]
    fn falls_back_to_received_when_date_is_absent() {
        let raw = b"Subject: no date\r\nReceived: from a; Wed, 3 Jan 2024 00:00:00 +0000\r\n\r\nbody";
        let date = internal_date_for(raw);
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2024-01-03");
    }

    #[test]
    fn falls_back_to_now_when_nothing_parses() {
        let raw = b"Subject: nothing useful\r\n\r\nbody";
        // Just confirm it doesn't panic and returns something in the current era.
        let date = internal_date_for(raw);
        assert!(date.timestamp() > 1_700_000_000);
    }
}
