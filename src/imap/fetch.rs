//! Message enumeration (spec §4.6 steps 7-9): `UID SEARCH`, envelope listing,
//! and raw MIME fetch for the bulk dump.

use async_imap::types::{Fetch, Flag};
use async_imap::Session;
use chrono::{DateTime, Utc};
use futures::io::{AsyncRead, AsyncWrite};
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
pub struct MessageSummary {
    pub folder: String,
    pub uid: u32,
    pub sender: Option<String>,
    pub sender_name: Option<String>,
    pub subject: Option<String>,
    pub preview: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentDescriptor {
    pub filename: Option<String>,
    pub content_type: String,
    pub size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
    pub raw: Vec<u8>,
}

fn decode_header_bytes(bytes: Option<&[u8]>) -> Option<String> {
    bytes.map(|b| String::from_utf8_lossy(b).trim().to_string()).filter(|s| !s.is_empty())
}

fn address_parts(addresses: Option<&[async_imap::types::Address<'_>]>) -> (Option<String>, Option<String>) {
    let Some(address) = addresses.and_then(|a| a.first()) else {
        return (None, None);
    };
    let name = decode_header_bytes(address.name.as_deref());
    let mailbox = decode_header_bytes(address.mailbox.as_deref());
    let host = decode_header_bytes(address.host.as_deref());
    let email = match (mailbox, host) {
        (Some(m), Some(h)) => Some(format!("{m}@{h}")),
        (Some(m), None) => Some(m),
        _ => None,
    };
    (email, name)
}

fn parse_envelope_date(raw: Option<&[u8]>) -> Option<DateTime<Utc>> {
    let text = raw.map(|b| String::from_utf8_lossy(b).to_string())?;
    DateTime::parse_from_rfc2822(text.trim()).ok().map(|dt| dt.with_timezone(&Utc))
}

fn summarize(folder: &str, fetch: &Fetch) -> Option<MessageSummary> {
    let uid = fetch.uid?;
    let flags: Vec<Flag<'_>> = fetch.flags().collect();
    let envelope = fetch.envelope();

    let (sender, sender_name) = envelope
        .map(|e| address_parts(e.from.as_deref()))
        .unwrap_or((None, None));

    Some(MessageSummary {
        folder: folder.to_string(),
        uid,
        sender,
        sender_name,
        subject: envelope.and_then(|e| decode_header_bytes(e.subject.as_deref())),
        // Listing fetches ENVELOPE/BODYSTRUCTURE only (spec: "without decoding
        // bodies when only listing"); no preview text is available here.
        preview: None,
        is_read: flags.contains(&Flag::Seen),
        is_starred: flags.contains(&Flag::Flagged),
        received_at: envelope.and_then(|e| parse_envelope_date(e.date.as_deref())),
    })
}

/// `UID SEARCH ALL` then `FETCH (UID FLAGS ENVELOPE BODYSTRUCTURE)` for up to
/// `limit` most recent UIDs, deduped by `(folder, uid)` and sorted by
/// `received_at` descending (spec step "Ordering & deduplication").
pub async fn list_envelopes<T>(session: &mut Session<T>, folder: &str, limit: usize) -> anyhow::Result<Vec<MessageSummary>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut uids: Vec<u32> = session.uid_search("ALL").await?.into_iter().collect();
    uids.sort_unstable();
    uids.reverse();
    uids.truncate(limit);
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let sequence = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
    let fetches: Vec<Fetch> = session
        .uid_fetch(sequence, "(UID FLAGS ENVELOPE BODYSTRUCTURE)")
        .await?
        .try_collect()
        .await?;

    let mut seen: HashSet<(String, u32)> = HashSet::new();
    let mut summaries: Vec<MessageSummary> = Vec::new();
    for fetch in &fetches {
        if let Some(summary) = summarize(folder, fetch) {
            if seen.insert((summary.folder.clone(), summary.uid)) {
                summaries.push(summary);
            }
        }
    }
    summaries.sort_by(|a, b| b.received_at.cmp(&a.received_at));
    Ok(summaries)
}

/// `FETCH (UID FLAGS BODY[])`, parsed into text/HTML parts and attachment
/// descriptors without decoding attachment bodies.
pub async fn fetch_raw<T>(session: &mut Session<T>, uid: u32) -> anyhow::Result<RawMessage>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let fetches: Vec<Fetch> = session
        .uid_fetch(uid.to_string(), "(UID FLAGS BODY[])")
        .await?
        .try_collect()
        .await?;
    let Some(fetch) = fetches.into_iter().find(|f| f.uid == Some(uid)) else {
        anyhow::bail!("UID {uid} not returned by server");
    };
    let raw = fetch.body().map(<[u8]>::to_vec).unwrap_or_default();
    Ok(parse_raw_message(raw))
}

fn parse_raw_message(raw: Vec<u8>) -> RawMessage {
    let Some(parsed) = mail_parser::MessageParser::default().parse(&raw) else {
        return RawMessage { raw, ..Default::default() };
    };

    let text = parsed.body_text(0).map(|s| s.to_string());
    let html = parsed.body_html(0).map(|s| s.to_string());
    let attachments = parsed
        .attachments()
        .map(|part| AttachmentDescriptor {
            filename: part.attachment_name().map(str::to_string),
            content_type: part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: part.contents().len(),
        })
        .collect();

    RawMessage { text, html, attachments, raw }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_simple_multipart_message() {
        let raw = b"From: a@example.com\r\nTo: b@example.com\r\nSubject: hi\r\nContent-Type: multipart/mixed; boundary=X\r\n\r\n--X\r\nContent-Type: text/plain\r\n\r\nhello\r\n--X\r\nContent-Type: application/pdf\r\nContent-Disposition: attachment; filename=\"a.pdf\"\r\n\r\n%PDF-1.4\r\n--X--\r\n".to_vec();
        let parsed = parse_raw_message(raw);
        assert_eq!(parsed.text.as_deref(), Some("hello\r\n"));
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename.as_deref(), Some("a.pdf"));
    }
}
