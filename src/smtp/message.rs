//! MIME construction, macro substitution, and header rules (spec §4.5
//! "Message preparation rules"). Built on `mail-builder`, the one piece of the
//! teacher's mail stack that survives unchanged in purpose: composing RFC
//! 5322 messages from structured parts.

use crate::config::EngineConfig;
use crate::model::{CampaignConfig, MessageTemplate, RecipientTarget};
use crate::store::Randomness;
use chrono::Utc;
use mail_builder::headers::text::Text;
use mail_builder::mime::MimePart;
use mail_builder::MessageBuilder;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 Thunderbird/115.0",
    "Microsoft Outlook 16.0",
    "Apple Mail (16.0)",
    "Mozilla/5.0 Evolution/3.48",
];

/// Replaces `%%FIRST_NAME%%`, `%%LAST_NAME%%`, `%%EMAIL%%`, `%%RANDOM%%`
/// (4-digit), `%%DATE%%` (YYYY-MM-DD), `%%TIME%%` (HH:MM:SS), `%%CAMPAIGN%%`.
pub fn substitute_macros(
    template: &str,
    recipient: &RecipientTarget,
    campaign_name: &str,
    randomness: &dyn Randomness,
) -> String {
    let now = Utc::now();
    template
        .replace("%%FIRST_NAME%%", recipient.first_name.as_deref().unwrap_or(""))
        .replace("%%LAST_NAME%%", recipient.last_name.as_deref().unwrap_or(""))
        .replace("%%EMAIL%%", &recipient.email)
        .replace("%%RANDOM%%", &format!("{:04}", randomness.random_u32(0..10_000)))
        .replace("%%DATE%%", &now.format("%Y-%m-%d").to_string())
        .replace("%%TIME%%", &now.format("%H:%M:%S").to_string())
        .replace("%%CAMPAIGN%%", campaign_name)
}

/// Returns the set of macro tokens `template` still contains unresolved —
/// used by the pre-flight check (spec §4.7 "Template renders without
/// unresolved macros").
pub fn unresolved_macros(rendered: &str) -> Vec<&'static str> {
    const TOKENS: &[&str] = &[
        "%%FIRST_NAME%%",
        "%%LAST_NAME%%",
        "%%EMAIL%%",
        "%%RANDOM%%",
        "%%DATE%%",
        "%%TIME%%",
        "%%CAMPAIGN%%",
    ];
    TOKENS.iter().copied().filter(|t| rendered.contains(t)).collect()
}

fn message_id(sender_domain: &str, randomness: &dyn Randomness) -> String {
    let stamp = Utc::now().timestamp_millis();
    let rand = randomness.random_u32(0..u32::MAX);
    format!("{rand:08x}.{stamp}@{sender_domain}")
}

fn tracking_pixel(html: &str, campaign_id: &str, recipient_email: &str, tracking_base_url: &str) -> String {
    let pixel = format!(
        "<img src=\"{tracking_base_url}/open/{campaign_id}/{}\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none\"/>",
        urlencode(recipient_email)
    );
    if let Some(idx) = html.rfind("</body>") {
        let mut out = String::with_capacity(html.len() + pixel.len());
        out.push_str(&html[..idx]);
        out.push_str(&pixel);
        out.push_str(&html[idx..]);
        out
    } else {
        format!("{html}{pixel}")
    }
}

fn urlencode(value: &str) -> String {
    value
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                (b as char).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect()
}

pub struct PreparedMessage {
    pub raw: Vec<u8>,
    pub message_id: String,
}

/// Renders macros, builds MIME per spec, and serializes to wire bytes.
#[allow(clippy::too_many_arguments)]
pub fn prepare(
    config: &EngineConfig,
    campaign: &CampaignConfig,
    template: &MessageTemplate,
    subject: &str,
    recipient: &RecipientTarget,
    campaign_id_for_tracking: Option<&str>,
    tracking_base_url: Option<&str>,
    randomness: &dyn Randomness,
) -> Result<PreparedMessage, std::io::Error> {
    let rendered_subject = substitute_macros(subject, recipient, &campaign.campaign_name, randomness);
    let rendered_text = template
        .text
        .as_deref()
        .map(|t| substitute_macros(t, recipient, &campaign.campaign_name, randomness));
    let mut rendered_html = template
        .html
        .as_deref()
        .map(|h| substitute_macros(h, recipient, &campaign.campaign_name, randomness));

    if let (Some(html), Some(campaign_id), Some(base_url)) =
        (&rendered_html, campaign_id_for_tracking, tracking_base_url)
    {
        rendered_html = Some(tracking_pixel(html, campaign_id, &recipient.email, base_url));
    }

    let sender_domain = campaign.sender.split('@').nth(1).unwrap_or("localhost");
    let mid = message_id(sender_domain, randomness);

    let mut builder = MessageBuilder::new()
        .from(campaign.sender.as_str())
        .to(recipient.email.as_str())
        .subject(rendered_subject)
        .date(Utc::now().timestamp());

    if !campaign.cc.is_empty() {
        builder = builder.cc(campaign.cc.iter().map(String::as_str).collect::<Vec<_>>());
    }
    if !campaign.bcc.is_empty() {
        builder = builder.bcc(campaign.bcc.iter().map(String::as_str).collect::<Vec<_>>());
    }

    if config.custom_message_id {
        builder = builder.message_id(mid.clone());
    }

    builder = builder.header(
        "User-Agent",
        Text::new(USER_AGENTS[randomness.random_index(USER_AGENTS.len())]),
    );
    builder = builder.header("Precedence", Text::new("bulk"));
    builder = builder.header("Auto-Submitted", Text::new("auto-generated"));

    if config.require_unsubscribe_header {
        let unsubscribe = format!("<mailto:unsubscribe@{sender_domain}>");
        builder = builder.header("List-Unsubscribe", Text::new(unsubscribe));
        builder = builder.header("List-Unsubscribe-Post", Text::new("List-Unsubscribe=One-Click"));
    }

    let body = match (rendered_html, rendered_text) {
        (Some(html), Some(text)) => MimePart::new(
            "multipart/related",
            vec![MimePart::new("text/html; charset=utf-8", html), MimePart::new("text/plain; charset=utf-8", text)],
        ),
        (Some(html), None) => MimePart::new("text/html; charset=utf-8", html),
        (None, Some(text)) => MimePart::new("text/plain; charset=utf-8", text),
        (None, None) => MimePart::new("text/plain; charset=utf-8", String::new()),
    };

    let raw = builder.body(body).write_to_vec()?;
    Ok(PreparedMessage { raw, message_id: mid })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::OsRandomness;

    fn recipient() -> RecipientTarget {
        let mut r = RecipientTarget::new("jane@example.com");
        r.first_name = Some("Jane".to_string());
        r.last_name = Some("Doe".to_string());
        r
    }

    #[test]
    fn substitutes_all_known_macros() {
        let rendered = substitute_macros(
            "Hi %%FIRST_NAME%% %%LAST_NAME%% <%%EMAIL%%> code=%%RANDOM%% camp=%%CAMPAIGN%%",
            &recipient(),
            "spring-sale",
            &OsRandomness,
        );
        assert!(rendered.contains("Hi Jane Doe <jane@example.com>"));
        assert!(rendered.contains("camp=spring-sale"));
        assert!(unresolved_macros(&rendered).is_empty());
    }

    #[test]
    fn unresolved_macros_detects_leftover_tokens() {
        assert_eq!(unresolved_macros("hello %%FIRST_NAME%%"), vec!["%%FIRST_NAME%%"]);
        assert!(unresolved_macros("hello Jane").is_empty());
    }

    #[test]
    fn tracking_pixel_inserts_before_closing_body() {
        let html = "<html><body><p>hi</p></body></html>";
        let with_pixel = tracking_pixel(html, "camp-1", "a@example.com", "https://t.example.com");
        assert!(with_pixel.contains("<img src=\"https://t.example.com/open/camp-1/a%40example.com\""));
        assert!(with_pixel.ends_with("</body></html>"));
    }
}
