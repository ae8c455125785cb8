//! Email body extraction.
//!
//! Every message yields three body shapes:
//!
//! - `raw`: the HTML reply when HTML is present, else the plain-text reply.
//! - `markdown`: the HTML reply converted to markdown, else the plain reply.
//! - `cleaned`: the plain reply with markdown syntax stripped and whitespace
//!   normalized to single spaces.
//!
//! "Reply" means the visible portion: quoted history from Outlook, Gmail and
//! Apple Mail is stripped before conversion.

use std::sync::OnceLock;

use mail_parser::{Message, PartType};
use regex::Regex;

use mailloom_types::mail::BodyFormats;

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|_| unreachable!())
}

/// Lines an attribution may wrap across: mail clients commonly split
/// "On <date> <sender>" and "wrote:" over two or three lines.
const QUOTE_HEADER_WINDOW: usize = 3;

fn quote_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r"(?i)^(on|le)\s.{0,300}?(wrote|écrit)\s*:"))
}

fn signature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r"(?i)^(--\s*$|__\s*$|sent from my \S.*)"))
}

fn forward_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r"(?i)^(-{2,}\s*forwarded message\s*-{2,}|begin forwarded message:)"))
}

/// Extract the three body formats from a parsed message.
pub fn extract_body_formats(message: &Message<'_>) -> BodyFormats {
    let text_body = message
        .text_bodies()
        .find_map(|part| match &part.body {
            PartType::Text(text) => Some(text.as_ref().to_string()),
            _ => None,
        })
        .unwrap_or_default();
    let html_body = message
        .html_bodies()
        .find_map(|part| match &part.body {
            PartType::Html(html) => Some(html.as_ref().to_string()),
            _ => None,
        })
        .unwrap_or_default();

    build_formats(&text_body, &html_body)
}

/// Assemble the formats from already-decoded plain and HTML bodies.
pub fn build_formats(text_body: &str, html_body: &str) -> BodyFormats {
    let reply_text = visible_reply(text_body);

    let raw = if !html_body.is_empty() {
        strip_quoted_html(html_body)
    } else if !reply_text.is_empty() {
        reply_text.clone()
    } else {
        text_body.to_string()
    };

    let markdown = if !html_body.is_empty() {
        let reply_html = strip_quoted_html(html_body);
        html2md::parse_html(&reply_html).trim().to_string()
    } else if !reply_text.is_empty() {
        reply_text.clone()
    } else {
        text_body.to_string()
    };

    let cleaned = strip_markdown(&reply_text);

    BodyFormats {
        raw,
        markdown,
        cleaned,
    }
}

/// The visible (unquoted) portion of a plain-text body.
///
/// Cuts at the first quote attribution (`On … wrote:` / `Le … écrit :`,
/// single-line or wrapped), at a signature marker (`--`, `__`,
/// `Sent from my …`), or at a forwarded-message header, and drops
/// `>`-quoted lines.
pub fn visible_reply(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if signature_re().is_match(trimmed) || forward_header_re().is_match(trimmed) {
            break;
        }
        if opens_quote_header(&lines[i..]) {
            break;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        kept.push(*line);
    }
    kept.join("\n").trim().to_string()
}

/// Whether the remaining lines open with a quote attribution.
///
/// The attribution may be wrapped, so up to [`QUOTE_HEADER_WINDOW`] lines
/// are joined before matching the terminal `wrote:` / `écrit :`.
fn opens_quote_header(lines: &[&str]) -> bool {
    let first = lines[0].trim_start().to_lowercase();
    if !first.starts_with("on ") && !first.starts_with("le ") {
        return false;
    }
    let joined = lines
        .iter()
        .take(QUOTE_HEADER_WINDOW)
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join(" ");
    quote_header_re().is_match(&joined)
}

/// Remove quoted history from an HTML body.
///
/// Markers, in match order: Outlook's `<hr id="stopSpelling">` (everything
/// after it is quoted), Gmail's `gmail_quote` container (and the preceding
/// `gmail_attr` attribution), Apple Mail's `blockquote type="cite"`, and a
/// generic blockquote opening with `On … wrote:` / `… écrit:`.
pub fn strip_quoted_html(html: &str) -> String {
    static OUTLOOK_RE: OnceLock<Regex> = OnceLock::new();
    static GMAIL_ATTR_RE: OnceLock<Regex> = OnceLock::new();
    static GMAIL_QUOTE_RE: OnceLock<Regex> = OnceLock::new();
    static CITE_RE: OnceLock<Regex> = OnceLock::new();
    static WROTE_BLOCKQUOTE_RE: OnceLock<Regex> = OnceLock::new();

    let outlook = OUTLOOK_RE.get_or_init(|| regex(r#"(?is)<hr[^>]*id="stopSpelling"[^>]*>.*$"#));
    if let Some(found) = outlook.find(html) {
        return html[..found.start()].trim().to_string();
    }

    let gmail_quote =
        GMAIL_QUOTE_RE.get_or_init(|| regex(r#"(?is)<div[^>]*class="[^"]*gmail_quote[^"]*".*$"#));
    if let Some(found) = gmail_quote.find(html) {
        let mut kept = html[..found.start()].to_string();
        let gmail_attr = GMAIL_ATTR_RE
            .get_or_init(|| regex(r#"(?is)<div[^>]*class="[^"]*gmail_attr[^"]*"[^>]*>.*?</div>"#));
        kept = gmail_attr.replace_all(&kept, "").into_owned();
        return kept.trim().to_string();
    }

    let cite = CITE_RE.get_or_init(|| regex(r#"(?is)<blockquote[^>]*type="cite".*$"#));
    if let Some(found) = cite.find(html) {
        return html[..found.start()].trim().to_string();
    }

    let wrote = WROTE_BLOCKQUOTE_RE
        .get_or_init(|| regex(r"(?is)<blockquote[^>]*>\s*(?:<[^>]+>\s*)*On\s[^<]*(wrote|écrit)\s*:.*$"));
    if let Some(found) = wrote.find(html) {
        return html[..found.start()].trim().to_string();
    }

    html.to_string()
}

/// Strip markdown syntax and collapse whitespace to single spaces.
fn strip_markdown(text: &str) -> String {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    static BOLD_STAR_RE: OnceLock<Regex> = OnceLock::new();
    static BOLD_UNDER_RE: OnceLock<Regex> = OnceLock::new();
    static ITALIC_STAR_RE: OnceLock<Regex> = OnceLock::new();
    static ITALIC_UNDER_RE: OnceLock<Regex> = OnceLock::new();
    static HEADER_RE: OnceLock<Regex> = OnceLock::new();
    static CODE_RE: OnceLock<Regex> = OnceLock::new();

    let mut cleaned = LINK_RE
        .get_or_init(|| regex(r"\[([^\]]+)\]\([^\)]+\)"))
        .replace_all(text, "$1")
        .into_owned();
    cleaned = BOLD_STAR_RE
        .get_or_init(|| regex(r"\*\*(.*?)\*\*"))
        .replace_all(&cleaned, "$1")
        .into_owned();
    cleaned = BOLD_UNDER_RE
        .get_or_init(|| regex(r"__(.*?)__"))
        .replace_all(&cleaned, "$1")
        .into_owned();
    cleaned = ITALIC_STAR_RE
        .get_or_init(|| regex(r"\*(.*?)\*"))
        .replace_all(&cleaned, "$1")
        .into_owned();
    cleaned = ITALIC_UNDER_RE
        .get_or_init(|| regex(r"_(.*?)_"))
        .replace_all(&cleaned, "$1")
        .into_owned();
    cleaned = HEADER_RE
        .get_or_init(|| regex(r"#+\s"))
        .replace_all(&cleaned, "")
        .into_owned();
    cleaned = CODE_RE
        .get_or_init(|| regex(r"`(.*?)`"))
        .replace_all(&cleaned, "$1")
        .into_owned();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_reply_cuts_at_attribution_line() {
        let text = "Thanks, sounds good!\n\nOn Tue, 15 Jul 2025, Bob wrote:\n> earlier message\n> more";
        assert_eq!(visible_reply(text), "Thanks, sounds good!");
    }

    #[test]
    fn visible_reply_drops_quoted_lines_and_signature() {
        let text = "See below.\n> quoted\nMy comment.\n-- \nAda\n";
        assert_eq!(visible_reply(text), "See below.\nMy comment.");
    }

    #[test]
    fn visible_reply_handles_french_attribution() {
        let text = "D'accord.\nLe mar. Bob a écrit :\n> ancien message";
        assert_eq!(visible_reply(text), "D'accord.");
    }

    #[test]
    fn visible_reply_cuts_attribution_wrapped_across_lines() {
        let text = "Works for me.\n\nOn Tue, Jul 15, 2025 at 9:01 AM Bob Carter\n<bob@example.com> wrote:\n> earlier message\n> more";
        assert_eq!(visible_reply(text), "Works for me.");
    }

    #[test]
    fn visible_reply_keeps_sentences_starting_with_on() {
        let text = "On Thursday we ship the release.\nPlease review before then.";
        assert_eq!(visible_reply(text), text);
    }

    #[test]
    fn visible_reply_cuts_device_signature() {
        let text = "Confirmed for Thursday.\n\nSent from my iPhone";
        assert_eq!(visible_reply(text), "Confirmed for Thursday.");
    }

    #[test]
    fn visible_reply_cuts_forwarded_message_block() {
        let text = "FYI, see below.\n\n---------- Forwarded message ----------\nFrom: Carol <carol@example.com>\nDate: Mon, 14 Jul 2025\nSubject: quarterly numbers";
        assert_eq!(visible_reply(text), "FYI, see below.");
    }

    #[test]
    fn strip_outlook_quote() {
        let html = r#"<div>New content</div><hr id="stopSpelling"><div>old quoted</div>"#;
        assert_eq!(strip_quoted_html(html), "<div>New content</div>");
    }

    #[test]
    fn strip_gmail_quote_and_attribution() {
        let html = concat!(
            r#"<div dir="ltr">Latest reply</div>"#,
            r#"<div class="gmail_attr">On Tue, Bob wrote:</div>"#,
            r#"<div class="gmail_quote"><blockquote>old</blockquote></div>"#,
        );
        assert_eq!(strip_quoted_html(html), r#"<div dir="ltr">Latest reply</div>"#);
    }

    #[test]
    fn strip_apple_mail_cite() {
        let html = r#"<div>Reply text</div><blockquote type="cite"><div>history</div></blockquote>"#;
        assert_eq!(strip_quoted_html(html), "<div>Reply text</div>");
    }

    #[test]
    fn strip_generic_wrote_blockquote() {
        let html = "<p>Answer.</p><blockquote><p>On Monday, Carol wrote:</p><p>old</p></blockquote>";
        assert_eq!(strip_quoted_html(html), "<p>Answer.</p>");
    }

    #[test]
    fn unmarked_html_is_left_intact() {
        let html = "<div>Just a plain message</div>";
        assert_eq!(strip_quoted_html(html), html);
    }

    #[test]
    fn plain_text_only_message_uses_reply_everywhere() {
        let formats = build_formats("Hello **there**\n> quoted", "");
        assert_eq!(formats.raw, "Hello **there**");
        assert_eq!(formats.markdown, "Hello **there**");
        assert_eq!(formats.cleaned, "Hello there");
    }

    #[test]
    fn html_message_converts_to_markdown() {
        let formats = build_formats(
            "Fallback text",
            "<div><b>Bold</b> and a <a href=\"https://example.com\">link</a></div>",
        );
        assert!(formats.raw.contains("<b>Bold</b>"));
        assert!(formats.markdown.contains("**Bold**"));
        assert!(formats.markdown.contains("example.com"));
        // Cleaned always derives from the plain reply.
        assert_eq!(formats.cleaned, "Fallback text");
    }

    #[test]
    fn cleaned_strips_links_headers_and_code() {
        let formats = build_formats(
            "# Title\nA [link](https://example.com) with `code` and _emphasis_.",
            "",
        );
        assert_eq!(formats.cleaned, "Title A link with code and emphasis.");
    }

    #[test]
    fn full_rfc822_message_extraction() {
        let raw = concat!(
            "From: ada@example.com\r\n",
            "To: bob@example.com\r\n",
            "Subject: plans\r\n",
            "Date: Tue, 15 Jul 2025 08:00:00 +0000\r\n",
            "Message-ID: <m1@example.com>\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "Let's meet at noon.\r\n",
            "\r\n",
            "On Mon, Bob wrote:\r\n",
            "> when do we meet?\r\n",
        );
        let message = mail_parser::MessageParser::default().parse(raw.as_bytes()).unwrap();
        let formats = extract_body_formats(&message);
        assert_eq!(formats.cleaned, "Let's meet at noon.");
        assert!(!formats.raw.contains("when do we meet"));
    }
}
