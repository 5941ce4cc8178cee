//! Header and body decoding: RFC 2047 encoded words, MIME part walking and
//! HTML-to-text extraction.

use std::sync::LazyLock;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use mail_parser::{Message, MessagePart, MessageParser, MimeHeaders, PartType};
use regex::Regex;

/// One message decoded for display. `date_raw` is the unparsed origination
/// header; formatting happens in [`crate::mail::date`].
#[derive(Debug, Clone)]
pub struct DecodedEmail {
    pub from_addr: String,
    pub subject: String,
    pub date_raw: Option<String>,
    pub body: String,
}

/// Parse a raw RFC 822 message and pull out the display fields.
/// Returns `None` only when the bytes are not parseable as a message at all.
pub fn decode_message(raw: &[u8]) -> Option<DecodedEmail> {
    let msg = MessageParser::default().parse(raw)?;

    let from_addr = msg
        .header_raw("From")
        .map(|h| decode_header(h.trim()))
        .unwrap_or_else(|| "Неизвестно".to_string());
    let subject = msg
        .header_raw("Subject")
        .map(|h| decode_header(h.trim()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Без темы".to_string());
    let date_raw = msg.header_raw("Date").map(|h| h.trim().to_string());
    let body = extract_text(&msg);

    Some(DecodedEmail {
        from_addr,
        subject,
        date_raw,
        body,
    })
}

// ── Header decoding ─────────────────────────────────────────────────

// The charset group accepts the empty string; decode_word maps it to UTF-8.
static ENCODED_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"=\?([^?\s]*)\?([bBqQ])\?([^?\s]*)\?=").unwrap()
});

// Encoded words in the wild frequently omit the base64 padding.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a raw header value: every RFC 2047 encoded word is decoded
/// according to its declared charset (UTF-8 when effectively unspecified),
/// unencoded segments pass through, and whitespace between two adjacent
/// encoded words is dropped. Undecodable segments fall back to their raw
/// form; this function never fails.
///
/// Already-plain headers come back unchanged.
pub fn decode_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_end = 0;
    let mut prev_was_encoded = false;

    for caps in ENCODED_WORD_RE.captures_iter(raw) {
        let m = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        let gap = &raw[last_end..m.0];
        // RFC 2047: whitespace separating two encoded words is not rendered.
        if !(prev_was_encoded && gap.chars().all(char::is_whitespace)) {
            out.push_str(gap);
        }

        let charset = caps.get(1).map_or("", |c| c.as_str());
        let encoding = caps.get(2).map_or("", |c| c.as_str());
        let payload = caps.get(3).map_or("", |c| c.as_str());
        match decode_word(charset, encoding, payload) {
            Some(decoded) => out.push_str(&decoded),
            // Undecodable: keep the raw encoded word rather than failing.
            None => out.push_str(&raw[m.0..m.1]),
        }

        last_end = m.1;
        prev_was_encoded = true;
    }
    out.push_str(&raw[last_end..]);
    out
}

fn decode_word(charset: &str, encoding: &str, payload: &str) -> Option<String> {
    let bytes = match encoding {
        "b" | "B" => BASE64.decode(payload).ok()?,
        "q" | "Q" => decode_q(payload),
        _ => return None,
    };
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" | "" => String::from_utf8(bytes).ok(),
        // Other charsets are left to the caller's raw fallback.
        _ => None,
    }
}

/// Q-encoding: `_` is a space, `=XX` is a hex-encoded byte.
fn decode_q(payload: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut bytes = payload.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'_' => out.push(b' '),
            b'=' => {
                let hi = bytes.next();
                let lo = bytes.next();
                match (hi.and_then(hex_val), lo.and_then(hex_val)) {
                    (Some(h), Some(l)) => out.push(h << 4 | l),
                    _ => {
                        out.push(b'=');
                        out.extend(hi);
                        out.extend(lo);
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

// ── Body extraction ─────────────────────────────────────────────────

/// Extract readable text from a parsed message.
///
/// Walks every part in structural order, skips parts flagged as attachments,
/// and concatenates plain-text parts verbatim and HTML parts through
/// [`strip_html`]. Transfer decoding (base64, quoted-printable) has already
/// happened inside mail-parser.
pub fn extract_text(msg: &Message) -> String {
    let mut chunks: Vec<String> = Vec::new();
    for part in &msg.parts {
        if is_attachment(part) {
            continue;
        }
        match &part.body {
            PartType::Text(text) => chunks.push(text.to_string()),
            PartType::Html(html) => chunks.push(strip_html(html)),
            _ => {}
        }
    }
    normalize_paragraphs(&chunks.join("\n\n"))
}

fn is_attachment(part: &MessagePart) -> bool {
    part.content_disposition()
        .is_some_and(|cd| cd.ctype().eq_ignore_ascii_case("attachment"))
}

// ── HTML stripping ──────────────────────────────────────────────────

static STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<style[^>]*>.*?</style>").unwrap()
});
static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap()
});
static BR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(?:p|div)[^>]*>").unwrap());
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static SPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r]+").unwrap());

/// Named entities rendered for display. `&amp;` is decoded last so that
/// `&amp;lt;` stays `&lt;` instead of turning into `<`.
const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&mdash;", "\u{2014}"),
    ("&ndash;", "\u{2013}"),
    ("&laquo;", "\u{00AB}"),
    ("&raquo;", "\u{00BB}"),
    ("&#47;", "/"),
    ("&amp;", "&"),
];

/// Reduce an HTML document to readable text: style/script blocks go away
/// with their content, `<br>` becomes a newline, paragraph and `<div>`
/// boundaries become blank lines, every other tag is dropped, the fixed
/// entity table is applied and whitespace is normalized.
pub fn strip_html(html: &str) -> String {
    let text = STYLE_RE.replace_all(html, "");
    let text = SCRIPT_RE.replace_all(&text, "");
    let text = BR_RE.replace_all(&text, "\n");
    let text = BLOCK_RE.replace_all(&text, "\n\n");
    let text = TAG_RE.replace_all(&text, "");

    let mut text = text.into_owned();
    for (entity, replacement) in ENTITIES {
        text = text.replace(entity, replacement);
    }

    let text = SPACE_RUN_RE.replace_all(&text, " ");
    normalize_paragraphs(&text)
}

static PARA_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Split on blank-line boundaries, trim each paragraph, drop empty ones and
/// rejoin with exactly one blank line. Normalizes inconsistent whitespace
/// without losing paragraph structure.
pub fn normalize_paragraphs(text: &str) -> String {
    PARA_SPLIT_RE
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Header decoding ─────────────────────────────────────────────

    #[test]
    fn plain_header_unchanged() {
        assert_eq!(decode_header("Hello world"), "Hello world");
        assert_eq!(
            decode_header("alice@example.com"),
            "alice@example.com"
        );
    }

    #[test]
    fn plain_header_decoding_is_idempotent() {
        let once = decode_header("Meeting notes");
        assert_eq!(decode_header(&once), once);
    }

    #[test]
    fn base64_utf8_word() {
        // "Привет" in UTF-8, base64.
        assert_eq!(
            decode_header("=?UTF-8?B?0J/RgNC40LLQtdGC?="),
            "Привет"
        );
    }

    #[test]
    fn base64_word_without_padding() {
        // "тема", canonical unpadded form.
        assert_eq!(decode_header("=?UTF-8?B?0YLQtdC80LA?="), "тема");
    }

    #[test]
    fn q_encoded_word_with_underscores() {
        assert_eq!(
            decode_header("=?utf-8?Q?Hello_=D0=BC=D0=B8=D1=80?="),
            "Hello мир"
        );
    }

    #[test]
    fn mixed_plain_and_encoded_segments() {
        assert_eq!(
            decode_header("Re: =?UTF-8?B?0YLQtdC80LA?= (fwd)"),
            "Re: тема (fwd)"
        );
    }

    #[test]
    fn whitespace_between_encoded_words_dropped() {
        assert_eq!(
            decode_header("=?UTF-8?B?0J/RgNC4?= =?UTF-8?B?0LLQtdGC?="),
            "Привет"
        );
    }

    #[test]
    fn unknown_charset_falls_back_to_raw() {
        let raw = "=?koi8-r?B?8NLJ18XU?=";
        assert_eq!(decode_header(raw), raw);
    }

    #[test]
    fn invalid_base64_falls_back_to_raw() {
        let raw = "=?UTF-8?B?!!not-base64!!?=";
        assert_eq!(decode_header(raw), raw);
    }

    #[test]
    fn default_charset_is_utf8() {
        assert_eq!(decode_header("=??Q?plain?="), "plain");
    }

    // ── HTML stripping ──────────────────────────────────────────────

    #[test]
    fn strip_html_round_trip() {
        let html = "<html><head><style>body { color: red; }</style>\
                    <script>alert('x');</script></head>\
                    <body><p>First &amp; second</p><p>Third&nbsp;para<br>next line</p></body></html>";
        assert_eq!(
            strip_html(html),
            "First & second\n\nThird para\nnext line"
        );
    }

    #[test]
    fn strip_html_removes_style_content() {
        let out = strip_html("<style>.x{display:none}</style>Visible");
        assert_eq!(out, "Visible");
        assert!(!out.contains("display"));
    }

    #[test]
    fn strip_html_div_becomes_paragraph_break() {
        assert_eq!(
            strip_html("<div>one</div><div>two</div>"),
            "one\n\ntwo"
        );
    }

    #[test]
    fn strip_html_entities() {
        assert_eq!(
            strip_html("&laquo;a&raquo; &mdash; b &lt;c&gt; &#47;d"),
            "«a» — b <c> /d"
        );
    }

    #[test]
    fn strip_html_amp_decoded_last() {
        assert_eq!(strip_html("&amp;lt;"), "&lt;");
    }

    #[test]
    fn strip_html_collapses_whitespace() {
        assert_eq!(
            strip_html("<p>a    b</p>\n\n\n\n<p>c</p>"),
            "a b\n\nc"
        );
    }

    #[test]
    fn strip_html_no_tag_residue() {
        let out = strip_html("<a href=\"http://x\">link</a> <span class=\"y\">text</span>");
        assert!(!out.contains('<') && !out.contains('>'));
        assert_eq!(out, "link text");
    }

    // ── Paragraph normalization ─────────────────────────────────────

    #[test]
    fn normalize_trims_and_drops_empty_paragraphs() {
        assert_eq!(
            normalize_paragraphs("  one  \n\n\n\n   \n\n two \n\nthree"),
            "one\n\ntwo\n\nthree"
        );
    }

    #[test]
    fn normalize_keeps_single_newlines_inside_paragraph() {
        assert_eq!(normalize_paragraphs("a\nb\n\nc"), "a\nb\n\nc");
    }

    // ── Full message decoding ───────────────────────────────────────

    #[test]
    fn decode_single_part_plain() {
        let raw = b"From: alice@example.com\r\n\
                    Subject: =?UTF-8?B?0J/RgNC40LLQtdGC?=\r\n\
                    Date: Mon, 12 May 2025 14:30:00 +0300\r\n\
                    Content-Type: text/plain; charset=utf-8\r\n\
                    \r\n\
                    Hello there.\r\n";
        let decoded = decode_message(raw).unwrap();
        assert_eq!(decoded.subject, "Привет");
        assert_eq!(decoded.from_addr, "alice@example.com");
        assert_eq!(decoded.body, "Hello there.");
        assert_eq!(
            decoded.date_raw.as_deref(),
            Some("Mon, 12 May 2025 14:30:00 +0300")
        );
    }

    #[test]
    fn decode_multipart_concatenates_and_skips_attachment() {
        let raw = b"From: bob@example.com\r\n\
                    Subject: report\r\n\
                    Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
                    \r\n\
                    --sep\r\n\
                    Content-Type: text/plain\r\n\
                    \r\n\
                    Plain part.\r\n\
                    --sep\r\n\
                    Content-Type: text/html\r\n\
                    \r\n\
                    <p>Html part.</p>\r\n\
                    --sep\r\n\
                    Content-Type: text/plain\r\n\
                    Content-Disposition: attachment; filename=\"log.txt\"\r\n\
                    \r\n\
                    SECRET ATTACHMENT\r\n\
                    --sep--\r\n";
        let decoded = decode_message(raw).unwrap();
        assert_eq!(decoded.body, "Plain part.\n\nHtml part.");
        assert!(!decoded.body.contains("SECRET"));
    }

    #[test]
    fn decode_missing_headers_get_placeholders() {
        let raw = b"Content-Type: text/plain\r\n\r\nbody\r\n";
        let decoded = decode_message(raw).unwrap();
        assert_eq!(decoded.subject, "Без темы");
        assert_eq!(decoded.from_addr, "Неизвестно");
        assert!(decoded.date_raw.is_none());
    }
}
