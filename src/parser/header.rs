//! Top-level header handling: folding, charset fallback, RFC 2047 encoded-words
//! and `Date:` parsing.
//!
//! Header values are kept as raw bytes until [`decode_header_value`] turns them
//! into text, so the charset fallback chain sees exactly what the server sent.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use encoding_rs::Encoding;
use tracing::{debug, warn};

/// How many RFC 2047 segments of a header value are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderWords {
    /// Only the first decoded segment (plain run or merged encoded-word run).
    #[default]
    First,
    /// Every segment, joined.
    All,
}

/// Raw `(lowercase_name, value_bytes)` pairs of the top-level header block.
#[derive(Debug, Clone, Default)]
pub struct RawHeaders {
    fields: Vec<(String, Vec<u8>)>,
}

impl RawHeaders {
    /// Read the header block of a raw RFC 822 message (everything up to the
    /// first blank line) and unfold continuation lines.
    pub fn read(raw_message: &[u8]) -> Self {
        let block = &raw_message[..header_end(raw_message).unwrap_or(raw_message.len())];
        Self {
            fields: unfold_headers(block),
        }
    }

    /// First value for a header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Number of header fields read.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the block contained no header fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Find the byte offset where headers end (position of the first blank line).
pub fn header_end(data: &[u8]) -> Option<usize> {
    if data.starts_with(b"\n") || data.starts_with(b"\r\n") {
        return Some(0);
    }
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some(i);
        }
        if i + 3 < data.len()
            && data[i] == b'\r'
            && data[i + 1] == b'\n'
            && data[i + 2] == b'\r'
            && data[i + 3] == b'\n'
        {
            return Some(i);
        }
    }
    None
}

/// Unfold headers: join continuation lines (starting with space or tab) with
/// the previous header. Lines without a colon are skipped.
fn unfold_headers(block: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut result: Vec<(String, Vec<u8>)> = Vec::new();

    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.starts_with(b" ") || line.starts_with(b"\t") {
            if let Some(last) = result.last_mut() {
                last.1.push(b' ');
                last.1.extend_from_slice(line.trim_ascii());
            }
        } else if let Some(colon_pos) = line.iter().position(|&b| b == b':') {
            let name = String::from_utf8_lossy(&line[..colon_pos])
                .trim()
                .to_ascii_lowercase();
            let value = line[colon_pos + 1..].trim_ascii().to_vec();
            result.push((name, value));
        }
    }

    result
}

/// Decode bytes of unknown provenance to text.
///
/// Without a declared charset: strict UTF-8, then ISO-8859-1 (which accepts
/// every byte; 0x80-0x9F stay C1 controls). With a declared charset: that
/// charset, then UTF-8 with invalid bytes skipped. Never fails.
///
/// Declared labels resolve through `encoding_rs`, so `iso-8859-1` and
/// `latin1` labels are read as windows-1252.
pub fn decode_unknown(charset: Option<&str>, bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    let Some(charset) = charset.map(str::trim).filter(|c| !c.is_empty()) else {
        return match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                debug!("Bytes are not UTF-8, decoding as ISO-8859-1");
                encoding_rs::mem::decode_latin1(bytes).into_owned()
            }
        };
    };

    let declared = Encoding::for_label(charset.as_bytes()).and_then(|encoding| {
        encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|s| s.into_owned())
    });

    declared.unwrap_or_else(|| {
        debug!(
            charset = charset,
            "Declared charset unusable, decoding as UTF-8 and skipping invalid bytes"
        );
        utf8_skipping_invalid(bytes)
    })
}

/// UTF-8 decode that drops invalid sequences instead of replacing them.
fn utf8_skipping_invalid(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

/// Turn a raw header value into plain text: charset fallback first, then
/// RFC 2047 decoding.
///
/// With [`HeaderWords::First`], only the first segment survives: for
/// `"Re: =?UTF-8?B?SG9sYQ==?="` that is `"Re: "`.
pub fn decode_header_value(raw: &[u8], charset: Option<&str>, words: HeaderWords) -> String {
    let text = decode_unknown(charset, raw);
    let segments = encoded_word_segments(&text);
    match words {
        HeaderWords::First => segments.into_iter().next().unwrap_or(text),
        HeaderWords::All => segments.concat(),
    }
}

/// Decode every RFC 2047 encoded-word in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
pub fn decode_encoded_words(input: &str) -> String {
    encoded_word_segments(input).concat()
}

/// Split a header value into runs: plain text, or adjacent encoded-words that
/// share a charset (their bytes are joined before decoding, so a character
/// split across two words survives).
fn encoded_word_segments(input: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    // Pending encoded run: (charset, bytes)
    let mut pending: Option<(String, Vec<u8>)> = None;
    let mut plain = String::new();
    let mut remaining = input;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        let after_start = &remaining[start + 2..];

        let Some(word) = try_decode_one_word(after_start) else {
            plain.push_str(before);
            plain.push_str("=?");
            remaining = after_start;
            continue;
        };

        // Whitespace between two encoded-words is not part of the text (RFC 2047 §6.2)
        let gap_is_fold = pending.is_some() && plain.is_empty() && before.trim().is_empty();
        if !gap_is_fold {
            plain.push_str(before);
        }

        let same_run = plain.is_empty()
            && matches!(&pending, Some((charset, _)) if charset.eq_ignore_ascii_case(&word.charset));
        if same_run {
            if let Some((_, bytes)) = pending.as_mut() {
                bytes.extend_from_slice(&word.bytes);
            }
        } else {
            if let Some((charset, bytes)) = pending.take() {
                segments.push(decode_charset(&charset, &bytes));
            }
            if !plain.is_empty() {
                segments.push(std::mem::take(&mut plain));
            }
            pending = Some((word.charset, word.bytes));
        }
        remaining = &after_start[word.consumed..];
    }

    if let Some((charset, bytes)) = pending.take() {
        segments.push(decode_charset(&charset, &bytes));
    }
    plain.push_str(remaining);
    if !plain.is_empty() {
        segments.push(plain);
    }
    segments
}

struct EncodedWord {
    charset: String,
    bytes: Vec<u8>,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

fn try_decode_one_word(s: &str) -> Option<EncodedWord> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    // RFC 2231 language suffix: charset*lang
    let charset = s[..first_q].split('*').next().unwrap_or_default();
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    let bytes = match encoding {
        "B" | "b" => decode_base64(encoded_text.as_bytes())?,
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    Some(EncodedWord {
        charset: charset.to_string(),
        bytes,
        consumed: first_q + 1 + second_q + 1 + end + 2,
    })
}

/// Base64 decoding for encoded-words. Whitespace is ignored, missing padding
/// is tolerated; any other foreign byte rejects the word.
fn decode_base64(input: &[u8]) -> Option<Vec<u8>> {
    fn val(c: u8) -> Option<u32> {
        match c {
            b'A'..=b'Z' => Some(u32::from(c - b'A')),
            b'a'..=b'z' => Some(u32::from(c - b'a') + 26),
            b'0'..=b'9' => Some(u32::from(c - b'0') + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &b in input {
        if b.is_ascii_whitespace() {
            continue;
        }
        if b == b'=' {
            break;
        }
        acc = (acc << 6) | val(b)?;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    Some(out)
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode bytes using a named charset.
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    match Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => {
            let (decoded, _) = encoding.decode_without_bom_handling(bytes);
            decoded.into_owned()
        }
        None => {
            warn!(
                charset = charset,
                "Unknown charset in encoded-word, falling back to UTF-8 lossy"
            );
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Parse an email `Date:` value.
///
/// Supports RFC 2822, ISO 8601 and the common broken variants mail servers
/// emit (missing day-of-week, named timezones).
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(trimmed);
    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];

    for candidate in [no_dow.clone(), replace_named_tz(&no_dow)] {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(&candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(&candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Last resort: let `mail-parser` try the value inside a one-line message.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    let fake_msg = format!("Date: {input}\n\n");
    let parsed = mail_parser::MessageParser::default().parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&dt)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches(',').trim().to_string();
        }
    }
    s.to_string()
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    const TZS: [(&str, &str); 10] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CEST", "+0200"),
        ("CET", "+0100"),
    ];
    for (name, offset) in TZS {
        if let Some(head) = s.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_adjacent_words_are_merged() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
        assert_eq!(
            decode_header_value(input.as_bytes(), None, HeaderWords::First),
            "Hola mundo"
        );
    }

    #[test]
    fn test_multibyte_char_split_across_words() {
        // "é" is C3 A9; each half sits in its own word.
        let input = "=?UTF-8?Q?caf=C3?= =?UTF-8?Q?=A9?=";
        assert_eq!(decode_encoded_words(input), "café");
    }

    #[test]
    fn test_first_segment_only() {
        let input = b"Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_header_value(input, None, HeaderWords::First), "Re: ");
        assert_eq!(
            decode_header_value(input, None, HeaderWords::All),
            "Re: Hola there"
        );
    }

    #[test]
    fn test_plain_value_passes_through() {
        assert_eq!(
            decode_header_value(b"Results lims 2024", None, HeaderWords::First),
            "Results lims 2024"
        );
    }

    #[test]
    fn test_invalid_word_kept_verbatim() {
        assert_eq!(decode_encoded_words("a =?broken b"), "a =?broken b");
        assert_eq!(decode_encoded_words("=?UTF-8?X?abc?="), "=?UTF-8?X?abc?=");
    }

    #[test]
    fn test_decode_unknown_utf8_then_latin1() {
        assert_eq!(decode_unknown(None, "Müller".as_bytes()), "Müller");
        assert_eq!(decode_unknown(None, b"M\xfcller"), "Müller");
        assert_eq!(decode_unknown(None, b"\xEF\xBB\xBFbom"), "bom");
        assert_eq!(decode_unknown(None, b"\x93q\x94"), "\u{93}q\u{94}");
    }

    #[test]
    fn test_decode_unknown_declared_charset() {
        assert_eq!(decode_unknown(Some("iso-8859-1"), b"caf\xe9"), "café");
        // Declared UTF-8 but invalid: skip the bad byte
        assert_eq!(decode_unknown(Some("utf-8"), b"caf\xe9!"), "caf!");
        // Unknown label: UTF-8 with skipping
        assert_eq!(decode_unknown(Some("x-made-up"), b"ok\xff"), "ok");
    }

    #[test]
    fn test_raw_headers_unfold_and_lookup() {
        let raw = b"From: Lab <lab@partner.com>\r\nSubject: Results\r\n\tlims 2024\r\n\r\nbody: not a header\r\n";
        let headers = RawHeaders::read(raw);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("FROM"), Some(&b"Lab <lab@partner.com>"[..]));
        assert_eq!(headers.get("subject"), Some(&b"Results lims 2024"[..]));
        assert_eq!(headers.get("date"), None);
    }

    #[test]
    fn test_header_end() {
        assert_eq!(header_end(b"From: a@b.com\nSubject: Hi\n\nBody\n"), Some(25));
        assert_eq!(
            header_end(b"From: a@b.com\r\nSubject: Hi\r\n\r\nBody\r\n"),
            Some(26)
        );
        assert_eq!(header_end(b"From: a@b.com"), None);
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 +0000").unwrap();
        assert_eq!(dt.format("%Y%m%d").to_string(), "20240104");
    }

    #[test]
    fn test_parse_date_named_tz() {
        let dt = parse_date("Thu, 04 Jan 2024 23:00:00 EST").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-05");
    }

    #[test]
    fn test_parse_date_garbage() {
        assert!(parse_date("").is_none());
    }
}
