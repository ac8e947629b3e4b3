//! MIME tree walking: plain-text body detection and CSV attachment extraction.

use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{Encoding, Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::model::attachment::{AttachmentCandidate, Extraction};
use crate::parser::header::decode_unknown;

/// Maximum nesting of `message/rfc822` parts followed.
const MAX_DEPTH: usize = 10;

/// Parse a raw RFC 822 message into `mail-parser`'s part tree.
pub fn parse_message(raw_message: &[u8]) -> Result<Message<'_>> {
    let message_bytes = strip_envelope(raw_message);
    if message_bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::MalformedMessage("empty message".into()));
    }
    MessageParser::default()
        .parse(message_bytes)
        .ok_or_else(|| IngestError::MalformedMessage("not an RFC 822 message".into()))
}

/// Walk every part of `message` depth-first in document order, collecting the
/// plain-text body and the `text/csv` parts.
///
/// Multipart containers are only traversed. Every other part is a leaf and
/// bumps the part counter, which numbers synthesized names (`part-3.csv`).
pub fn extract(message: &Message<'_>) -> Extraction {
    let mut walker = Walker::default();
    walker.visit(message, 0, 0);
    walker.extraction
}

#[derive(Default)]
struct Walker {
    counter: usize,
    extraction: Extraction,
}

impl Walker {
    fn visit(&mut self, message: &Message<'_>, part_id: usize, depth: usize) {
        let Some(part) = message.parts.get(part_id) else {
            warn!(part_id, "MIME part referenced but missing");
            return;
        };

        match &part.body {
            PartType::Multipart(children) => {
                for &child in children {
                    self.visit(message, child as usize, depth);
                }
            }
            PartType::Message(nested) => {
                self.visit_leaf(message, part);
                if depth + 1 >= MAX_DEPTH {
                    warn!(depth, "Nested messages too deep, not descending");
                } else {
                    self.visit(nested, 0, depth + 1);
                }
            }
            _ => self.visit_leaf(message, part),
        }
    }

    fn visit_leaf(&mut self, message: &Message<'_>, part: &MessagePart<'_>) {
        let index = self.counter;
        self.counter += 1;

        let (maintype, subtype) = content_type(part);
        let mut name = part
            .content_type()
            .and_then(|ct| ct.attribute("name"))
            .map(collapse_rfc2231);

        debug!(
            index,
            content_type = %format!("{maintype}/{subtype}"),
            name = name.as_deref().unwrap_or(""),
            "Visiting MIME part"
        );

        if maintype == "text" && subtype == "plain" && name.is_none() {
            self.extraction.body_plain = Some(body_text(part));
            return;
        }

        let mime_type = format!("{maintype}/{subtype}");
        if name.as_deref().is_none_or(str::is_empty) {
            name = Some(format!("part-{index}{}", guess_extension(&mime_type)));
        }

        if maintype == "text" && subtype == "csv" {
            let decoded = transfer_decoded(message, part).filter(|_| !part.is_encoding_problem);
            let transfer_failed = decoded.is_none();
            if transfer_failed {
                warn!(index, "Could not undo the transfer encoding of a CSV part");
            }
            let content = decoded.unwrap_or_else(|| part.contents().to_vec());
            let charset = part
                .content_type()
                .and_then(|ct| ct.attribute("charset"))
                .map(|c| c.trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty());

            self.extraction.candidates.push(AttachmentCandidate {
                declared_name: name,
                content: (!content.is_empty()).then_some(content),
                charset,
                transfer_failed,
                mime_type,
            });
        }
    }
}

/// Lowercase `(maintype, subtype)`; parts without a `Content-Type` are `text/plain`.
fn content_type(part: &MessagePart<'_>) -> (String, String) {
    match part.content_type() {
        Some(ct) => (
            ct.ctype().to_ascii_lowercase(),
            ct.subtype().unwrap_or("plain").to_ascii_lowercase(),
        ),
        None => ("text".to_string(), "plain".to_string()),
    }
}

/// Text of a body part. `mail-parser` has already applied the declared charset
/// to text parts; anything it left as bytes goes through the fallback chain.
fn body_text(part: &MessagePart<'_>) -> String {
    match &part.body {
        PartType::Text(text) => text.to_string(),
        _ => {
            let charset = part.content_type().and_then(|ct| ct.attribute("charset"));
            decode_unknown(charset, part.contents())
        }
    }
}

/// Body bytes of `part` with the Content-Transfer-Encoding undone and no
/// charset conversion. `None` when the encoded body cannot be decoded.
fn transfer_decoded(message: &Message<'_>, part: &MessagePart<'_>) -> Option<Vec<u8>> {
    let raw = message
        .raw_message()
        .get(part.raw_body_offset()..part.raw_end_offset())?;
    match part.encoding {
        Encoding::Base64 => base64_decode(raw),
        Encoding::QuotedPrintable => quoted_printable_decode(raw),
        Encoding::None => Some(raw.to_vec()),
    }
}

/// Collapse an RFC 2231 extended value (`utf-8'en'Report%201.csv`) into plain
/// text. Values without the `charset'lang'` prefix are returned unchanged.
pub fn collapse_rfc2231(value: &str) -> String {
    let mut pieces = value.splitn(3, '\'');
    let (Some(charset), Some(_lang), Some(encoded)) = (pieces.next(), pieces.next(), pieces.next())
    else {
        return value.to_string();
    };
    if encoding_rs::Encoding::for_label(charset.as_bytes()).is_none() {
        return value.to_string();
    }

    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    decode_unknown(Some(charset), &decoded)
}

/// File extension (with the dot) for a MIME type, empty when unknown.
pub fn guess_extension(mime_type: &str) -> String {
    // mime_guess lists extensions alphabetically; pin the usual ones.
    let preferred = match mime_type {
        "text/plain" => Some("txt"),
        "text/html" => Some("html"),
        "text/csv" => Some("csv"),
        "message/rfc822" => Some("eml"),
        "application/octet-stream" => Some("bin"),
        "image/jpeg" => Some("jpg"),
        _ => None,
    };
    preferred
        .or_else(|| {
            mime_guess::get_mime_extensions_str(mime_type).and_then(|exts| exts.first().copied())
        })
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// Drop a UTF-8 BOM and the `From ` separator line MBOX exports put in
/// front of a message.
pub fn strip_envelope(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_raw(raw: &str) -> Extraction {
        let message = parse_message(raw.as_bytes()).unwrap();
        extract(&message)
    }

    const MIXED: &str = "From: lab@partner.com\r\n\
Subject: Results lims 2024\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
See attached.\r\n\
--XX\r\n\
Content-Type: text/csv; name=\"Report 1.csv\"\r\n\
Content-Disposition: attachment; filename=\"Report 1.csv\"\r\n\
\r\n\
id,val\r\n\
1,2\r\n\
--XX\r\n\
Content-Type: application/pdf; name=\"scan.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0=\r\n\
--XX--\r\n";

    #[test]
    fn test_csv_and_body_extracted() {
        let extraction = extract_raw(MIXED);
        assert_eq!(extraction.body_plain.as_deref().map(str::trim), Some("See attached."));
        assert_eq!(extraction.candidates.len(), 1);
        let csv = &extraction.candidates[0];
        assert_eq!(csv.declared_name.as_deref(), Some("Report 1.csv"));
        assert_eq!(csv.mime_type, "text/csv");
        let content = String::from_utf8(csv.content.clone().unwrap()).unwrap();
        assert!(content.starts_with("id,val"));
    }

    #[test]
    fn test_unnamed_csv_gets_part_name() {
        let raw = "From: a@b.com\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>hi</p>\r\n\
--B\r\n\
Content-Type: text/csv\r\n\
\r\n\
a,b\r\n\
--B--\r\n";
        let extraction = extract_raw(raw);
        assert!(extraction.body_plain.is_none());
        assert_eq!(extraction.body_or_placeholder(), "No plain-text email body");
        assert_eq!(
            extraction.candidates[0].declared_name.as_deref(),
            Some("part-1.csv")
        );
    }

    #[test]
    fn test_last_plain_body_wins() {
        let raw = "From: a@b.com\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
\r\n\
first\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
\r\n\
second\r\n\
--B--\r\n";
        let extraction = extract_raw(raw);
        assert_eq!(extraction.body_plain.as_deref().map(str::trim), Some("second"));
        assert!(extraction.candidates.is_empty());
    }

    #[test]
    fn test_rfc2231_name_is_collapsed() {
        let raw = "From: a@b.com\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/csv; name*=utf-8''R%C3%A9sultats%202024.csv\r\n\
\r\n\
x,y\r\n\
--B--\r\n";
        let extraction = extract_raw(raw);
        assert_eq!(
            extraction.candidates[0].declared_name.as_deref(),
            Some("Résultats 2024.csv")
        );
    }

    #[test]
    fn test_collapse_rfc2231() {
        assert_eq!(collapse_rfc2231("utf-8''a%20b.csv"), "a b.csv");
        assert_eq!(collapse_rfc2231("iso-8859-1'fr'caf%E9.csv"), "café.csv");
        assert_eq!(collapse_rfc2231("plain.csv"), "plain.csv");
        assert_eq!(collapse_rfc2231("it's fine"), "it's fine");
        assert_eq!(collapse_rfc2231("O'Brien's data.csv"), "O'Brien's data.csv");
    }

    #[test]
    fn test_guess_extension() {
        assert_eq!(guess_extension("text/csv"), ".csv");
        assert_eq!(guess_extension("text/plain"), ".txt");
        assert_eq!(guess_extension("application/x-unheard-of"), "");
    }

    #[test]
    fn test_empty_message_is_malformed() {
        assert!(matches!(
            parse_message(b"  \r\n"),
            Err(IngestError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_strip_envelope() {
        let data = b"From lab@partner.com Thu Jan 01 00:00:00 2024\nSubject: Test\n\nBody\n";
        assert!(strip_envelope(data).starts_with(b"Subject:"));
        assert_eq!(strip_envelope(b"Subject: T\n\nB"), b"Subject: T\n\nB");
        assert_eq!(
            strip_envelope(b"\xEF\xBB\xBFFrom: a@b.com\r\n\r\nx"),
            b"From: a@b.com\r\n\r\nx"
        );
    }

    #[test]
    fn test_csv_bytes_are_not_charset_converted() {
        // Base64 of "caf\xE9;1\n": Latin-1 bytes under a UTF-8 label
        let raw = "From: a@b.com\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/csv; charset=utf-8; name=\"a.csv\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
Y2Fm6TsxCg==\r\n\
--B--\r\n";
        let extraction = extract_raw(raw);
        let csv = &extraction.candidates[0];
        assert_eq!(csv.content.as_deref(), Some(&b"caf\xE9;1\n"[..]));
        assert_eq!(csv.charset.as_deref(), Some("utf-8"));
        assert!(!csv.transfer_failed);
    }

    #[test]
    fn test_quoted_printable_csv_is_decoded() {
        let raw = "From: a@b.com\r\n\
Content-Type: text/csv; charset=ISO-8859-1; name=\"q.csv\"\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
nom;caf=E9\r\n";
        let extraction = extract_raw(raw);
        let csv = &extraction.candidates[0];
        assert!(csv.content.as_deref().unwrap().starts_with(b"nom;caf\xE9"));
        assert_eq!(csv.charset.as_deref(), Some("iso-8859-1"));
    }
}
