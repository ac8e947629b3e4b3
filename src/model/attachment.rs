//! Attachment candidates collected while walking a message.
//!
//! Candidates live only for the duration of one message: the walker produces
//! them, the exporter writes the ones that qualify, then they are dropped.

/// A leaf part that qualified for saving (a `text/csv` part).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentCandidate {
    /// Declared `name` parameter, or the synthesized `part-{index}{ext}`.
    /// `None` only if neither could be produced.
    pub declared_name: Option<String>,

    /// Transfer-decoded payload, still in the part's charset. `None` when the
    /// part carried no body.
    pub content: Option<Vec<u8>>,

    /// Declared `charset` parameter, lowercase.
    pub charset: Option<String>,

    /// The Content-Transfer-Encoding could not be undone; `content` is the
    /// body as `mail-parser` recovered it and must not be saved.
    pub transfer_failed: bool,

    /// Full MIME type, lowercase (e.g. `"text/csv"`).
    pub mime_type: String,
}

impl AttachmentCandidate {
    /// Whether there is anything to write: both a name and non-empty content.
    pub fn is_writable(&self) -> bool {
        self.declared_name.as_deref().is_some_and(|n| !n.is_empty())
            && self.content.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Result of walking a message's MIME tree.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Text of the last unnamed `text/plain` leaf, if any.
    pub body_plain: Option<String>,

    /// CSV parts in document order.
    pub candidates: Vec<AttachmentCandidate>,
}

/// Shown in logs when a message has no plain-text body.
pub const NO_PLAIN_BODY: &str = "No plain-text email body";

impl Extraction {
    /// The plain-text body, or the fixed placeholder.
    pub fn body_or_placeholder(&self) -> &str {
        match self.body_plain.as_deref() {
            Some(body) if !body.is_empty() => body,
            _ => NO_PLAIN_BODY,
        }
    }
}
