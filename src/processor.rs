//! Message processing: one raw RFC 822 message in, files on disk and a
//! delete/keep verdict out.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::Result;
use crate::export::attachment::write_candidate;
use crate::filter::{Disposition, MessageFilter};
use crate::model::address::EmailAddress;
use crate::parser::header::{self, decode_header_value, HeaderWords, RawHeaders};
use crate::parser::mime;

/// Everything the processor needs, fixed for the whole run.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub filter: MessageFilter,
    /// Existing directory attachments are written into.
    pub output_dir: PathBuf,
    /// Hide informational lines (matches, saved files).
    pub quiet: bool,
    /// Insert the message date into saved CSV names.
    pub date_stamp: bool,
    pub header_words: HeaderWords,
}

impl ProcessorConfig {
    pub fn from_config(config: &Config) -> Self {
        let quiet = config.general.quiet;
        Self {
            filter: MessageFilter::new(
                &config.filter.valid_senders,
                &config.filter.subject_patterns,
                config.filter.ignore_unmatched_sender,
                config.filter.sender_match,
                quiet,
            ),
            output_dir: config.output.directory.clone(),
            quiet,
            date_stamp: config.output.date_stamp,
            header_words: config.general.header_words(),
        }
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub disposition: Disposition,
    pub sender: EmailAddress,
    pub subject: String,
    /// Files written, in document order.
    pub saved: Vec<PathBuf>,
}

impl Outcome {
    /// Whether the message may be removed from the server.
    pub fn deletable(&self) -> bool {
        self.disposition != Disposition::Reject
    }
}

/// Applies the filter and extraction to messages one at a time.
#[derive(Debug, Clone)]
pub struct MessageProcessor {
    config: ProcessorConfig,
}

impl MessageProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process one message; `true` means it is safe to delete.
    ///
    /// Never fails: any error is logged against `message_id` and the message
    /// is kept.
    pub fn process(&self, raw_message: &[u8], message_id: &str) -> bool {
        match self.process_message(raw_message) {
            Ok(outcome) => outcome.deletable(),
            Err(e) => {
                error!(message = message_id, error = %e, "Message not processed, keeping it");
                false
            }
        }
    }

    /// Process one message and report the details.
    ///
    /// Errors: the message cannot be parsed, or an attachment could not be
    /// written (a single failed write fails the whole message).
    pub fn process_message(&self, raw_message: &[u8]) -> Result<Outcome> {
        let raw_message = mime::strip_envelope(raw_message);
        let message = mime::parse_message(raw_message)?;
        let headers = RawHeaders::read(raw_message);

        let words = self.config.header_words;
        let subject = decode_header_value(
            headers.get("subject").unwrap_or(b"No subject."),
            None,
            words,
        );
        let from = decode_header_value(
            headers.get("from").unwrap_or(b"Unknown Sender"),
            None,
            words,
        );
        let sender = EmailAddress::parse(&from);

        let disposition = self.config.filter.evaluate(&sender, &subject);
        let mut outcome = Outcome {
            disposition,
            sender,
            subject,
            saved: Vec::new(),
        };
        if disposition != Disposition::Accept {
            return Ok(outcome);
        }

        let extraction = mime::extract(&message);
        debug!(body = extraction.body_or_placeholder(), "Body text");

        let date = if self.config.date_stamp {
            headers
                .get("date")
                .map(|raw| header::decode_unknown(None, raw))
                .and_then(|d| header::parse_date(&d))
        } else {
            None
        };

        for candidate in &extraction.candidates {
            let written = write_candidate(candidate, &self.config.output_dir, date.as_ref())
                .inspect_err(|e| error!(error = %e, "Attachment not saved"))?;
            if let Some(path) = written {
                if !self.config.quiet {
                    info!(path = %path.display(), "Attachment saved");
                }
                outcome.saved.push(path);
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SenderMatch;

    fn processor(dir: &std::path::Path, ignore: bool) -> MessageProcessor {
        MessageProcessor::new(ProcessorConfig {
            filter: MessageFilter::new(
                &[r"^lab@partner\.com$".to_string()],
                &[".* lims".to_string()],
                ignore,
                SenderMatch::Any,
                true,
            ),
            output_dir: dir.to_path_buf(),
            quiet: true,
            date_stamp: false,
            header_words: HeaderWords::First,
        })
    }

    #[test]
    fn test_defaults_for_missing_headers() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = processor(dir.path(), false)
            .process_message(b"X-Nothing: here\r\n\r\nbody\r\n")
            .unwrap();
        assert_eq!(outcome.subject, "No subject.");
        assert_eq!(outcome.sender.address, "Unknown Sender");
        assert_eq!(outcome.disposition, Disposition::Reject);
    }

    #[test]
    fn test_malformed_message_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!processor(dir.path(), true).process(b"", "7"));
    }

    #[test]
    fn test_plain_message_without_csv_is_deletable() {
        let dir = tempfile::tempdir().unwrap();
        let raw = b"From: lab@partner.com\r\nSubject: Results lims\r\n\r\nNo data today.\r\n";
        let outcome = processor(dir.path(), false).process_message(raw).unwrap();
        assert_eq!(outcome.disposition, Disposition::Accept);
        assert!(outcome.saved.is_empty());
        assert!(outcome.deletable());
    }

    #[test]
    fn test_bom_prefixed_message_keeps_sender() {
        let dir = tempfile::tempdir().unwrap();
        let raw = b"\xEF\xBB\xBFFrom: lab@partner.com\r\nSubject: Results lims\r\n\r\nbody";
        let outcome = processor(dir.path(), false).process_message(raw).unwrap();
        assert_eq!(outcome.sender.address, "lab@partner.com");
        assert_eq!(outcome.disposition, Disposition::Accept);
    }

    #[test]
    fn test_mbox_separator_line_is_not_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let raw = b"From lab@partner.com Thu Jan  4 10:00:00 2024\n\
From: lab@partner.com\nSubject: Results lims\n\nbody\n";
        let outcome = processor(dir.path(), false).process_message(raw).unwrap();
        assert_eq!(outcome.sender.address, "lab@partner.com");
        assert_eq!(outcome.subject, "Results lims");
    }
}
