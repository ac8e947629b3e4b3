//! Sender and subject allow-rules.
//!
//! Patterns are regular expressions matched from the start of the value (a
//! match must begin at offset 0 but need not consume the whole string).
//! An unparseable pattern does not stop the run: it rejects every message
//! that reaches it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::IngestError;
use crate::model::address::EmailAddress;

/// Verdict for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Disposition {
    /// Sender and subject matched: save the CSV parts, then the message may go.
    Accept,
    /// Keep the message on the server and save nothing.
    Reject,
    /// Sender matched no rule but unmatched senders are ignorable: delete
    /// without saving.
    AcceptNoSave,
}

/// How the list of sender patterns is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderMatch {
    /// Patterns are tried in order; the first match wins.
    #[default]
    Any,
    /// Only the first pattern counts.
    First,
}

/// Header a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Sender,
    Subject,
}

impl std::fmt::Display for RuleField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sender => write!(f, "sender"),
            Self::Subject => write!(f, "subject"),
        }
    }
}

/// One compiled pattern. A pattern that failed to compile keeps its error.
#[derive(Debug, Clone)]
pub struct FilterRule {
    field: RuleField,
    pattern: String,
    regex: Result<Regex, String>,
}

impl FilterRule {
    pub fn new(field: RuleField, pattern: &str) -> Self {
        Self {
            field,
            pattern: pattern.to_string(),
            regex: Regex::new(pattern).map_err(|e| e.to_string()),
        }
    }

    pub fn field(&self) -> RuleField {
        self.field
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_valid(&self) -> bool {
        self.regex.is_ok()
    }

    /// Whether `text` matches this pattern starting at its first character.
    pub fn matches_start(&self, text: &str) -> Result<bool, IngestError> {
        match &self.regex {
            Ok(re) => Ok(re.find(text).is_some_and(|m| m.start() == 0)),
            Err(reason) => Err(IngestError::InvalidPattern {
                pattern: self.pattern.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Ordered sender and subject rules plus the flags that steer them.
///
/// Built once per run from the configuration and shared by every message.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    senders: Vec<FilterRule>,
    subjects: Vec<FilterRule>,
    ignore_unmatched_sender: bool,
    sender_match: SenderMatch,
    quiet: bool,
}

impl MessageFilter {
    pub fn new(
        sender_patterns: &[String],
        subject_patterns: &[String],
        ignore_unmatched_sender: bool,
        sender_match: SenderMatch,
        quiet: bool,
    ) -> Self {
        let compile = |field: RuleField, patterns: &[String]| -> Vec<FilterRule> {
            patterns
                .iter()
                .map(|p| {
                    let rule = FilterRule::new(field, p);
                    if let Err(reason) = &rule.regex {
                        warn!(
                            field = %field,
                            pattern = %p,
                            reason = %reason,
                            "Invalid regular expression, matching messages will be kept"
                        );
                    }
                    rule
                })
                .collect()
        };

        Self {
            senders: compile(RuleField::Sender, sender_patterns),
            subjects: compile(RuleField::Subject, subject_patterns),
            ignore_unmatched_sender,
            sender_match,
            quiet,
        }
    }

    pub fn sender_rules(&self) -> &[FilterRule] {
        &self.senders
    }

    pub fn subject_rules(&self) -> &[FilterRule] {
        &self.subjects
    }

    /// Decide what happens to a message with this sender and subject.
    ///
    /// Subject rules are only consulted once a sender rule matched.
    /// [`Disposition::Accept`] means extraction should run.
    pub fn evaluate(&self, sender: &EmailAddress, subject: &str) -> Disposition {
        let mut sender_matched = false;
        for rule in &self.senders {
            match rule.matches_start(&sender.address) {
                Err(e) => {
                    error!(sender = %sender.address, subject, "{e}");
                    return Disposition::Reject;
                }
                Ok(true) => {
                    if !self.quiet {
                        info!(sender = %sender, pattern = rule.pattern(), "Sender match");
                    }
                    sender_matched = true;
                    break;
                }
                Ok(false) if self.sender_match == SenderMatch::First => break,
                Ok(false) => {}
            }
        }

        if !sender_matched {
            warn!(sender = %sender, subject, "Ignoring mail from unlisted sender");
            return if self.ignore_unmatched_sender {
                Disposition::AcceptNoSave
            } else {
                Disposition::Reject
            };
        }

        for rule in &self.subjects {
            match rule.matches_start(subject) {
                Err(e) => {
                    error!(sender = %sender.address, subject, "{e}");
                    return Disposition::Reject;
                }
                Ok(true) => {
                    if !self.quiet {
                        info!(subject, pattern = rule.pattern(), "Subject match");
                    }
                    return Disposition::Accept;
                }
                Ok(false) => {}
            }
        }

        debug!(subject, "No subject pattern matched");
        Disposition::Reject
    }
}
