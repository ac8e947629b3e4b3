//! `csvfetch`: pull CSV attachments out of a mailbox into a directory.
//!
//! Messages are fetched over IMAP or POP3, filtered by sender and subject
//! patterns, and every `text/csv` part of an accepted message is written to
//! the output directory under a sanitized name. The processor tells the
//! poller whether each message may then be deleted from the server.

pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod mailbox;
pub mod model;
pub mod parser;
pub mod processor;
