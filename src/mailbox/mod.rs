//! Mailbox access and the poll loop.
//!
//! A [`Mailbox`] hands out raw messages one at a time; [`poll`] runs each one
//! through the [`MessageProcessor`] and deletes it when the processor allows
//! it and deletion is enabled. Processing is strictly sequential.

pub mod imap;
pub mod pop3;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{Config, Protocol};
use crate::error::{IngestError, Result};
use crate::processor::MessageProcessor;

/// Server-side message number (IMAP sequence number or POP3 message number).
pub type MessageId = u32;

/// A logged-in mail store.
pub trait Mailbox {
    /// Short description for the login line, e.g. `imap login to host as user`.
    fn describe(&self) -> String;

    /// Messages currently available, in server order.
    fn list(&mut self) -> Result<Vec<MessageId>>;

    /// Full RFC 822 bytes of one message.
    fn fetch(&mut self, id: MessageId) -> Result<Vec<u8>>;

    /// Mark one message for deletion.
    fn delete(&mut self, id: MessageId) -> Result<()>;

    /// Commit deletions and end the session.
    fn finish(&mut self) -> Result<()>;
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Messages listed on the server.
    pub seen: usize,
    /// Messages the processor allowed to be deleted.
    pub accepted: usize,
    pub deleted: usize,
    /// Messages left on the server.
    pub kept: usize,
    /// Messages that could not be fetched or deleted.
    pub failed: usize,
}

/// Connect and log in to the configured server.
///
/// The configuration must have passed [`Config::validate`].
pub fn connect(config: &Config) -> Result<Box<dyn Mailbox>> {
    let mailbox = &config.mailbox;
    let (Some(server), Some(user), Some(password)) = (
        mailbox.server.as_deref(),
        mailbox.user.as_deref(),
        mailbox.password.as_deref(),
    ) else {
        return Err(IngestError::Config(
            "server, user and password are required to connect".into(),
        ));
    };

    let port = mailbox.port();
    let session: Box<dyn Mailbox> = match mailbox.protocol {
        Protocol::Imap => Box::new(imap::ImapMailbox::connect(
            server,
            port,
            user,
            password,
            &mailbox.folder,
        )?),
        Protocol::Pop3 => Box::new(pop3::Pop3Mailbox::connect(server, port, user, password)?),
    };
    Ok(session)
}

/// Process every listed message once.
///
/// Fetch and delete failures are logged and counted; the run carries on.
/// Transport failures that end the session (connection lost) abort the run.
pub fn poll<M>(mailbox: &mut M, processor: &MessageProcessor, delete: bool) -> Result<PollStats>
where
    M: Mailbox + ?Sized,
{
    let quiet = processor.config().quiet;
    let ids = mailbox.list()?;
    if !quiet {
        info!("{}, {} messages", mailbox.describe(), ids.len());
    }

    let mut stats = PollStats {
        seen: ids.len(),
        ..PollStats::default()
    };

    for id in ids {
        let raw = match mailbox.fetch(id) {
            Ok(raw) => raw,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(message = id, error = %e, "Fetch failed, message skipped");
                stats.failed += 1;
                stats.kept += 1;
                continue;
            }
        };

        if !processor.process(&raw, &id.to_string()) {
            warn!(message = id, "File not saved, message not deleted");
            stats.kept += 1;
            continue;
        }
        stats.accepted += 1;

        if !delete {
            if !quiet {
                info!(message = id, "Message not deleted, delete not enabled");
            }
            stats.kept += 1;
            continue;
        }

        match mailbox.delete(id) {
            Ok(()) => {
                if !quiet {
                    info!(message = id, "Message deleted");
                }
                stats.deleted += 1;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(message = id, error = %e, "Delete failed");
                stats.failed += 1;
                stats.kept += 1;
            }
        }
    }

    mailbox.finish()?;
    Ok(stats)
}
