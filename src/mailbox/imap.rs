//! IMAP over implicit TLS, using the blocking `imap` crate.

use std::net::TcpStream;

use native_tls::{TlsConnector, TlsStream};
use tracing::debug;

use super::{Mailbox, MessageId};
use crate::error::{IngestError, Result};

/// A selected IMAP folder.
pub struct ImapMailbox {
    session: ::imap::Session<TlsStream<TcpStream>>,
    server: String,
    user: String,
}

impl ImapMailbox {
    /// Connect, log in and select `folder`.
    pub fn connect(server: &str, port: u16, user: &str, password: &str, folder: &str) -> Result<Self> {
        let connect_err = |reason: String| IngestError::Connect {
            server: server.to_string(),
            reason,
        };
        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| connect_err(e.to_string()))?;
        let client =
            ::imap::connect((server, port), server, &tls).map_err(|e| connect_err(e.to_string()))?;

        let mut session = client.login(user, password).map_err(|(e, _client)| IngestError::Login {
            server: server.to_string(),
            user: user.to_string(),
            reason: e.to_string(),
        })?;
        let selected = session.select(folder)?;
        debug!(folder, exists = selected.exists, "Folder selected");

        Ok(Self {
            session,
            server: server.to_string(),
            user: user.to_string(),
        })
    }
}

impl Mailbox for ImapMailbox {
    fn describe(&self) -> String {
        format!("imap login to {} as {}", self.server, self.user)
    }

    fn list(&mut self) -> Result<Vec<MessageId>> {
        let mut ids: Vec<MessageId> = self.session.search("NOT DELETED")?.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn fetch(&mut self, id: MessageId) -> Result<Vec<u8>> {
        let fetches = self.session.fetch(id.to_string(), "RFC822")?;
        fetches
            .iter()
            .find_map(|f| f.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| IngestError::Protocol(format!("message {id} has no RFC822 body")))
    }

    fn delete(&mut self, id: MessageId) -> Result<()> {
        self.session.store(id.to_string(), "+FLAGS (\\Deleted)")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.session.expunge()?;
        self.session.close()?;
        self.session.logout()?;
        Ok(())
    }
}
