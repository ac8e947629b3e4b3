//! Minimal blocking POP3 client (RFC 1939) over implicit TLS.
//!
//! Only the commands a download-and-delete run needs are implemented:
//! `USER`, `PASS`, `LIST`, `RETR`, `DELE` and `QUIT`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;

use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, trace};

use super::{Mailbox, MessageId};
use crate::error::{IngestError, Result};

/// POP3 protocol state over any byte stream.
pub struct Pop3Session<S: Read + Write> {
    stream: BufReader<S>,
}

impl<S: Read + Write> Pop3Session<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read the server greeting.
    pub fn greeting(&mut self) -> Result<String> {
        self.read_status()
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<()> {
        self.command(&format!("USER {user}"))?;
        self.send("PASS ", password)?;
        self.read_status()?;
        Ok(())
    }

    /// Message numbers and sizes in octets.
    pub fn list(&mut self) -> Result<Vec<(MessageId, u64)>> {
        self.command("LIST")?;
        let listing = self.read_multiline()?;
        listing
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| {
                let text = String::from_utf8_lossy(line);
                let mut fields = text.split_whitespace();
                let number = fields.next().and_then(|n| n.parse().ok());
                let size = fields.next().and_then(|s| s.parse().ok());
                number
                    .zip(size)
                    .ok_or_else(|| IngestError::Protocol(format!("bad LIST line: {text}")))
            })
            .collect()
    }

    /// Full message, CRLF line endings, dot-stuffing removed.
    pub fn retr(&mut self, id: MessageId) -> Result<Vec<u8>> {
        self.command(&format!("RETR {id}"))?;
        self.read_multiline()
    }

    pub fn dele(&mut self, id: MessageId) -> Result<()> {
        self.command(&format!("DELE {id}"))?;
        Ok(())
    }

    /// End the session; the server applies pending deletions now.
    pub fn quit(&mut self) -> Result<()> {
        self.command("QUIT")?;
        Ok(())
    }

    fn command(&mut self, line: &str) -> Result<String> {
        self.send(line, "")?;
        self.read_status()
    }

    /// Write `verb` + `secret` as one line. Only `verb` is logged.
    fn send(&mut self, verb: &str, secret: &str) -> Result<()> {
        trace!(command = verb.trim_end(), "POP3 >");
        let stream = self.stream.get_mut();
        stream.write_all(verb.as_bytes())?;
        stream.write_all(secret.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        if self.stream.read_until(b'\n', &mut line)? == 0 {
            return Err(IngestError::ConnectionLost(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )));
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(line)
    }

    /// `+OK` line text, or the server's `-ERR` text as an error.
    fn read_status(&mut self) -> Result<String> {
        let line = self.read_line()?;
        let text = String::from_utf8_lossy(&line).into_owned();
        trace!(response = %text, "POP3 <");
        if let Some(rest) = text.strip_prefix("+OK") {
            Ok(rest.trim().to_string())
        } else {
            Err(IngestError::Protocol(text))
        }
    }

    fn read_multiline(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == b"." {
                return Ok(data);
            }
            let line = match line.strip_prefix(b".") {
                Some(unstuffed) => unstuffed,
                None => &line[..],
            };
            data.extend_from_slice(line);
            data.extend_from_slice(b"\r\n");
        }
    }
}

/// A logged-in POP3 maildrop.
pub struct Pop3Mailbox {
    session: Pop3Session<TlsStream<TcpStream>>,
    server: String,
    user: String,
}

impl Pop3Mailbox {
    pub fn connect(server: &str, port: u16, user: &str, password: &str) -> Result<Self> {
        let connect_err = |reason: String| IngestError::Connect {
            server: server.to_string(),
            reason,
        };
        let tls = TlsConnector::new().map_err(|e| connect_err(e.to_string()))?;
        let tcp = TcpStream::connect((server, port)).map_err(|e| connect_err(e.to_string()))?;
        let stream = tls
            .connect(server, tcp)
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = Pop3Session::new(stream);
        let greeting = session
            .greeting()
            .map_err(|e| connect_err(e.to_string()))?;
        debug!(server, greeting = %greeting, "POP3 server ready");

        session.login(user, password).map_err(|e| IngestError::Login {
            server: server.to_string(),
            user: user.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            session,
            server: server.to_string(),
            user: user.to_string(),
        })
    }
}

impl Mailbox for Pop3Mailbox {
    fn describe(&self) -> String {
        format!("pop3 login to {} as {}", self.server, self.user)
    }

    fn list(&mut self) -> Result<Vec<MessageId>> {
        Ok(self.session.list()?.into_iter().map(|(id, _)| id).collect())
    }

    fn fetch(&mut self, id: MessageId) -> Result<Vec<u8>> {
        self.session.retr(id)
    }

    fn delete(&mut self, id: MessageId) -> Result<()> {
        self.session.dele(id)
    }

    fn finish(&mut self) -> Result<()> {
        self.session.quit()
    }
}
