//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `--config <FILE>` on the command line
//! 2. `$CSVFETCH_CONFIG` (environment variable)
//! 3. `~/.config/csvfetch/config.toml` (Linux/macOS)
//!    `%APPDATA%\csvfetch\config.toml` (Windows)
//! 4. Built-in defaults
//!
//! Command-line flags are applied on top by the binary, then the result is
//! checked once with [`Config::validate`] and frozen into a
//! [`ProcessorConfig`](crate::processor::ProcessorConfig) for the run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::filter::SenderMatch;
use crate::parser::header::HeaderWords;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Mail server connection.
    pub mailbox: MailboxConfig,
    /// Sender and subject allow-rules.
    pub filter: FilterConfig,
    /// Where attachments go.
    pub output: OutputConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Hide the per-message informational lines.
    pub quiet: bool,
    /// Delete messages from the server once they are processed.
    pub delete: bool,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Also append log lines to this file.
    pub log_file: Option<PathBuf>,
    /// Decode every RFC 2047 encoded-word in `From:`/`Subject:` instead of
    /// only the first segment.
    pub full_header_decoding: bool,
}

/// Mail transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Imap,
    Pop3,
}

impl Protocol {
    /// Implicit-TLS port.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Imap => 993,
            Self::Pop3 => 995,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imap => write!(f, "imap"),
            Self::Pop3 => write!(f, "pop3"),
        }
    }
}

/// Mail server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub protocol: Protocol,
    /// Server host name (also used for TLS verification).
    pub server: Option<String>,
    /// Port; the protocol's TLS port when unset.
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// IMAP folder to poll. Ignored for POP3.
    pub folder: String,
}

/// Sender and subject allow-rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Regular expressions for accepted sender addresses, in order.
    pub valid_senders: Vec<String>,
    /// Regular expressions for accepted subjects, in order.
    pub subject_patterns: Vec<String>,
    /// Let mail from unlisted senders be deleted (without saving anything).
    pub ignore_unmatched_sender: bool,
    /// "any": senders are OR'd. "first": only the first pattern counts.
    pub sender_match: SenderMatch,
}

/// Where attachments go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Existing directory CSV files are written into.
    pub directory: PathBuf,
    /// Insert the message date into saved names: `report.20240104.csv`.
    pub date_stamp: bool,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            quiet: false,
            delete: false,
            log_level: "info".to_string(),
            log_file: None,
            full_header_decoding: false,
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Imap,
            server: None,
            port: None,
            user: None,
            password: None,
            folder: "INBOX".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            date_stamp: false,
        }
    }
}

impl GeneralConfig {
    pub fn header_words(&self) -> HeaderWords {
        if self.full_header_decoding {
            HeaderWords::All
        } else {
            HeaderWords::First
        }
    }
}

impl MailboxConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }
}

impl Config {
    /// Check everything a mailbox run needs. Regexes are not compiled here:
    /// a broken pattern only affects the messages that reach it.
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| IngestError::Config(format!("missing {what}"));
        self.mailbox
            .server
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("mail server (--server)"))?;
        self.mailbox
            .user
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("user (--user)"))?;
        self.mailbox
            .password
            .as_deref()
            .ok_or_else(|| missing("password (--password or CSVFETCH_PASSWORD)"))?;
        self.validate_filter()?;
        self.validate_output()
    }

    /// Check the settings an offline run (no mailbox) needs.
    pub fn validate_filter(&self) -> Result<()> {
        if self.filter.valid_senders.is_empty() {
            return Err(IngestError::Config(
                "at least one valid sender pattern is required (--valid)".into(),
            ));
        }
        if self.filter.subject_patterns.is_empty() {
            return Err(IngestError::Config(
                "at least one subject pattern is required (--match)".into(),
            ));
        }
        Ok(())
    }

    /// The output directory must already exist; it is never created.
    pub fn validate_output(&self) -> Result<()> {
        let dir = &self.output.directory;
        if !dir.is_dir() {
            return Err(IngestError::Config(format!(
                "output directory '{}' does not exist",
                dir.display()
            )));
        }
        Ok(())
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match load_config_from(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Load configuration from an explicit file. Unlike [`load_config`], a
/// missing or broken file is an error.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IngestError::FileNotFound(path.to_path_buf())
        } else {
            IngestError::io(path, e)
        }
    })?;
    let cfg = toml::from_str::<Config>(&contents)
        .map_err(|e| IngestError::Config(format!("{}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "Loaded config");
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("CSVFETCH_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("csvfetch").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.mailbox.protocol, Protocol::Imap);
        assert_eq!(cfg.mailbox.port(), 993);
        assert_eq!(cfg.mailbox.folder, "INBOX");
        assert_eq!(cfg.output.directory, PathBuf::from("."));
        assert_eq!(cfg.filter.sender_match, SenderMatch::Any);
        assert_eq!(cfg.general.header_words(), HeaderWords::First);
        assert!(!cfg.general.delete);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let mut cfg = Config::default();
        cfg.filter.valid_senders = vec![r"^lab@partner\.com$".to_string()];
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.filter.valid_senders, cfg.filter.valid_senders);
        assert_eq!(parsed.mailbox.folder, cfg.mailbox.folder);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[mailbox]
protocol = "pop3"
server = "pop.partner.com"

[filter]
valid_senders = ['^lab@partner\.com$']
subject_patterns = ['.* lims']
sender_match = "first"
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.mailbox.protocol, Protocol::Pop3);
        assert_eq!(cfg.mailbox.port(), 995);
        assert_eq!(cfg.filter.sender_match, SenderMatch::First);
        assert_eq!(cfg.filter.subject_patterns, vec![".* lims".to_string()]);
        assert_eq!(cfg.mailbox.folder, "INBOX");
        assert!(!cfg.output.date_stamp);
    }

    #[test]
    fn test_validate_reports_missing_pieces() {
        let mut cfg = Config::default();
        assert!(matches!(cfg.validate(), Err(IngestError::Config(_))));

        cfg.mailbox.server = Some("imap.partner.com".into());
        cfg.mailbox.user = Some("intake".into());
        cfg.mailbox.password = Some("secret".into());
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("--valid"), "{err}");

        cfg.filter.valid_senders = vec!["lab@".into()];
        cfg.filter.subject_patterns = vec![".*".into()];
        let dir = tempfile::tempdir().unwrap();
        cfg.output.directory = dir.path().to_path_buf();
        assert!(cfg.validate().is_ok());

        cfg.output.directory = dir.path().join("missing");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_config_from_missing_file() {
        let err = load_config_from(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, IngestError::FileNotFound(_)));
    }
}
