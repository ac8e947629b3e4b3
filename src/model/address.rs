//! Sender address extraction from a decoded `From:` value (RFC 5322 §3.4).

/// A sender as found in the `From:` header.
///
/// # Examples
/// - `"Lab Reports <lab@partner.com>"` → `display_name = "Lab Reports"`, `address = "lab@partner.com"`
/// - `"lab@partner.com (Lab Reports)"` → `display_name = "Lab Reports"`, `address = "lab@partner.com"`
/// - `"lab@partner.com"` → `display_name = ""`, `address = "lab@partner.com"`
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare address (`user@domain`) the sender filter runs against.
    pub address: String,
}

impl EmailAddress {
    /// Parse a single sender from a decoded header value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    /// - `"user@domain.com (Display Name)"`
    ///
    /// Anything else is kept verbatim (trimmed) as `address`, so a sender
    /// pattern still sees what the message claimed.
    /// That includes a display name with no address at all (`Unknown Sender`,
    /// or just the decoded name when only the first encoded-word of a header
    /// is decoded): it becomes the address, spaces included.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::default();
        }

        if let Some(angle_start) = trimmed.rfind('<') {
            if let Some(angle_end) = trimmed.rfind('>') {
                if angle_end > angle_start {
                    let address = trimmed[angle_start + 1..angle_end].trim().to_string();
                    let display_name = strip_quotes(&trimmed[..angle_start]);
                    return Self {
                        display_name,
                        address,
                    };
                }
            }
        }

        // Old-style trailing comment: "user@domain (Name)"
        if let Some(paren) = trimmed.find('(') {
            if trimmed.ends_with(')') {
                let address = trimmed[..paren].trim();
                if address.contains('@') {
                    return Self {
                        display_name: trimmed[paren + 1..trimmed.len() - 1].trim().to_string(),
                        address: address.to_string(),
                    };
                }
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
