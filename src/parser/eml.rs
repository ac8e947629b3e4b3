//! Reading individual `.eml` files (RFC 5322 messages without MBOX framing)
//! for offline checks.

use std::path::Path;

use crate::error::{IngestError, Result};
use crate::parser::header;

/// Read a single `.eml` file into memory.
///
/// The bytes are returned untouched. A file whose header block holds no
/// `Name: value` line is reported as malformed.
pub fn read_eml(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IngestError::FileNotFound(path.to_path_buf())
        } else {
            IngestError::io(path, e)
        }
    })?;

    let headers = &data[..header::header_end(&data).unwrap_or(data.len())];
    if !headers.contains(&b':') {
        return Err(IngestError::MalformedMessage(format!(
            "{}: no header lines",
            path.display()
        )));
    }
    Ok(data)
}
