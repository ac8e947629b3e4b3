//! Save CSV attachment candidates as files in the output directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::model::attachment::AttachmentCandidate;

/// Sanitize an attachment name for use as a single path component.
///
/// Spaces become `_`, then everything outside `[A-Za-z0-9._-]` is dropped.
/// The result may be empty.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Insert `YYYYMMDD` before a trailing `.csv`: `report.csv` → `report.20240104.csv`.
///
/// Names without a `.csv` extension are returned unchanged.
pub fn stamp_date(filename: &str, date: &DateTime<Utc>) -> String {
    match filename.rsplit_once('.') {
        Some((stem, "csv")) => format!("{stem}.{}.csv", date.format("%Y%m%d")),
        _ => filename.to_string(),
    }
}

/// Write one candidate into `output_dir`, overwriting any existing file.
///
/// Returns `Ok(None)` when the candidate has no name or no content (nothing
/// to save, not an error). The payload must decode cleanly in its declared
/// charset (UTF-8 when none is declared or the label is unknown); it is
/// saved as UTF-8.
pub fn write_candidate(
    candidate: &AttachmentCandidate,
    output_dir: &Path,
    date_stamp: Option<&DateTime<Utc>>,
) -> Result<Option<PathBuf>> {
    if !candidate.is_writable() {
        debug!(
            name = candidate.declared_name.as_deref().unwrap_or(""),
            "Skipping empty attachment"
        );
        return Ok(None);
    }
    let (Some(name), Some(content)) = (&candidate.declared_name, &candidate.content) else {
        return Ok(None);
    };

    let mut filename = sanitize_filename(name);
    if let Some(date) = date_stamp {
        filename = stamp_date(&filename, date);
    }
    let path = output_dir.join(&filename);

    let encoding_error = |reason: String| IngestError::AttachmentEncoding {
        name: filename.clone(),
        reason,
    };
    if candidate.transfer_failed {
        return Err(encoding_error("broken transfer encoding".into()));
    }
    let encoding = candidate
        .charset
        .as_deref()
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let text = encoding
        .decode_without_bom_handling_and_without_replacement(content)
        .ok_or_else(|| encoding_error(format!("not valid {} text", encoding.name())))?;

    std::fs::write(&path, text.as_bytes()).map_err(|e| IngestError::io(&path, e))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn csv(name: &str, content: &[u8]) -> AttachmentCandidate {
        AttachmentCandidate {
            declared_name: Some(name.to_string()),
            content: Some(content.to_vec()),
            charset: None,
            transfer_failed: false,
            mime_type: "text/csv".to_string(),
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Report 1.csv"), "Report_1.csv");
        assert_eq!(sanitize_filename("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_filename("a/b\\c:d*e"), "abcde");
        assert_eq!(sanitize_filename("Résumé (v2).csv"), "Rsum_v2.csv");
        assert_eq!(sanitize_filename("€€"), "");
    }

    #[test]
    fn test_stamp_date() {
        let date = Utc.with_ymd_and_hms(2024, 1, 4, 10, 0, 0).unwrap();
        assert_eq!(stamp_date("report.csv", &date), "report.20240104.csv");
        assert_eq!(stamp_date("a.b.csv", &date), "a.b.20240104.csv");
        assert_eq!(stamp_date("notes.txt", &date), "notes.txt");
        assert_eq!(stamp_date("csv", &date), "csv");
    }

    #[test]
    fn test_write_candidate_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Report_1.csv"), "old").unwrap();

        let path = write_candidate(&csv("Report 1.csv", b"id,val\n1,2\n"), dir.path(), None)
            .unwrap()
            .unwrap();
        assert_eq!(path, dir.path().join("Report_1.csv"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "id,val\n1,2\n");
    }

    #[test]
    fn test_write_candidate_skips_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_candidate(&csv("empty.csv", b""), dir.path(), None)
            .unwrap()
            .is_none());
        assert!(!dir.path().join("empty.csv").exists());
    }

    #[test]
    fn test_write_candidate_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_candidate(&csv("bad.csv", b"caf\xe9"), dir.path(), None).unwrap_err();
        assert!(matches!(err, IngestError::AttachmentEncoding { .. }));
    }

    #[test]
    fn test_write_candidate_rejects_invalid_declared_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let mut candidate = csv("bad.csv", b"caf\xe9;1\n");
        candidate.charset = Some("utf-8".to_string());
        let err = write_candidate(&candidate, dir.path(), None).unwrap_err();
        assert!(matches!(err, IngestError::AttachmentEncoding { .. }));
        assert!(!dir.path().join("bad.csv").exists());
    }

    #[test]
    fn test_write_candidate_transcodes_declared_charset() {
        let dir = tempfile::tempdir().unwrap();
        let mut candidate = csv("latin.csv", b"caf\xe9;1\n");
        candidate.charset = Some("iso-8859-1".to_string());
        let path = write_candidate(&candidate, dir.path(), None).unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "café;1\n");
    }

    #[test]
    fn test_write_candidate_unknown_charset_needs_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let mut candidate = csv("odd.csv", "é;1\n".as_bytes());
        candidate.charset = Some("x-made-up".to_string());
        assert!(write_candidate(&candidate, dir.path(), None).unwrap().is_some());

        candidate.content = Some(b"\xe9;1\n".to_vec());
        assert!(write_candidate(&candidate, dir.path(), None).is_err());
    }

    #[test]
    fn test_write_candidate_refuses_broken_transfer_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let mut candidate = csv("raw.csv", b"!!not base64!!");
        candidate.transfer_failed = true;
        let err = write_candidate(&candidate, dir.path(), None).unwrap_err();
        assert!(matches!(err, IngestError::AttachmentEncoding { .. }));
        assert!(!dir.path().join("raw.csv").exists());
    }

    #[test]
    fn test_write_candidate_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = write_candidate(&csv("a.csv", b"x"), &missing, None).unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }
}
