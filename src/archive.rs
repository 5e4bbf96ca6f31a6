//! Locating the export document inside an uploaded archive.

use std::io::{Read, Seek};
use zip::result::ZipError;
use zip::ZipArchive;

/// Suffix identifying the export document, matched case-insensitively.
pub const EXPORT_FILE_NAME: &str = "export.xml";

/// Archive-level failures. Both are fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a readable zip archive: {reason}")]
    MalformedArchive { reason: String },
    #[error("no {expected} found in archive ({entries} entries searched)")]
    NoExportFound { expected: &'static str, entries: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ZipError> for ArchiveError {
    fn from(e: ZipError) -> Self {
        match e {
            ZipError::Io(e) => ArchiveError::Io(e),
            other => ArchiveError::MalformedArchive {
                reason: other.to_string(),
            },
        }
    }
}

/// An opened export archive with its export member located.
pub struct ExportArchive<R: Read + Seek> {
    archive: ZipArchive<R>,
    member: String,
}

impl<R: Read + Seek> ExportArchive<R> {
    /// Open the archive and find the first entry (in archive order) ending
    /// in `export.xml`.
    pub fn open(reader: R) -> Result<Self, ArchiveError> {
        let archive = ZipArchive::new(reader).map_err(|e| match e {
            // A truncated or foreign file surfaces as IO errors from the
            // central directory reader; treat it as a bad archive too.
            ZipError::Io(e) => ArchiveError::MalformedArchive {
                reason: e.to_string(),
            },
            other => ArchiveError::from(other),
        })?;

        let candidates = archive
            .file_names()
            .filter(|name| is_export_member(name))
            .map(str::to_string)
            .collect::<Vec<_>>();

        let member = match candidates.first() {
            Some(first) => first.clone(),
            None => {
                return Err(ArchiveError::NoExportFound {
                    expected: EXPORT_FILE_NAME,
                    entries: archive.len(),
                })
            }
        };
        if candidates.len() > 1 {
            tracing::warn!(
                chosen = %member,
                ignored = candidates.len() - 1,
                "archive holds several export documents"
            );
        }
        tracing::info!(member = %member, "found export document");

        Ok(Self { archive, member })
    }

    /// Name of the export member inside the archive.
    pub fn member_name(&self) -> &str {
        &self.member
    }

    /// Open the export member for streaming.
    pub fn open_member(&mut self) -> Result<impl Read + '_, ArchiveError> {
        Ok(self.archive.by_name(&self.member)?)
    }
}

fn is_export_member(name: &str) -> bool {
    !name.ends_with('/') && name.to_ascii_lowercase().ends_with(EXPORT_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn zip_with(entries: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    #[test]
    fn test_finds_nested_member_case_insensitive() {
        let data = zip_with(&[
            ("apple_health_export/export_cda.xml", "<cda/>"),
            ("apple_health_export/Export.XML", "<HealthData/>"),
        ]);
        let mut archive = ExportArchive::open(data).unwrap();
        assert_eq!(archive.member_name(), "apple_health_export/Export.XML");

        let mut content = String::new();
        archive.open_member().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "<HealthData/>");
    }

    #[test]
    fn test_missing_member() {
        let data = zip_with(&[("readme.txt", "hello")]);
        match ExportArchive::open(data) {
            Err(ArchiveError::NoExportFound { expected, entries }) => {
                assert_eq!(expected, EXPORT_FILE_NAME);
                assert_eq!(entries, 1);
            }
            other => panic!("expected NoExportFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_not_a_zip() {
        let data = Cursor::new(b"this is not a zip file at all".to_vec());
        assert!(matches!(
            ExportArchive::open(data),
            Err(ArchiveError::MalformedArchive { .. })
        ));
    }

    #[test]
    fn test_member_name_matching() {
        assert!(is_export_member("export.xml"));
        assert!(is_export_member("apple_health_export/EXPORT.xml"));
        assert!(!is_export_member("apple_health_export/export_cda.xml"));
        assert!(!is_export_member("export.xml.bak"));
    }
}
