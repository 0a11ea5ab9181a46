//! Archive extraction for downloaded price files.
//!
//! Portals label compression inconsistently, so the format is sniffed from
//! the leading bytes rather than the file extension:
//! - `PK` starts a zip archive
//! - `1f 8b` starts a gzip stream
//! - any other signature is rejected
//!
//! Output is written to a `.part` sibling and renamed into place, so a
//! failed extraction never leaves a partial destination file behind.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::ExtractionError;

const ZIP_MAGIC: &[u8] = b"PK";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Compression format detected from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
}

/// Extracts gzip or zip archives to a destination document path.
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Detect the archive format from the first bytes of `path`.
    pub fn sniff(path: &Path) -> Result<ArchiveFormat, ExtractionError> {
        let mut head = [0u8; 4];
        let mut file = File::open(path)?;
        let n = read_up_to(&mut file, &mut head)?;
        let head = &head[..n];

        if head.starts_with(ZIP_MAGIC) {
            Ok(ArchiveFormat::Zip)
        } else if head.starts_with(GZIP_MAGIC) {
            Ok(ArchiveFormat::Gzip)
        } else {
            Err(ExtractionError::UnknownFormat {
                path: path.to_path_buf(),
                signature: hex_signature(head),
            })
        }
    }

    /// Extract `archive` to `destination`.
    ///
    /// Returns every document written. A zip with several file members
    /// produces one document per member: the first at `destination`, the
    /// k-th at `{stem}-{k}.{ext}` next to it.
    pub fn extract(archive: &Path, destination: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
        match Self::sniff(archive)? {
            ArchiveFormat::Zip => Self::extract_zip(archive, destination),
            ArchiveFormat::Gzip => {
                Self::extract_gzip(archive, destination)?;
                Ok(vec![destination.to_path_buf()])
            }
        }
    }

    fn extract_gzip(archive: &Path, destination: &Path) -> Result<(), ExtractionError> {
        let file = File::open(archive)?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        write_atomically(destination, |out| io::copy(&mut decoder, out).map(|_| ())).map_err(
            |e| ExtractionError::Corrupt {
                path: archive.to_path_buf(),
                message: e.to_string(),
            },
        )
    }

    fn extract_zip(archive: &Path, destination: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
        let file = File::open(archive)?;
        let mut zip = ZipArchive::new(BufReader::new(file))?;

        let members: Vec<usize> = (0..zip.len())
            .filter(|&i| zip.by_index(i).map(|f| f.is_file()).unwrap_or(false))
            .collect();

        if members.is_empty() {
            return Err(ExtractionError::Empty(archive.to_path_buf()));
        }
        if members.len() > 1 {
            warn!(
                "{} holds {} members, extracting each to its own document",
                archive.display(),
                members.len()
            );
        }

        let mut written = Vec::with_capacity(members.len());
        for (position, index) in members.into_iter().enumerate() {
            let target = member_destination(destination, position);
            let mut member = zip.by_index(index)?;
            debug!("Extracting member {} to {}", member.name(), target.display());

            let result = write_atomically(&target, |out| io::copy(&mut member, out).map(|_| ()));
            if let Err(e) = result {
                // Members already written stay; they are complete documents.
                return Err(ExtractionError::Corrupt {
                    path: archive.to_path_buf(),
                    message: e.to_string(),
                });
            }
            written.push(target);
        }

        Ok(written)
    }
}

/// Destination for the zip member at `position` (0-based).
fn member_destination(destination: &Path, position: usize) -> PathBuf {
    if position == 0 {
        return destination.to_path_buf();
    }
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match destination.extension() {
        Some(ext) => format!("{}-{}.{}", stem, position + 1, ext.to_string_lossy()),
        None => format!("{}-{}", stem, position + 1),
    };
    destination.with_file_name(name)
}

/// Write through `{target}.part` and rename on success; remove the part file on failure.
fn write_atomically<F>(target: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let part = part_path(target);
    let result = File::create(&part).and_then(|mut out| {
        write(&mut out)?;
        out.flush()?;
        out.sync_all()
    });

    match result {
        Ok(()) => std::fs::rename(&part, target),
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(&part) {
                if rm.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove partial file {}: {}", part.display(), rm);
                }
            }
            Err(e)
        }
    }
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn hex_signature(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    const XML: &[u8] = b"<?xml version=\"1.0\"?><Root><Items/></Root>";

    fn write_gzip(path: &Path, payload: &[u8]) {
        let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        enc.write_all(payload).unwrap();
        enc.finish().unwrap();
    }

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in members {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_gzip_extracts_to_destination() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("PriceFull.gz");
        let dest = dir.path().join("PriceFull.xml");
        write_gzip(&archive, XML);

        assert_eq!(ArchiveExtractor::sniff(&archive).unwrap(), ArchiveFormat::Gzip);
        let written = ArchiveExtractor::extract(&archive, &dest).unwrap();
        assert_eq!(written, vec![dest.clone()]);
        assert_eq!(std::fs::read(&dest).unwrap(), XML);
    }

    #[test]
    fn test_zip_sniffed_despite_gz_extension() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("Stores.gz");
        let dest = dir.path().join("Stores.xml");
        write_zip(&archive, &[("inner-name.xml", XML)]);

        assert_eq!(ArchiveExtractor::sniff(&archive).unwrap(), ArchiveFormat::Zip);
        let written = ArchiveExtractor::extract(&archive, &dest).unwrap();
        assert_eq!(written, vec![dest.clone()]);
        assert_eq!(std::fs::read(&dest).unwrap(), XML);
        assert!(!dir.path().join("inner-name.xml").exists());
    }

    #[test]
    fn test_zip_with_several_members() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("Promo.zip");
        let dest = dir.path().join("Promo.xml");
        write_zip(&archive, &[("a.xml", b"<a/>"), ("b.xml", b"<b/>")]);

        let written = ArchiveExtractor::extract(&archive, &dest).unwrap();
        assert_eq!(written, vec![dest.clone(), dir.path().join("Promo-2.xml")]);
        assert_eq!(std::fs::read(&written[0]).unwrap(), b"<a/>");
        assert_eq!(std::fs::read(&written[1]).unwrap(), b"<b/>");
    }

    #[test]
    fn test_unknown_signature_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("page.gz");
        let dest = dir.path().join("page.xml");
        std::fs::write(&archive, b"<html>login</html>").unwrap();

        let err = ArchiveExtractor::extract(&archive, &dest).unwrap_err();
        assert!(matches!(err, ExtractionError::UnknownFormat { .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_truncated_gzip_leaves_no_partial_file() {
        let dir = tempdir().unwrap();
        let full = dir.path().join("full.gz");
        write_gzip(&full, &XML.repeat(200));
        let bytes = std::fs::read(&full).unwrap();

        let archive = dir.path().join("cut.gz");
        std::fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();
        let dest = dir.path().join("cut.xml");

        let err = ArchiveExtractor::extract(&archive, &dest).unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt { .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_corrupt_zip_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"PK\x03\x04 not really a zip").unwrap();
        let dest = dir.path().join("broken.xml");

        assert!(ArchiveExtractor::extract(&archive, &dest).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_empty_file_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("empty.gz");
        std::fs::write(&archive, b"").unwrap();
        let err = ArchiveExtractor::sniff(&archive).unwrap_err();
        assert!(matches!(err, ExtractionError::UnknownFormat { ref signature, .. } if signature == "<empty>"));
    }
}
