//! Archive extraction
//!
//! Downloaded archives are unpacked fully in memory. The format is detected
//! from the leading bytes, not from the URL:
//!
//! - **Zip**: `PK\x03\x04` (also `PK\x05\x06` for an empty archive)
//! - **Tar.gz**: gzip magic `\x1f\x8b` wrapping a tar stream
//!
//! Every file member is returned under its path inside the archive.
//! Directory entries carry no content and are skipped.

use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use thiserror::Error;
use tracing::debug;

/// Member path → contents, ordered by path
pub type ArchiveMembers = BTreeMap<String, Vec<u8>>;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("unrecognized archive format (leading bytes {0:02x?})")]
    UnknownFormat(Vec<u8>),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to read archive member '{name}': {source}")]
    Member {
        name: String,
        source: std::io::Error,
    },

    #[error("archive member has an unsafe path: {0}")]
    UnsafePath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
            Some(ArchiveFormat::Zip)
        } else if bytes.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

/// Unpack every file member of a zip or tar.gz archive
pub fn extract(bytes: &[u8]) -> Result<ArchiveMembers, ArchiveError> {
    match ArchiveFormat::detect(bytes) {
        Some(ArchiveFormat::Zip) => extract_zip(bytes),
        Some(ArchiveFormat::TarGz) => extract_tar_gz(bytes),
        None => Err(ArchiveError::UnknownFormat(
            bytes.iter().take(4).copied().collect(),
        )),
    }
}

fn extract_zip(bytes: &[u8]) -> Result<ArchiveMembers, ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut members = ArchiveMembers::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let name = file
            .enclosed_name()
            .map(|path| path.to_string_lossy().replace('\\', "/"))
            .ok_or_else(|| ArchiveError::UnsafePath(file.name().to_string()))?;

        // Declared sizes come from the archive header and are not trusted
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|source| ArchiveError::Member {
                name: name.clone(),
                source,
            })?;

        debug!(member = %name, bytes = contents.len(), "Extracted zip member");
        members.insert(name, contents);
    }

    Ok(members)
}

fn extract_tar_gz(bytes: &[u8]) -> Result<ArchiveMembers, ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut members = ArchiveMembers::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ArchiveError::UnsafePath(path.display().to_string()));
        }
        let name = path.to_string_lossy().trim_start_matches("./").to_string();

        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|source| ArchiveError::Member {
                name: name.clone(),
                source,
            })?;

        debug!(member = %name, bytes = contents.len(), "Extracted tar member");
        members.insert(name, contents);
    }

    Ok(members)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.add_directory("nested/", SimpleFileOptions::default()).unwrap();
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_detect() {
        assert_eq!(ArchiveFormat::detect(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(&[0x1f, 0x8b, 0x08]), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(b"a,b\n1,2"), None);
    }

    #[test]
    fn test_extract_zip_skips_directories() {
        let bytes = zip_bytes(&[("monthly-2024.csv", b"a,b\n"), ("nested/readme.txt", b"hi")]);
        let members = extract(&bytes).unwrap();

        assert_eq!(
            members.keys().collect::<Vec<_>>(),
            vec!["monthly-2024.csv", "nested/readme.txt"]
        );
        assert_eq!(members["monthly-2024.csv"], b"a,b\n");
    }

    #[test]
    fn test_extract_tar_gz() {
        let bytes = tar_gz_bytes(&[("data/cars.csv", b"KODAS\n1\n")]);
        let members = extract(&bytes).unwrap();
        assert_eq!(members["data/cars.csv"], b"KODAS\n1\n");
    }

    #[test]
    fn test_unknown_format() {
        let err = extract(b"not an archive").unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownFormat(lead) if lead == b"not "));
    }

    #[test]
    fn test_corrupt_zip_fails() {
        let mut bytes = zip_bytes(&[("a.csv", b"x")]);
        bytes.truncate(10);
        assert!(extract(&bytes).is_err());
    }

    #[test]
    fn test_declared_member_size_is_not_trusted() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("big.csv", stored).unwrap();
        writer.write_all(b"a,b\n").unwrap();
        let mut bytes = writer.finish().unwrap().into_inner();

        // Claim ~4 GiB uncompressed in both the local and the central header
        let declared = 0xFFFF_FFF0u32.to_le_bytes();
        bytes[22..26].copy_from_slice(&declared);
        let central = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&declared);

        if let Ok(members) = extract(&bytes) {
            assert_eq!(members["big.csv"], b"a,b\n");
        }
    }
}
