//! ZIP bundles: one `<entity>.<json|csv|xml>` entry per entity type

use super::{decode, encode, Format, FormatError};
use crate::models::{Bundle, EntityType};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const MANIFEST_NAME: &str = "manifest.json";

/// Largest decompressed entry accepted when no limit is configured
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Decode every recognised entry of an archive.
///
/// Directories and path prefixes are ignored. Entries whose name is not an
/// entity type, or whose extension is not a row format, become warnings.
/// An entry that inflates past `max_entry_bytes` rejects the whole archive.
pub fn decode_zip(bytes: &[u8], max_entry_bytes: u64) -> Result<(Bundle, Vec<String>), FormatError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| FormatError::Zip(e.to_string()))?;

    let mut bundle = Bundle::new();
    let mut warnings = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| FormatError::Zip(e.to_string()))?;
        if file.is_dir() {
            continue;
        }

        let path = file.name().replace('\\', "/");
        if path.starts_with("__MACOSX/") || path.contains("/__MACOSX/") {
            continue;
        }
        let base = path.rsplit('/').next().unwrap_or(&path).to_string();
        if base == MANIFEST_NAME || base.starts_with('.') {
            continue;
        }

        let Some((stem, ext)) = base.rsplit_once('.') else {
            warnings.push(format!("skipped archive entry '{}': no extension", path));
            continue;
        };
        let entity = match stem.parse::<EntityType>() {
            Ok(entity) => entity,
            Err(_) => {
                warnings.push(format!("skipped archive entry '{}': unknown entity type", path));
                continue;
            }
        };
        let format = match ext.parse::<Format>() {
            Ok(format) if format != Format::Zip => format,
            _ => {
                warnings.push(format!("skipped archive entry '{}': unsupported format", path));
                continue;
            }
        };

        let mut content = Vec::new();
        (&mut file)
            .take(max_entry_bytes.saturating_add(1))
            .read_to_end(&mut content)
            .map_err(|e| FormatError::Zip(format!("{}: {}", path, e)))?;
        if content.len() as u64 > max_entry_bytes {
            return Err(FormatError::Zip(format!(
                "{}: entry exceeds {} bytes",
                path, max_entry_bytes
            )));
        }
        bundle.insert(entity, decode(entity, format, &content)?);
    }

    Ok((bundle, warnings))
}

/// Write one entry per non-empty entity type plus a manifest
pub fn encode_zip(bundle: &Bundle, inner: Format) -> Result<Vec<u8>, FormatError> {
    let zip_error = |e: zip::result::ZipError| FormatError::Zip(e.to_string());
    let io_error = |e: std::io::Error| FormatError::Zip(e.to_string());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entities = Map::new();
    for (entity, records) in bundle.iter() {
        let content = encode(entity, inner, records)?;
        writer
            .start_file(format!("{}.{}", entity, inner.extension()), options)
            .map_err(zip_error)?;
        writer.write_all(&content).map_err(io_error)?;
        entities.insert(entity.as_str().to_string(), Value::from(records.len()));
    }

    let manifest = json!({
        "version": 1,
        "format": inner.as_str(),
        "created_at": Utc::now().to_rfc3339(),
        "entities": entities,
    });
    writer.start_file(MANIFEST_NAME, options).map_err(zip_error)?;
    let manifest = serde_json::to_vec_pretty(&manifest).map_err(|e| FormatError::Zip(e.to_string()))?;
    writer.write_all(&manifest).map_err(io_error)?;

    let cursor = writer.finish().map_err(zip_error)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags_bundle() -> Bundle {
        let mut record = crate::models::Record::new();
        record.insert("name".into(), json!("life"));
        record.insert("color".into(), json!("#112233"));
        Bundle::single(EntityType::Tags, vec![record])
    }

    #[test]
    fn test_round_trip_each_inner_format() {
        for inner in [Format::Json, Format::Csv, Format::Xml] {
            let bytes = encode_zip(&tags_bundle(), inner).unwrap();
            let (bundle, warnings) = decode_zip(&bytes, DEFAULT_MAX_ENTRY_BYTES).unwrap();
            assert!(warnings.is_empty(), "{:?}", warnings);
            assert_eq!(bundle, tags_bundle());
        }
    }

    #[test]
    fn test_unknown_entries_become_warnings() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.add_directory("export/", options).unwrap();
        writer.start_file("export/authors.csv", options).unwrap();
        writer.write_all(b"name\nAda Lovelace\n").unwrap();
        writer.start_file("export/comments.json", options).unwrap();
        writer.write_all(b"[]").unwrap();
        writer.start_file("export/tags.yaml", options).unwrap();
        writer.write_all(b"- name: x").unwrap();
        writer.start_file("__MACOSX/export/._authors.csv", options).unwrap();
        writer.write_all(b"junk").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let (bundle, warnings) = decode_zip(&bytes, DEFAULT_MAX_ENTRY_BYTES).unwrap();
        assert_eq!(bundle.get(EntityType::Authors).map(<[_]>::len), Some(1));
        assert_eq!(bundle.total(), 1);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_not_a_zip() {
        assert!(matches!(
            decode_zip(b"plain text", DEFAULT_MAX_ENTRY_BYTES),
            Err(FormatError::Zip(_))
        ));
    }

    #[test]
    fn test_entry_decode_error_propagates() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("users.json", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"{not json").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert!(matches!(
            decode_zip(&bytes, DEFAULT_MAX_ENTRY_BYTES),
            Err(FormatError::Json(_))
        ));
    }

    #[test]
    fn test_oversized_entry_is_rejected() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file("tags.csv", options).unwrap();
        writer.write_all(b"name\n").unwrap();
        // Highly compressible rows inflate well past the limit
        writer.write_all(&[b'a'; 64 * 1024]).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert!(bytes.len() < 4 * 1024);

        match decode_zip(&bytes, 1024) {
            Err(FormatError::Zip(message)) => assert!(message.contains("exceeds 1024 bytes")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(decode_zip(&bytes, 128 * 1024).is_ok());
    }
}
