//! CSV with a header row
//!
//! CSV cannot tell a missing field from a null one. Both are written as an
//! empty cell and an empty cell decodes to an absent key, so a record never
//! gains fields it did not carry.

use super::{normalize, value_to_text, FormatError};
use crate::models::{EntityType, Record};
use serde_json::Value;

pub(super) fn decode(entity: EntityType, bytes: &[u8]) -> Result<Vec<Record>, FormatError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let csv_error = |e: csv::Error| FormatError::Csv {
        entity,
        line: e.position().map(|p| p.line()).unwrap_or(1),
        message: e.to_string(),
    };

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(csv_error)?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .filter(|(header, cell)| !header.is_empty() && !cell.is_empty())
            .map(|(header, cell)| (header.clone(), Value::String(cell.to_string())))
            .collect();
        records.push(normalize(entity, record));
    }
    Ok(records)
}

pub(super) fn encode(entity: EntityType, records: &[Record]) -> Result<Vec<u8>, FormatError> {
    let encode_error = |message: String| FormatError::Encode { entity, message };

    // Union of keys in first-seen order
    let mut headers: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !headers.contains(&key.as_str()) {
                headers.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    if !headers.is_empty() {
        writer
            .write_record(&headers)
            .map_err(|e| encode_error(e.to_string()))?;
    }
    for record in records {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| record.get(*h).and_then(value_to_text).unwrap_or_default())
            .collect();
        writer
            .write_record(&cells)
            .map_err(|e| encode_error(e.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| encode_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quoted_fields() {
        let csv = "name,description\n\"Doe, Jane\",\"She said \"\"hi\"\"\nand left\"\n";
        let records = decode(EntityType::Authors, csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], json!("Doe, Jane"));
        assert_eq!(records[0]["description"], json!("She said \"hi\"\nand left"));
    }

    #[test]
    fn test_empty_cells_are_absent() {
        let csv = "name,job\nSeneca,\n";
        let records = decode(EntityType::Authors, csv.as_bytes()).unwrap();
        assert!(!records[0].contains_key("job"));
        assert_eq!(records[0].len(), 1);
    }

    #[test]
    fn test_ragged_row_names_line() {
        let csv = "name,job\nSeneca,Philosopher\nCato\n";
        let err = decode(EntityType::Authors, csv.as_bytes()).unwrap_err();
        match err {
            FormatError::Csv { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_encode_uses_key_union() {
        let mut a = Record::new();
        a.insert("name".into(), json!("Life"));
        let mut b = Record::new();
        b.insert("name".into(), json!("Love"));
        b.insert("color".into(), json!("#FF0000"));

        let bytes = encode(EntityType::Tags, &[a, b]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "name,color\nLife,\nLove,#FF0000\n");
    }

    #[test]
    fn test_mixed_key_sets_survive_round_trip() {
        let mut life = Record::new();
        life.insert("name".into(), json!("life"));
        let mut love = Record::new();
        love.insert("name".into(), json!("love"));
        love.insert("color".into(), json!("#112233"));
        let records = vec![life, love];

        let bytes = encode(EntityType::Tags, &records).unwrap();
        let decoded = decode(EntityType::Tags, &bytes).unwrap();
        assert_eq!(decoded, records);
        assert!(!decoded[0].contains_key("color"));
    }
}
