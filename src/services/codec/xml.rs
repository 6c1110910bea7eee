//! XML documents of the form
//! `<records entity="tags"><record><name>life</name><color/></record></records>`

use super::{normalize, value_to_text, FormatError};
use crate::models::{EntityType, Record};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;

const ROOT: &str = "records";
const ROW: &str = "record";

pub(super) fn decode(entity: EntityType, bytes: &[u8]) -> Result<Vec<Record>, FormatError> {
    let xml_error = |message: String| FormatError::Xml { entity, message };

    let text = std::str::from_utf8(bytes).map_err(|e| xml_error(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut records = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<Record> = None;
    let mut field: Option<(String, String)> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            xml_error(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;

        match event {
            Event::Start(e) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    1 => check_root(entity, &e)?,
                    2 if name == ROW => current = Some(Record::new()),
                    2 => return Err(xml_error(format!("unexpected <{}> in <{}>", name, ROOT))),
                    3 => field = Some((name, String::new())),
                    _ => {
                        return Err(xml_error(format!(
                            "field values must be text, found <{}>",
                            name
                        )))
                    }
                }
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    0 => check_root(entity, &e)?,
                    1 if name == ROW => records.push(Record::new()),
                    2 => {
                        if let Some(record) = current.as_mut() {
                            record.insert(name, Value::Null);
                        }
                    }
                    _ => return Err(xml_error(format!("unexpected empty <{}>", name))),
                }
            }
            Event::Text(e) => {
                if let Some((_, value)) = field.as_mut() {
                    let unescaped = e.unescape().map_err(|e| xml_error(e.to_string()))?;
                    value.push_str(&unescaped);
                }
            }
            Event::CData(e) => {
                if let Some((_, value)) = field.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(_) => {
                match depth {
                    3 => {
                        if let (Some((name, value)), Some(record)) = (field.take(), current.as_mut())
                        {
                            let value = if value.is_empty() {
                                Value::Null
                            } else {
                                Value::String(value)
                            };
                            record.insert(name, value);
                        }
                    }
                    2 => {
                        if let Some(record) = current.take() {
                            records.push(record);
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(xml_error("document ended inside an element".to_string()));
    }

    Ok(records.into_iter().map(|r| normalize(entity, r)).collect())
}

fn check_root(entity: EntityType, start: &BytesStart<'_>) -> Result<(), FormatError> {
    let declared = start
        .try_get_attribute("entity")
        .map_err(|e| FormatError::Xml {
            entity,
            message: e.to_string(),
        })?;
    if let Some(attr) = declared {
        let value = attr.unescape_value().map_err(|e| FormatError::Xml {
            entity,
            message: e.to_string(),
        })?;
        if value.parse::<EntityType>().ok() != Some(entity) {
            return Err(FormatError::Xml {
                entity,
                message: format!("document holds '{}' records", value),
            });
        }
    }
    Ok(())
}

fn is_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

pub(super) fn encode(entity: EntityType, records: &[Record]) -> Result<Vec<u8>, FormatError> {
    let encode_error = |message: String| FormatError::Encode { entity, message };
    let mut writer = Writer::new(Vec::new());

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| encode_error(e.to_string()))?;
    writer
        .write_event(Event::Start(
            BytesStart::new(ROOT).with_attributes([("entity", entity.as_str())]),
        ))
        .map_err(|e| encode_error(e.to_string()))?;

    for record in records {
        writer
            .write_event(Event::Start(BytesStart::new(ROW)))
            .map_err(|e| encode_error(e.to_string()))?;
        for (key, value) in record {
            if !is_element_name(key) {
                return Err(encode_error(format!("'{}' is not a valid element name", key)));
            }
            let result = match value_to_text(value) {
                Some(text) if !text.is_empty() => writer
                    .write_event(Event::Start(BytesStart::new(key.as_str())))
                    .and_then(|_| writer.write_event(Event::Text(BytesText::new(&text))))
                    .and_then(|_| writer.write_event(Event::End(BytesEnd::new(key.as_str())))),
                _ => writer.write_event(Event::Empty(BytesStart::new(key.as_str()))),
            };
            result.map_err(|e| encode_error(e.to_string()))?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(ROW)))
            .map_err(|e| encode_error(e.to_string()))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new(ROOT)))
        .map_err(|e| encode_error(e.to_string()))?;
    Ok(writer.into_inner())
}
