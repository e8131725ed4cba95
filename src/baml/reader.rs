use std::collections::HashMap;

use crate::{
    baml::{
        records::{key_base_index, BamlRecord, BamlRecordType, RecordLayout},
        BamlDocument, BamlVersion, BAML_SIGNATURE,
    },
    file::parser::Parser,
    Result,
};

/// A record decoded in the first pass, before byte offsets are turned into record indices.
struct PendingRecord {
    record: BamlRecord,
    /// Byte position of the record's type byte
    position: usize,
    /// For offset-carrying records: the raw offset and the position it is relative to
    offset: Option<(u32, OffsetBase)>,
}

enum OffsetBase {
    /// Relative to a fixed byte position
    Position(usize),
    /// Relative to the first record after the key run starting at this record
    KeyRun,
}

impl BamlDocument {
    /// Parse a BAML stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong signature, an unknown record type,
    /// a record whose size disagrees with its content or an offset that does not land on
    /// a record boundary, and [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse(data: &[u8]) -> Result<BamlDocument> {
        if data.is_empty() {
            return Err(crate::Error::Empty);
        }

        let mut parser = Parser::new(data);
        let signature = read_signature(&mut parser)?;
        if signature != BAML_SIGNATURE {
            return Err(malformed_error!("Invalid BAML signature - {}", signature));
        }

        let reader_version = read_version(&mut parser)?;
        let updater_version = read_version(&mut parser)?;
        let writer_version = read_version(&mut parser)?;

        let mut pending = Vec::new();
        while parser.has_more_data() {
            pending.push(read_record(&mut parser)?);
        }

        let positions: HashMap<usize, usize> = pending
            .iter()
            .enumerate()
            .map(|(index, record)| (record.position, index))
            .collect();
        let types: Vec<BamlRecordType> = pending.iter().map(|p| p.record.record_type()).collect();

        let mut records = Vec::with_capacity(pending.len());
        for (index, entry) in pending.iter().enumerate() {
            let mut record = entry.record.clone();
            if let Some((value, base)) = &entry.offset {
                let base_position = match base {
                    OffsetBase::Position(position) => *position,
                    OffsetBase::KeyRun => pending
                        .get(key_base_index(&types, index))
                        .map_or(data.len(), |base| base.position),
                };
                let target_position = base_position
                    .checked_add(*value as usize)
                    .ok_or(out_of_bounds_error!())?;
                let target = if target_position == data.len() {
                    pending.len()
                } else {
                    *positions.get(&target_position).ok_or_else(|| {
                        malformed_error!(
                            "Record at {} points to {}, which is not a record boundary",
                            entry.position,
                            target_position
                        )
                    })?
                };
                set_target(&mut record, target);
            }
            records.push(record);
        }

        Ok(BamlDocument {
            signature,
            reader_version,
            updater_version,
            writer_version,
            records,
        })
    }
}

fn set_target(record: &mut BamlRecord, index: usize) {
    match record {
        BamlRecord::DeferableContentStart { target }
        | BamlRecord::DefAttributeKeyString { target, .. }
        | BamlRecord::DefAttributeKeyType { target, .. }
        | BamlRecord::KeyElementStart { target, .. } => *target = index,
        _ => {}
    }
}

/// The signature is a 4-byte length followed by that many bytes of UTF-16, padded to 4.
fn read_signature(parser: &mut Parser) -> Result<String> {
    let length = parser.read_le::<u32>()? as usize;
    if length % 2 != 0 {
        return Err(malformed_error!("Invalid BAML signature length - {}", length));
    }

    let bytes = parser.read_bytes(length)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let signature = widestring::U16Str::from_slice(&units)
        .to_string()
        .map_err(|_| malformed_error!("Invalid BAML signature encoding"))?;

    let padding = (4 - length % 4) % 4;
    parser.advance_by(padding)?;
    Ok(signature)
}

fn read_version(parser: &mut Parser) -> Result<BamlVersion> {
    Ok(BamlVersion {
        major: parser.read_le::<u16>()?,
        minor: parser.read_le::<u16>()?,
    })
}

fn read_bool(parser: &mut Parser) -> Result<bool> {
    Ok(parser.read_le::<u8>()? != 0)
}

fn read_record(parser: &mut Parser) -> Result<PendingRecord> {
    let position = parser.pos();
    let type_byte = parser.read_le::<u8>()?;
    let record_type = BamlRecordType::from_repr(type_byte)
        .ok_or_else(|| malformed_error!("Unknown BAML record type {} at {}", type_byte, position))?;

    let (payload_start, payload_end) = match record_type.layout() {
        RecordLayout::Fixed(length) => {
            let start = parser.pos();
            (start, parser.calc_end_position(length)?)
        }
        RecordLayout::Sized => {
            let size_start = parser.pos();
            let size = parser.read_7bit_encoded_int()? as usize;
            let size_length = parser.pos() - size_start;
            let payload_length = size.checked_sub(size_length).ok_or_else(|| {
                malformed_error!("{} record at {} has invalid size {}", record_type, position, size)
            })?;
            let start = parser.pos();
            (start, parser.calc_end_position(payload_length)?)
        }
        RecordLayout::NamedElement => {
            let start = parser.pos();
            let mut lookahead = Parser::new(parser.data());
            lookahead.seek(start)?;
            lookahead.read_le::<u16>()?;
            let length = lookahead.read_7bit_encoded_int()? as usize;
            (start, lookahead.calc_end_position(length)?)
        }
    };

    let payload = &parser.data()[payload_start..payload_end];
    let mut fields = Parser::new(payload);
    let mut offset = None;

    let record = match record_type {
        BamlRecordType::AssemblyInfo => BamlRecord::AssemblyInfo {
            assembly_id: fields.read_le::<u16>()?,
            assembly_full_name: fields.read_prefixed_string_utf8()?,
        },
        BamlRecordType::XmlnsProperty => {
            let prefix = fields.read_prefixed_string_utf8()?;
            let xml_namespace = fields.read_prefixed_string_utf8()?;
            let count = fields.read_le::<u16>()?;
            let mut assembly_ids = Vec::with_capacity(usize::from(count).min(fields.remaining() / 2));
            for _ in 0..count {
                assembly_ids.push(fields.read_le::<u16>()?);
            }
            BamlRecord::XmlnsProperty {
                prefix,
                xml_namespace,
                assembly_ids,
            }
        }
        BamlRecordType::Property => BamlRecord::Property {
            attribute_id: fields.read_le::<u16>()?,
            value: fields.read_prefixed_string_utf8()?,
        },
        BamlRecordType::PropertyWithConverter => BamlRecord::PropertyWithConverter {
            attribute_id: fields.read_le::<u16>()?,
            value: fields.read_prefixed_string_utf8()?,
            converter_type_id: fields.read_le::<u16>()?,
        },
        BamlRecordType::Text => BamlRecord::Text {
            value: fields.read_prefixed_string_utf8()?,
        },
        BamlRecordType::TextWithConverter => BamlRecord::TextWithConverter {
            value: fields.read_prefixed_string_utf8()?,
            converter_type_id: fields.read_le::<u16>()?,
        },
        BamlRecordType::TypeInfo => BamlRecord::TypeInfo {
            type_id: fields.read_le::<u16>()?,
            assembly_id: fields.read_le::<u16>()?,
            type_full_name: fields.read_prefixed_string_utf8()?,
        },
        BamlRecordType::TypeSerializerInfo => BamlRecord::TypeSerializerInfo {
            type_id: fields.read_le::<u16>()?,
            assembly_id: fields.read_le::<u16>()?,
            type_full_name: fields.read_prefixed_string_utf8()?,
            serializer_type_id: fields.read_le::<u16>()?,
        },
        BamlRecordType::DeferableContentStart => {
            let value = fields.read_le::<u32>()?;
            offset = Some((value, OffsetBase::Position(payload_end)));
            BamlRecord::DeferableContentStart { target: 0 }
        }
        BamlRecordType::DefAttributeKeyString => {
            let value_id = fields.read_le::<u16>()?;
            let value = fields.read_le::<u32>()?;
            offset = Some((value, OffsetBase::KeyRun));
            BamlRecord::DefAttributeKeyString {
                value_id,
                target: 0,
                shared: read_bool(&mut fields)?,
                shared_set: read_bool(&mut fields)?,
            }
        }
        BamlRecordType::DefAttributeKeyType | BamlRecordType::KeyElementStart => {
            let type_id = fields.read_le::<u16>()?;
            let flags = fields.read_le::<u8>()?;
            let value = fields.read_le::<u32>()?;
            offset = Some((value, OffsetBase::KeyRun));
            let shared = read_bool(&mut fields)?;
            let shared_set = read_bool(&mut fields)?;
            if record_type == BamlRecordType::KeyElementStart {
                BamlRecord::KeyElementStart {
                    type_id,
                    flags,
                    target: 0,
                    shared,
                    shared_set,
                }
            } else {
                BamlRecord::DefAttributeKeyType {
                    type_id,
                    flags,
                    target: 0,
                    shared,
                    shared_set,
                }
            }
        }
        _ => {
            fields.seek(payload.len())?;
            BamlRecord::Raw {
                record_type,
                data: payload.to_vec(),
            }
        }
    };

    if fields.has_more_data() {
        return Err(malformed_error!(
            "{} record at {} has {} unread bytes",
            record_type,
            position,
            fields.remaining()
        ));
    }

    parser.seek(payload_end)?;
    Ok(PendingRecord {
        record,
        position,
        offset,
    })
}
